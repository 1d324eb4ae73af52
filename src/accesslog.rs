//! # 访问日志模块
//!
//! 每个请求结束后向共享缓冲追加一行结构化记录；一个独立的后台任务
//! 周期性地把缓冲落盘。该任务由 Supervisor 启动，职责仅此一项，
//! worker 在请求路径上只做一次内存追加，不触碰磁盘。

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use log::{debug, error};

/// 共享的访问日志缓冲。克隆代价只是一次 `Arc` 计数。
#[derive(Clone)]
pub struct AccessLog {
    buffer: Arc<Mutex<Vec<String>>>,
    path: PathBuf,
}

impl AccessLog {
    pub fn new(path: &str) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            path: PathBuf::from(path),
        }
    }

    /// 组装一行访问记录并追加到缓冲
    pub fn record(
        &self,
        remote: &str,
        method: &str,
        path: &str,
        status: u16,
        bytes: u64,
        elapsed_ms: u128,
        user_agent: &str,
    ) {
        let line = format!(
            "{} {} \"{} {}\" {} {} {}ms \"{}\"",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            remote,
            method,
            path,
            status,
            bytes,
            elapsed_ms,
            user_agent
        );
        self.append(line);
    }

    pub fn append(&self, line: String) {
        let mut buffer = match self.buffer.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.push(line);
    }

    /// 把缓冲中的全部记录写入磁盘并 flush，返回写出的行数。
    ///
    /// 先在锁内把缓冲整体换出，文件 I/O 在锁外进行。
    pub fn flush(&self) -> io::Result<usize> {
        let lines = {
            let mut buffer = match self.buffer.lock() {
                Ok(lock) => lock,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *buffer)
        };
        if lines.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for line in &lines {
            writeln!(file, "{}", line)?;
        }
        file.flush()?;
        Ok(lines.len())
    }

    /// 启动周期落盘任务
    pub fn spawn_flusher(&self, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                ticker.tick().await;
                match log.flush() {
                    Ok(0) => {}
                    Ok(n) => debug!("访问日志落盘{}行", n),
                    Err(e) => error!("访问日志落盘失败: {}", e),
                }
            }
        })
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }
}
