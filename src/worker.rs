// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Worker 循环模块
//!
//! 每个 worker 是一个长寿命的 Tokio 任务，生命周期受请求数预算约束：
//! 服务满 `requests_per_worker` 个请求后主动退出，由 Supervisor 原位
//! 补充新 worker。worker 私有的编译产物缓存随任务退出整体释放，这就是
//! 泄漏控制手段——不依赖任何精细的内存回收调优。
//!
//! 取连接的互斥只覆盖"从队列取下一个连接"这一步，取到后立刻释放，
//! 连接的读写完全并行。这等价于原型设计中只包住 `accept()` 的文件锁：
//! 既避免了惊群，又不会让一个慢连接拖住其他 worker。

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use crate::accesslog::AccessLog;
use crate::cache::WorkerCaches;
use crate::config::Config;
use crate::exception::Exception;
use crate::handler::HandlerRegistry;
use crate::hooks::ServerHooks;
use crate::request::Request;
use crate::response::Response;
use crate::router;
use crate::util::source_excerpt;

/// 连接队列的接收端。互斥锁即"accept 串行化"：任意时刻只有一个
/// worker 在等待取连接。
pub type ConnectionQueue = Arc<Mutex<mpsc::Receiver<(TcpStream, std::net::SocketAddr)>>>;

/// worker 的退出原因，Supervisor 据此决定是否补位。
#[derive(Debug, PartialEq)]
pub enum WorkerExit {
    /// 请求数预算耗尽，正常退休
    BudgetExhausted,
    /// 连接队列已关闭（服务器停机）
    QueueClosed,
}

/// worker 的运行时状态。
///
/// 随机数发生器以 worker 序号为种子做确定性偏移，保证兄弟 worker
/// 不会产出相同的非加密随机序列。
pub struct WorkerState {
    ordinal: usize,
    served: u32,
    rng_state: u64,
}

impl WorkerState {
    pub fn new(ordinal: usize) -> Self {
        // SplitMix64 的增量常数用作序号到种子的扩散
        let seed = (ordinal as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            ordinal,
            served: 0,
            rng_state: seed,
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn served(&self) -> u32 {
        self.served
    }

    pub fn increment(&mut self) {
        self.served += 1;
    }

    /// xorshift64*：非加密用途的轻量伪随机数
    pub fn next_random(&mut self) -> u64 {
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

/// 一个 worker 的全部依赖（配置、钩子、处理器注册表、访问日志）。
pub struct Worker {
    ordinal: usize,
    config: Arc<Config>,
    hooks: Arc<ServerHooks>,
    registry: Arc<HandlerRegistry>,
    access_log: AccessLog,
}

impl Worker {
    pub fn new(
        ordinal: usize,
        config: Arc<Config>,
        hooks: Arc<ServerHooks>,
        registry: Arc<HandlerRegistry>,
        access_log: AccessLog,
    ) -> Self {
        Self {
            ordinal,
            config,
            hooks,
            registry,
            access_log,
        }
    }

    /// worker 主循环：取连接 → keep-alive 子循环 → 预算检查。
    pub async fn run(self, queue: ConnectionQueue) -> WorkerExit {
        let mut state = WorkerState::new(self.ordinal);
        let mut caches = WorkerCaches::new(self.config.cache_size());
        debug!(
            "worker {} 启动，随机种子 {:#018x}",
            self.ordinal, state.rng_state
        );

        // 启动钩子在第一个请求之前执行一次
        self.hooks.run_startup(&self.config);

        loop {
            // 互斥只覆盖取连接；guard 在代码块结束时释放
            let conn = {
                let mut receiver = queue.lock().await;
                receiver.recv().await
            };
            let (stream, addr) = match conn {
                Some(pair) => pair,
                None => {
                    debug!("worker {} 检测到队列关闭，退出", self.ordinal);
                    return WorkerExit::QueueClosed;
                }
            };

            self.serve_connection(stream, addr, &mut state, &mut caches)
                .await;

            if state.served() >= self.config.requests_per_worker() {
                info!(
                    "worker {} 请求预算耗尽（{}/{}），退出等待补位",
                    self.ordinal,
                    state.served(),
                    self.config.requests_per_worker()
                );
                return WorkerExit::BudgetExhausted;
            }
        }
    }

    /// keep-alive 子循环：在一条连接上顺序服务多个请求。
    ///
    /// 预算检查只决定"是否允许下一个请求"——当前请求总是服务到完成。
    async fn serve_connection(
        &self,
        mut stream: TcpStream,
        addr: std::net::SocketAddr,
        state: &mut WorkerState,
        caches: &mut WorkerCaches,
    ) {
        let remote = addr.to_string();
        debug!("worker {} 接管连接 {}", self.ordinal, remote);

        loop {
            // 以 worker 序号和已服务计数合成请求追踪 ID
            let id = ((self.ordinal as u128) << 32) | state.served() as u128;

            let mut request =
                match Request::read_from(&mut stream, &remote, self.config.port(), id).await {
                    Ok(Some(request)) => request,
                    Ok(None) => {
                        debug!("[ID{}]连接上不再有请求，关闭", id);
                        break;
                    }
                    Err(e) => {
                        // 协议级错误：尽力回一个 400 后放弃这条连接
                        warn!("[ID{}]解析HTTP请求失败: {}", id, e);
                        let bad_request =
                            "HTTP/1.1 400 Bad Request\r\nContent-Length: 11\r\nConnection: close\r\n\r\nBad Request";
                        let _ = stream.write_all(bad_request.as_bytes()).await;
                        break;
                    }
                };

            // 预算语义：恰好服务 N 个请求。本次计入后若已到预算，
            // 当前请求照常服务，但不再允许 keep-alive 续期。
            state.increment();
            let budget = self.config.requests_per_worker();
            let eligible = state.served() < budget;
            let remaining = budget.saturating_sub(state.served());

            let mut response = Response::init(&request, eligible, remaining);

            self.hooks.run_request_start(&request, &mut response);

            let result = router::dispatch(
                &mut request,
                &mut response,
                &self.hooks,
                &self.registry,
                caches,
                &self.config,
                id,
            );
            self.render_outcome(result, &request, &mut response, id);

            self.hooks.run_request_end(&request, &mut response);

            let sent = match response.flush(&mut stream, self.config.chunk_size()).await {
                Ok(n) => n,
                Err(e) => {
                    warn!("[ID{}]发送响应失败: {}", id, e);
                    break;
                }
            };

            let elapsed = request.started().elapsed().as_millis();
            debug!("[ID{}]请求处理完毕，服务端用时{}ms", id, elapsed);
            info!(
                "[ID{}] {}, {}, {}, {}, {}, {}",
                id,
                request.version(),
                request.path(),
                request.method(),
                response.status_code(),
                response.information(),
                request.user_agent(),
            );
            self.access_log.record(
                &remote,
                &request.method().to_string(),
                request.path(),
                response.status_code(),
                sent,
                elapsed,
                request.user_agent(),
            );

            if !response.keep_alive() {
                debug!("[ID{}]连接不再保持，关闭", id);
                break;
            }
        }
    }

    /// 把分发结果（成功或各类异常）落实为响应内容。
    fn render_outcome(
        &self,
        result: Result<(), Exception>,
        request: &Request,
        response: &mut Response,
        id: u128,
    ) {
        match result {
            Ok(()) => {}
            Err(Exception::FileNotFound) => {
                warn!("[ID{}]请求的路径：{} 不存在，返回404", id, request.path());
                response.error_page(404, Some(r"<h2>噢！</h2><p>你指定的网页无法找到。</p>"));
            }
            Err(Exception::InvalidPath) => {
                warn!(
                    "[ID{}]请求的路径：{} 包含非法字符，返回400",
                    id,
                    request.path()
                );
                response.error_page(400, None);
            }
            Err(Exception::ScriptError {
                path,
                line,
                message,
            }) => {
                error!(
                    "[ID{}]动态内容出错：{} 第{}行：{}",
                    id, path, line, message
                );
                let excerpt = if self.config.debug() {
                    source_excerpt(std::path::Path::new(&path), line)
                } else {
                    None
                };
                response.script_error_page(&path, line, &message, excerpt.as_deref());
            }
            Err(e) => {
                error!("[ID{}]处理请求时发生未知异常: {}", id, e);
                response.error_page(500, Some(r"<h2>噢！</h2><p>服务器出现了一个内部错误。</p>"));
            }
        }
    }
}
