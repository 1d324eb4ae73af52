// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Supervisor 模块
//!
//! 服务器的顶层生命周期管理：
//! 1. 持有唯一的监听 Socket，由单一 acceptor 任务调用 `accept()` 并把
//!    连接推入有界队列——天然不存在惊群，也不可能有两个 worker 拿到
//!    同一条连接。
//! 2. 启动访问日志落盘的辅助任务。
//! 3. 启动固定数量的 worker，并在 worker 退出（预算耗尽或 panic）时
//!    立即原位补充，池的规模在服务器整个生命周期内保持不变。
//! 4. 收到停机信号后关闭队列，等 worker 排空退出，执行停机钩子。
//!
//! worker 崩溃不是事故而是设计的一部分：worker 不持有任何必须存活的
//! 状态，补位即恢复。

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::accesslog::AccessLog;
use crate::config::Config;
use crate::handler::HandlerRegistry;
use crate::hooks::ServerHooks;
use crate::worker::{ConnectionQueue, Worker, WorkerExit};

/// 运行服务器直至收到停机信号且所有 worker 退出。
pub async fn run(
    listener: TcpListener,
    config: Arc<Config>,
    hooks: Arc<ServerHooks>,
    registry: Arc<HandlerRegistry>,
) {
    let access_log = AccessLog::new(config.access_log());
    let flusher = access_log.spawn_flusher(config.flush_interval_secs());

    // 有界连接队列：容量与池规模挂钩，积压过深时 accept 自然背压
    let (tx, rx) = mpsc::channel(config.worker_count().max(1) * 4);
    let queue: ConnectionQueue = Arc::new(Mutex::new(rx));

    // acceptor：唯一调用 accept() 的任务
    let acceptor = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!("新的连接：{}", addr);
                        let _ = stream.set_nodelay(true);
                        if tx.send((stream, addr)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("accept失败: {}", e);
                    }
                },
                _ = shutdown_signal() => {
                    info!("收到停机信号，停止接收新连接");
                    break;
                }
            }
        }
        // tx 随任务结束被丢弃，队列关闭，worker 排空后退出
    });

    // 启动 worker 池
    let mut join_set: JoinSet<(usize, WorkerExit)> = JoinSet::new();
    let mut ordinals: HashMap<tokio::task::Id, usize> = HashMap::new();
    for ordinal in 0..config.worker_count() {
        spawn_worker(
            &mut join_set,
            &mut ordinals,
            ordinal,
            &config,
            &hooks,
            &registry,
            &access_log,
            &queue,
        );
    }
    info!("worker池已就绪，规模：{}", config.worker_count());

    // 监督循环：任何一个 worker 退出都立即检视原因
    while let Some(result) = join_set.join_next_with_id().await {
        match result {
            Ok((task_id, (ordinal, WorkerExit::BudgetExhausted))) => {
                ordinals.remove(&task_id);
                info!("worker {} 退休，补充新worker", ordinal);
                spawn_worker(
                    &mut join_set,
                    &mut ordinals,
                    ordinal,
                    &config,
                    &hooks,
                    &registry,
                    &access_log,
                    &queue,
                );
            }
            Ok((task_id, (ordinal, WorkerExit::QueueClosed))) => {
                ordinals.remove(&task_id);
                debug!("worker {} 随停机排空退出", ordinal);
            }
            Err(join_error) => {
                // worker panic：crash-only 设计，直接补位
                let ordinal = ordinals.remove(&join_error.id());
                error!(
                    "worker {:?} 异常退出: {}，补充新worker",
                    ordinal, join_error
                );
                if let Some(ordinal) = ordinal {
                    spawn_worker(
                        &mut join_set,
                        &mut ordinals,
                        ordinal,
                        &config,
                        &hooks,
                        &registry,
                        &access_log,
                        &queue,
                    );
                }
            }
        }
    }

    let _ = acceptor.await;
    hooks.run_shutdown();
    flusher.abort();
    if let Err(e) = access_log.flush() {
        error!("停机时落盘访问日志失败: {}", e);
    }
    info!("服务器已停机");
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    join_set: &mut JoinSet<(usize, WorkerExit)>,
    ordinals: &mut HashMap<tokio::task::Id, usize>,
    ordinal: usize,
    config: &Arc<Config>,
    hooks: &Arc<ServerHooks>,
    registry: &Arc<HandlerRegistry>,
    access_log: &AccessLog,
    queue: &ConnectionQueue,
) {
    let worker = Worker::new(
        ordinal,
        Arc::clone(config),
        Arc::clone(hooks),
        Arc::clone(registry),
        access_log.clone(),
    );
    let queue = Arc::clone(queue);
    let handle = join_set.spawn(async move { (ordinal, worker.run(queue).await) });
    ordinals.insert(handle.id(), ordinal);
}

/// 等待 Ctrl-C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("无法安装Ctrl-C处理器: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("无法安装SIGTERM处理器: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
