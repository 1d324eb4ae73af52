// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 应用服务器入口
//!
//! 该程序实现了一个单机、单端口的 keep-alive HTTP 应用服务器。
//! 核心功能包括：
//! - 原始字节流级的 HTTP 请求解析（标头、查询串、Cookie、urlencoded
//!   与 multipart 请求体）
//! - 以 mtime 为键的动态内容编译缓存（模板页、内联脚本、转译脚本、样式表）
//! - 有界生命周期的 worker 池：每个 worker 服务固定数量的请求后退休，
//!   由 Supervisor 补位，实现泄漏控制与崩溃自愈
//! - 静态文件服务：条件 GET（304）、内容压缩、大文件流式传输
//! - 嵌入方钩子：启动/停机钩子、请求前后钩子、按 URI 首段注册的 action

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Instant;

use log::{error, info};
use tokio::net::TcpListener;

use appserver::config::Config;
use appserver::handler::HandlerRegistry;
use appserver::hooks::ServerHooks;
use appserver::param::SERVER_NAME;
use appserver::supervisor;

/// # 程序入口点
///
/// 初始化日志系统、加载配置、注册钩子并把控制权移交 Supervisor。
#[tokio::main]
async fn main() {
    // 1. 初始化日志系统：采用 log4rs 异步日志架构，通过外部 YAML 灵活配置级别与输出目的地
    log4rs::init_file("config/log4rs.yaml", Default::default()).unwrap();

    // 2. 环境配置加载：从 TOML 文件读取运行参数
    let config = Config::from_toml("config/development.toml");
    info!("配置文件已载入");
    info!("www root: {}", config.www_root());
    info!(
        "worker池规模: {}，单worker请求预算: {}",
        config.worker_count(),
        config.requests_per_worker()
    );

    // 3. 内容处理器注册表：内置模板页/内联脚本/转译脚本/样式表四类
    let registry = Arc::new(HandlerRegistry::with_defaults());

    // 4. 嵌入方钩子
    let mut hooks = ServerHooks::new();

    // 启动钩子示例：数据库连接参数透传（SQL 客户端由嵌入方提供）
    if config.database().is_some() {
        hooks.on_startup(
            "database",
            Box::new(|config: &Config| {
                let db = config.database().unwrap();
                info!("数据库参数就绪：{}@{}:{}/{}", db.user, db.host, db.port, db.name);
            }),
        );
    }

    // action 钩子示例：/status 返回服务器状态 JSON，绕过文件路由
    let started = Instant::now();
    hooks.register_action(
        "status",
        Box::new(move |_request, response| {
            let status = serde_json::json!({
                "server": SERVER_NAME,
                "pid": std::process::id(),
                "uptime_secs": started.elapsed().as_secs(),
            });
            response.set_content_type("application/json");
            response.write_str(&status.to_string());
            Ok(())
        }),
    );
    let hooks = Arc::new(hooks);

    // 5. 网络层初始化：
    // 支持全地址监听 (0.0.0.0) 或本地回环监听 (127.0.0.1)
    let port: u16 = config.port();
    info!("服务端将在{}端口上监听Socket连接", port);
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}地址上监听Socket连接", address);
    let socket = SocketAddrV4::new(address, port);

    // 绑定端口并启动监听器
    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            panic!("无法绑定端口：{}，错误：{}", port, e);
        }
    };
    info!("端口{}绑定完成", port);

    // 6. 交给 Supervisor：fork worker 池并维持其规模直至停机
    supervisor::run(listener, Arc::new(config), hooks, registry).await;
}
