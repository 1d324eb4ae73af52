// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 进程内端到端测试
//!
//! 在随机端口上把完整的服务器（Supervisor + worker池 + 路由 + 缓存）
//! 拉起来，用真实的 TCP 连接验证协议行为：keep-alive 预算、304、
//! 动态内容、错误页面以及 worker 崩溃自愈。

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use appserver::config::Config;
use appserver::handler::HandlerRegistry;
use appserver::hooks::ServerHooks;
use appserver::supervisor;

struct TestServer {
    addr: std::net::SocketAddr,
    // 文档根随 TestServer 一起存活
    _dir: tempfile::TempDir,
}

/// 在随机端口启动一台完整的服务器
async fn start_server(worker_count: usize, requests_per_worker: u32) -> TestServer {
    start_server_with_hooks(worker_count, requests_per_worker, ServerHooks::new()).await
}

async fn start_server_with_hooks(
    worker_count: usize,
    requests_per_worker: u32,
    hooks: ServerHooks,
) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(root.join("index.html"), "<p>home</p>").unwrap();
    std::fs::write(root.join("note.txt"), "note body").unwrap();
    std::fs::write(root.join("page.tpl"), "hi {{ name }}").unwrap();
    std::fs::write(root.join("echo.jss"), "echo $a + \",\" + $b").unwrap();

    let toml_str = format!(
        r#"
        www_root = "{root}"
        port = 7878
        worker_count = {workers}
        requests_per_worker = {budget}
        cache_size = 8
        local = true
        index_files = ["index.html"]
        access_log = "{root}/access.log"
        flush_interval_secs = 1
        "#,
        root = root.display(),
        workers = worker_count,
        budget = requests_per_worker,
    );
    let config: Config = toml::from_str(&toml_str).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(supervisor::run(
        listener,
        Arc::new(config),
        Arc::new(hooks),
        Arc::new(HandlerRegistry::with_defaults()),
    ));

    TestServer { addr, _dir: dir }
}

/// 读取一个完整响应。连接被对端关闭时返回 None。
async fn read_response(stream: &mut TcpStream) -> Option<(u16, String, Vec<u8>)> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    let body_start = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..body_start]).to_string();
    let status: u16 = head
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;
    let content_length: usize = head
        .lines()
        .find(|line| line.to_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split_once(':'))
        .and_then(|(_, value)| value.trim().parse().ok())?;

    let mut body = buffer[body_start..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    Some((status, head, body))
}

async fn send(stream: &mut TcpStream, raw: &str) {
    stream.write_all(raw.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn test_static_file_roundtrip() {
    let server = start_server(1, 100).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert!(head.contains("Server: shaneyale-appserver"));
    assert!(head.contains("Content-Type: text/plain"));
    assert_eq!(body, b"note body");
}

#[tokio::test]
async fn test_directory_index_and_redirect() {
    let server = start_server(1, 100).await;
    std::fs::create_dir(server._dir.path().join("docs")).unwrap();
    std::fs::write(server._dir.path().join("docs/index.html"), "<p>docs</p>").unwrap();
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    // 根路径带斜杠：直接服务 index.html
    send(&mut stream, "GET / HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, _head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, b"<p>home</p>");

    // 目录缺结尾斜杠：302 重定向补上
    send(&mut stream, "GET /docs HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, head, _body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 302);
    assert!(head.contains("Location: http://t:7878/docs/"));

    // 带斜杠：服务目录索引
    send(&mut stream, "GET /docs/ HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, _head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, b"<p>docs</p>");
}

#[tokio::test]
async fn test_template_rendered_with_query() {
    let server = start_server(1, 100).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    send(
        &mut stream,
        "GET /page.tpl?name=world HTTP/1.1\r\nHost: t\r\n\r\n",
    )
    .await;
    let (status, head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert!(head.contains("Content-Type: text/html"));
    assert_eq!(body, b"hi world");
}

#[tokio::test]
async fn test_post_urlencoded_to_script() {
    let server = start_server(1, 100).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let body = "a=1&b=two%20words";
    let raw = format!(
        "POST /echo.jss HTTP/1.1\r\nHost: t\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    send(&mut stream, &raw).await;
    let (status, _head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, b"1,two words");
}

#[tokio::test]
async fn test_404_page() {
    let server = start_server(1, 100).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    send(&mut stream, "GET /missing.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, _head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 404);
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("404"));
}

#[tokio::test]
async fn test_conditional_get_304() {
    let server = start_server(1, 100).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    // 先取一次，记下 Last-Modified
    send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (_status, head, _body) = read_response(&mut stream).await.unwrap();
    let last_modified = head
        .lines()
        .find(|l| l.starts_with("Last-Modified:"))
        .and_then(|l| l.split_once(": "))
        .map(|(_, v)| v.to_string())
        .unwrap();

    // 带 If-Modified-Since 再取：304 且无响应体
    let raw = format!(
        "GET /note.txt HTTP/1.1\r\nHost: t\r\nIf-Modified-Since: {}\r\n\r\n",
        last_modified
    );
    send(&mut stream, &raw).await;
    let (status, _head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 304);
    assert!(body.is_empty());
}

/// 规格属性：worker 预算恰好限制请求数；到达预算的那个请求被标记
/// 为非 keep-alive，连接随后关闭，而不是半途拒绝服务。
#[tokio::test]
async fn test_worker_budget_closes_connection() {
    let server = start_server(1, 2).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    // 第 1 个请求：还有预算，Keep-Alive 且 max=1
    send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, head, _body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert!(head.contains("Connection: Keep-Alive"));
    assert!(head.contains("Keep-Alive: timeout=5, max=1"));

    // 第 2 个请求：到达预算，正常服务但声明关闭
    send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, b"note body");
    assert!(head.contains("Connection: close"));

    // 第 3 个请求不会再被服务：连接已关闭
    send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    assert!(read_response(&mut stream).await.is_none());

    // 池自愈：补位的 worker 继续服务新连接
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, _head, _body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_keep_alive_serves_sequential_requests() {
    let server = start_server(1, 100).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    for _ in 0..3 {
        send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
        let (status, head, body) = read_response(&mut stream).await.unwrap();
        assert_eq!(status, 200);
        assert!(head.contains("Connection: Keep-Alive"));
        assert_eq!(body, b"note body");
    }
}

#[tokio::test]
async fn test_connection_close_honored() {
    let server = start_server(1, 100).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    send(
        &mut stream,
        "GET /note.txt HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (status, head, _body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert!(head.contains("Connection: close"));
    // 对端应关闭连接
    send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    assert!(read_response(&mut stream).await.is_none());
}

/// 多个 worker 并行服务不同连接
#[tokio::test]
async fn test_concurrent_connections() {
    let server = start_server(4, 100).await;
    let mut handles = Vec::new();
    for _ in 0..8 {
        let addr = server.addr;
        handles.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
            let (status, _head, body) = read_response(&mut stream).await.unwrap();
            (status, body)
        }));
    }
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, b"note body");
    }
}

/// crash-only 设计：处理请求时 panic 的 worker 被 Supervisor 原位补充，
/// 后续连接照常服务。
#[tokio::test]
async fn test_worker_panic_is_replaced() {
    let mut hooks = ServerHooks::new();
    hooks.register_action(
        "boom",
        Box::new(|_request, _response| panic!("人为制造的worker崩溃")),
    );
    let server = start_server_with_hooks(1, 100, hooks).await;

    // 触发崩溃：该连接得不到响应
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    send(&mut stream, "GET /boom HTTP/1.1\r\nHost: t\r\n\r\n").await;
    assert!(read_response(&mut stream).await.is_none());

    // 补位后的 worker 继续服务
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, _head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, b"note body");
}

/// action 钩子完全绕过文件路由
#[tokio::test]
async fn test_action_hook_end_to_end() {
    let mut hooks = ServerHooks::new();
    hooks.register_action(
        "ping",
        Box::new(|_request, response| {
            response.set_content_type("text/plain");
            response.write_str("pong");
            Ok(())
        }),
    );
    let server = start_server_with_hooks(1, 100, hooks).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    send(&mut stream, "GET /ping HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, _head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, b"pong");
}

/// 脚本出错时返回 500 错误页，且连接仍可用
#[tokio::test]
async fn test_script_error_returns_500() {
    let server = start_server(1, 100).await;
    std::fs::write(server._dir.path().join("bad.jss"), "echo undefined_var").unwrap();

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    send(&mut stream, "GET /bad.jss HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, head, _body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 500);
    assert!(head.contains("Connection: Keep-Alive"));

    // 同一连接上的下一个请求不受影响
    send(&mut stream, "GET /note.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (status, _head, body) = read_response(&mut stream).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, b"note body");
}
