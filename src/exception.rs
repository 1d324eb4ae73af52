// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器在请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖了协议解析错误、文件系统错误以及动态内容（脚本/模板）
//!   编译与执行错误。
//! - **语义映射**：每个变体都对应了特定的业务逻辑，便于上层模块将其转化为
//!   对应的 HTTP 响应状态码。
//! - **控制流分离**：处理器提前结束响应不走异常路径——成功完成统一以
//!   `Ok(())` 返回，`Exception` 只表示真正的失败。

use std::fmt;

/// 服务器处理请求过程中发生的异常类型。
///
/// 该枚举通常作为 `Result` 的 `Err` 部分返回，用于指示处理失败的具体原因。
#[derive(Debug, Clone)]
pub enum Exception {
    /// 客户端发送的请求头字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 客户端使用了服务器暂不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本（例如：HTTP/0.9 或过高的版本）。
    UnsupportedHttpVersion,
    /// 请求行或头部格式无法解析。对应 `400 Bad Request`。
    MalformedRequest,
    /// 在文档根目录下未找到所请求的文件。在 Web 语义中对应 `404 Not Found`。
    FileNotFound,
    /// 请求的路径格式非法或包含越权尝试（如目录遍历攻击）。对应 `400 Bad Request`。
    InvalidPath,
    /// 动态内容源文件编译或执行失败。对应 `500 Internal Server Error`。
    ///
    /// `line` 为源文件中出错的行号（从 1 开始），用于错误页面的代码摘录。
    ScriptError {
        path: String,
        line: usize,
        message: String,
    },
    /// 底层 I/O 操作失败（读文件、读写 Socket 等）。
    Io(String),
}

use Exception::*;

/// 为 `Exception` 实现 `Display` 特性，使其支持字符串格式化输出。
///
/// 这些描述信息常用于系统日志（Logging）以及调试模式下的错误响应体。
impl fmt::Display for Exception {
    /// 根据错误类型写入人类可读的描述文本。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            MalformedRequest => write!(f, "Malformed request (400)"),
            FileNotFound => write!(f, "File not found (404)"),
            InvalidPath => write!(f, "Invalid path (400)"),
            ScriptError {
                path,
                line,
                message,
            } => {
                write!(f, "Script error in {} at line {}: {}", path, line, message)
            }
            Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl From<std::io::Error> for Exception {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Exception::FileNotFound,
            _ => Exception::Io(e.to_string()),
        }
    }
}
