// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求解析模块
//!
//! 该模块是服务器的核心组件之一，负责把 TCP 流中读取的原始字节码解析为
//! 强类型的 `Request` 结构体。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、查询串、版本）。
//! 2. HTTP 标头（Headers）的提取（键统一小写）。
//! 3. Cookie 与查询参数的 URL 解码。
//! 4. 请求体的解码：`application/x-www-form-urlencoded` 与
//!    `multipart/form-data`（含文件上传），其余类型原样暴露为 `post` 字段。
//!
//! 解析结果中查询参数、Cookie 与请求体字段会按此顺序合并进一张扁平的
//! 数据表（后写入者覆盖先写入者），供动态内容处理器取用。
//!
//! 每个请求都是新构造的 `Request` 实例，连接之间、请求之间不共享任何
//! 可变状态。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use log::{debug, error};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{exception::Exception, param::*, util::url_decode};

/// multipart 文件上传的解码结果。
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub content: Vec<u8>,
}

/// 表示一个完整的 HTTP 请求。
///
/// `resolved_path`/`script_path`/`path_info` 由路由器在分发阶段回填，
/// 解析阶段保持为空。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, POST 等）
    method: HttpRequestMethod,
    /// URL 解码后的资源路径（不含查询串）
    path: String,
    /// 原始查询字符串
    query_string: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 标头表，键已统一小写
    headers: HashMap<String, String>,
    /// 查询参数表
    query: HashMap<String, String>,
    /// Cookie 表
    cookies: HashMap<String, String>,
    /// 查询参数、Cookie、请求体字段合并后的数据表
    data: HashMap<String, String>,
    /// multipart 上传的文件，按字段名索引
    files: HashMap<String, UploadedFile>,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    /// Host 头解析出的主机名
    host: String,
    /// Host 头解析出的端口
    port: u16,
    /// 对端地址
    remote_addr: String,
    /// 路由器解析出的物理路径
    resolved_path: Option<PathBuf>,
    /// 动态内容的脚本路径（与 resolved_path 相同，单独记录便于日志）
    script_path: Option<PathBuf>,
    /// 路径中无法继续解析的尾部（PATH_INFO 语义）
    path_info: Option<String>,
    /// 请求开始处理的时刻，用于耗时统计
    started: Instant,
}

/// 在缓冲区中定位头部结束位置。
///
/// 返回 `(头部字节长度, 请求体起始偏移)`。同时接受 `\r\n\r\n` 与宽松的
/// `\n\n` 作为分隔。
fn find_headers_end(buffer: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    buffer
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, pos + 2))
}

impl Request {
    /// 从字节流中读取并解析一个请求。
    ///
    /// 返回 `Ok(None)` 表示这条 keep-alive 连接上不会再有请求了：
    /// 头部完成之前对端关闭（EOF），或首字节为 NUL。
    pub async fn read_from<R>(
        stream: &mut R,
        remote_addr: &str,
        default_port: u16,
        id: u128,
    ) -> Result<Option<Self>, Exception>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer: Vec<u8> = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        // 1. 攒齐完整头部
        let (head_len, body_start) = loop {
            if let Some(found) = find_headers_end(&buffer) {
                break found;
            }
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| Exception::Io(e.to_string()))?;
            if n == 0 {
                // 头部完成前的 EOF 一律视为"连接上不再有请求"，不是错误
                if !buffer.is_empty() {
                    debug!("[ID{}]头部尚未完整，连接即被关闭", id);
                }
                return Ok(None);
            }
            buffer.extend_from_slice(&chunk[..n]);
            if buffer[0] == 0 {
                // NUL 起始视为连接终止信号，而非报文
                return Ok(None);
            }
        };

        let head = match std::str::from_utf8(&buffer[..head_len]) {
            Ok(s) => s.to_string(),
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求头", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request = Self::from_head(&head, remote_addr, default_port, id)?;

        // 2. 依据 Content-Length 读取请求体
        let content_length: usize = match request.header("content-length") {
            Some(value) => value.trim().parse().map_err(|_| {
                error!("[ID{}]Content-Length不是合法数字：{}", id, value);
                Exception::MalformedRequest
            })?,
            None => 0,
        };

        if content_length > 0 {
            let mut body = buffer[body_start..].to_vec();
            while body.len() < content_length {
                let n = stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| Exception::Io(e.to_string()))?;
                if n == 0 {
                    error!("[ID{}]请求体不完整：期望{}字节，实收{}字节", id, content_length, body.len());
                    return Err(Exception::MalformedRequest);
                }
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(content_length);
            request.parse_body(&body, id);
        }

        debug!(
            "[ID{}]成功解析HTTP请求：{} {}",
            id,
            request.method(),
            request.path()
        );
        Ok(Some(request))
    }

    /// 解析一段已经完整的请求字节（测试与基准测试用）。
    ///
    /// 语义与 [`Request::read_from`] 一致，只是数据源换成内存缓冲。
    pub fn try_from_buffer(
        buffer: &[u8],
        remote_addr: &str,
        default_port: u16,
        id: u128,
    ) -> Result<Option<Self>, Exception> {
        if buffer.is_empty() || buffer[0] == 0 {
            return Ok(None);
        }
        let (head_len, body_start) =
            find_headers_end(buffer).ok_or(Exception::MalformedRequest)?;
        let head = std::str::from_utf8(&buffer[..head_len])
            .map_err(|_| Exception::RequestIsNotUtf8)?;
        let mut request = Self::from_head(head, remote_addr, default_port, id)?;

        let content_length: usize = match request.header("content-length") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| Exception::MalformedRequest)?,
            None => 0,
        };
        if content_length > 0 {
            let body = &buffer[body_start..];
            if body.len() < content_length {
                return Err(Exception::MalformedRequest);
            }
            let body = &body[..content_length];
            request.parse_body(body, id);
        }
        Ok(Some(request))
    }

    /// 解析请求行与标头。
    fn from_head(
        head: &str,
        remote_addr: &str,
        default_port: u16,
        id: u128,
    ) -> Result<Self, Exception> {
        let mut lines = head.split('\n').map(|line| line.trim_end_matches('\r'));

        // 1. 请求行 (e.g., "GET /index.tpl?id=1 HTTP/1.1")
        let request_line = lines.next().unwrap_or("");
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::MalformedRequest);
        }

        let method_str = parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "POST" => HttpRequestMethod::Post,
            "OPTIONS" => HttpRequestMethod::Options,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version = match parts[2].to_uppercase().as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            other => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, other);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 2. URI 在 '?' 处切分为路径与查询串
        let uri = parts[1];
        let (raw_path, query_string) = match uri.split_once('?') {
            Some((p, q)) => (p, q.to_string()),
            None => (uri, String::new()),
        };
        // 路径本身也可能百分号编码；解码失败时保留原文
        let path = url_decode(raw_path).unwrap_or_else(|| raw_path.to_string());

        // 3. 标头：键小写、值去除前导空白，重复键后者覆盖前者
        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.insert(name.trim().to_lowercase(), value.trim_start().to_string());
                }
                None => {
                    error!("[ID{}]无法解析的标头行：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            }
        }

        // 4. Host 头派生主机名与端口
        let (host, port) = match headers.get("host") {
            Some(value) => match value.rsplit_once(':') {
                Some((h, p)) => (
                    h.to_string(),
                    p.parse::<u16>().unwrap_or(default_port),
                ),
                None => (value.to_string(), default_port),
            },
            None => ("localhost".to_string(), default_port),
        };

        // 5. 查询参数与 Cookie，解码失败的键值对直接丢弃
        let query = parse_urlencoded(&query_string);
        let cookies = match headers.get("cookie") {
            Some(value) => parse_cookies(value),
            None => HashMap::new(),
        };

        // 6. Accept-Encoding
        let mut accept_encoding = vec![];
        if let Some(value) = headers.get("accept-encoding") {
            if value.contains("gzip") {
                accept_encoding.push(HttpEncoding::Gzip);
            }
            if value.contains("deflate") {
                accept_encoding.push(HttpEncoding::Deflate);
            }
            if value.contains("br") {
                accept_encoding.push(HttpEncoding::Br);
            }
        }

        // 7. 合并数据表：查询参数 → Cookie（请求体字段在 parse_body 中追加）
        let mut data = HashMap::new();
        for (k, v) in &query {
            data.insert(k.clone(), v.clone());
        }
        for (k, v) in &cookies {
            data.insert(k.clone(), v.clone());
        }

        Ok(Self {
            method,
            path,
            query_string,
            version,
            headers,
            query,
            cookies,
            data,
            files: HashMap::new(),
            accept_encoding,
            host,
            port,
            remote_addr: remote_addr.to_string(),
            resolved_path: None,
            script_path: None,
            path_info: None,
            started: Instant::now(),
        })
    }

    /// 按 Content-Type 解码请求体，并把字段并入数据表。
    fn parse_body(&mut self, body: &[u8], id: u128) {
        let content_type = self
            .header("content-type")
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("multipart/form-data") {
            match extract_boundary(&content_type) {
                Some(boundary) => {
                    let (fields, files) = parse_multipart(body, &boundary);
                    debug!(
                        "[ID{}]multipart解码完成：{}个字段，{}个文件",
                        id,
                        fields.len(),
                        files.len()
                    );
                    for (k, v) in fields {
                        self.data.insert(k, v);
                    }
                    self.files = files;
                }
                None => {
                    error!("[ID{}]multipart请求缺少boundary，按原始内容处理", id);
                    self.data.insert(
                        "post".to_string(),
                        String::from_utf8_lossy(body).to_string(),
                    );
                }
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let text = String::from_utf8_lossy(body);
            for (k, v) in parse_urlencoded(&text) {
                self.data.insert(k, v);
            }
        } else if !body.is_empty() {
            // 其他类型不做结构化解析，原文暴露为单一 post 字段
            self.data.insert(
                "post".to_string(),
                String::from_utf8_lossy(body).to_string(),
            );
        }
    }

    /// 客户端是否希望保持连接。HTTP/1.1 缺省保持，显式 `close` 例外。
    pub fn keep_alive_requested(&self) -> bool {
        match self.header("connection") {
            Some(value) => !value.eq_ignore_ascii_case("close"),
            None => true,
        }
    }
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 按小写名取标头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    pub fn files(&self) -> &HashMap<String, UploadedFile> {
        &self.files
    }

    pub fn accept_encoding(&self) -> &Vec<HttpEncoding> {
        &self.accept_encoding
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn resolved_path(&self) -> Option<&PathBuf> {
        self.resolved_path.as_ref()
    }

    pub fn set_resolved_path(&mut self, path: PathBuf) {
        self.resolved_path = Some(path);
    }

    pub fn script_path(&self) -> Option<&PathBuf> {
        self.script_path.as_ref()
    }

    pub fn set_script_path(&mut self, path: PathBuf) {
        self.script_path = Some(path);
    }

    pub fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    pub fn set_path_info(&mut self, info: String) {
        self.path_info = Some(info);
    }

    pub fn started(&self) -> Instant {
        self.started
    }
}

/// 解码 `&` 连接的 `key=value` 序列。无法解码的键值对被静默丢弃。
fn parse_urlencoded(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        match (url_decode(key), url_decode(value)) {
            (Some(k), Some(v)) if !k.is_empty() => {
                map.insert(k, v);
            }
            _ => {
                debug!("丢弃无法解码的键值对：{}", pair);
            }
        }
    }
    map
}

/// 解析 `Cookie` 头：`name=value; name2=value2`。
fn parse_cookies(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in text.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((name, value)) = pair.split_once('=') {
            match (url_decode(name.trim()), url_decode(value.trim())) {
                (Some(n), Some(v)) if !n.is_empty() => {
                    map.insert(n, v);
                }
                _ => {}
            }
        }
    }
    map
}

/// 从 Content-Type 中提取 multipart 的 boundary 标记。
fn extract_boundary(content_type: &str) -> Option<String> {
    let boundary = content_type.split("boundary=").nth(1)?;
    let boundary = boundary.split(';').next().unwrap_or(boundary).trim();
    let boundary = boundary.trim_matches('"');
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

/// 切分 multipart 请求体。
///
/// 带 `filename` 的 content-disposition（即三段式）作为文件上传处理，
/// 其余部分作为标量字段。
fn parse_multipart(
    body: &[u8],
    boundary: &str,
) -> (HashMap<String, String>, HashMap<String, UploadedFile>) {
    let mut fields = HashMap::new();
    let mut files = HashMap::new();

    let delimiter = format!("--{}", boundary).into_bytes();
    let positions = find_all(body, &delimiter);

    for window in positions.windows(2) {
        let start = window[0] + delimiter.len();
        let end = window[1];
        if start >= end {
            continue;
        }
        let part = trim_crlf(&body[start..end]);
        if part.is_empty() || part == b"--" {
            continue;
        }
        if let Some((name, upload)) = parse_part(part) {
            match upload {
                PartBody::File(file) => {
                    files.insert(name, file);
                }
                PartBody::Field(value) => {
                    fields.insert(name, value);
                }
            }
        }
    }
    (fields, files)
}

enum PartBody {
    Field(String),
    File(UploadedFile),
}

/// 解析单个 multipart part：头部（disposition、content-type）与内容。
fn parse_part(part: &[u8]) -> Option<(String, PartBody)> {
    let (head_len, body_start) = find_headers_end(part)?;
    let head = std::str::from_utf8(&part[..head_len]).ok()?;
    let content = trim_crlf(&part[body_start..]);

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in head.split('\n').map(|l| l.trim_end_matches('\r')) {
        let lower = line.to_lowercase();
        if lower.starts_with("content-disposition:") {
            for segment in line.split(';') {
                let segment = segment.trim();
                if let Some(value) = segment.strip_prefix("name=") {
                    name = Some(value.trim_matches('"').to_string());
                } else if let Some(value) = segment.strip_prefix("filename=") {
                    filename = Some(value.trim_matches('"').to_string());
                }
            }
        } else if lower.starts_with("content-type:") {
            content_type = line.split_once(':').map(|(_, v)| v.trim().to_string());
        }
    }

    let name = name?;
    match filename {
        Some(filename) => Some((
            name,
            PartBody::File(UploadedFile {
                filename,
                content_type: content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size: content.len(),
                content: content.to_vec(),
            }),
        )),
        None => Some((
            name,
            PartBody::Field(String::from_utf8_lossy(content).to_string()),
        )),
    }
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    if needle.is_empty() || haystack.len() < needle.len() {
        return positions;
    }
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            positions.push(i);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    positions
}

fn trim_crlf(mut bytes: &[u8]) -> &[u8] {
    while bytes.starts_with(b"\r\n") || bytes.starts_with(b"\n") {
        bytes = if bytes.starts_with(b"\r\n") {
            &bytes[2..]
        } else {
            &bytes[1..]
        };
    }
    while bytes.ends_with(b"\r\n") || bytes.ends_with(b"\n") {
        bytes = if bytes.ends_with(b"\r\n") {
            &bytes[..bytes.len() - 2]
        } else {
            &bytes[..bytes.len() - 1]
        };
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Request {
        Request::try_from_buffer(raw.as_bytes(), "127.0.0.1:50000", 7878, 0)
            .unwrap()
            .unwrap()
    }

    /// 验证常规 GET 请求的解析，包括 Path 和 Headers
    #[test]
    fn test_parse_get_request() {
        let request = parse(
            "GET / HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test-Browser\r\nAccept-Encoding: gzip, deflate, br\r\n\r\n",
        );

        assert_eq!(request.method(), HttpRequestMethod::Get);
        assert_eq!(request.path(), "/");
        assert_eq!(request.user_agent(), "Test-Browser");
        assert!(request.accept_encoding().contains(&HttpEncoding::Gzip));
        assert!(request.accept_encoding().contains(&HttpEncoding::Deflate));
        assert!(request.accept_encoding().contains(&HttpEncoding::Br));
        assert_eq!(request.host(), "localhost");
        assert_eq!(request.port(), 7878);
    }

    /// 验证查询串解码及其进入数据表
    #[test]
    fn test_parse_query_string() {
        let request = parse("GET /page?id=123&name=two%20words&flag HTTP/1.1\r\nHost: x\r\n\r\n");

        assert_eq!(request.path(), "/page");
        assert_eq!(request.query_string(), "id=123&name=two%20words&flag");
        assert_eq!(request.query().get("id").unwrap(), "123");
        assert_eq!(request.query().get("name").unwrap(), "two words");
        assert_eq!(request.query().get("flag").unwrap(), "");
        assert_eq!(request.data().get("id").unwrap(), "123");
    }

    /// 无法解码的查询键值对被丢弃，而不是使请求失败
    #[test]
    fn test_query_decode_failure_drops_pair() {
        let request = parse("GET /p?good=1&bad=%zz HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(request.query().get("good").unwrap(), "1");
        assert!(request.query().get("bad").is_none());
    }

    /// 验证 Cookie 解析与 URL 解码
    #[test]
    fn test_parse_cookies() {
        let request = parse(
            "GET / HTTP/1.1\r\nHost: x\r\nCookie: session=abc123; user=%E5%BC%A0%E4%B8%89\r\n\r\n",
        );
        assert_eq!(request.cookies().get("session").unwrap(), "abc123");
        assert_eq!(request.cookies().get("user").unwrap(), "张三");
        // Cookie 同样进入合并数据表
        assert_eq!(request.data().get("session").unwrap(), "abc123");
    }

    /// 验证 urlencoded 请求体解码（规格中的样例）
    #[test]
    fn test_parse_urlencoded_body() {
        let body = "a=1&b=two%20words";
        let raw = format!(
            "POST /submit HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let request = parse(&raw);
        assert_eq!(request.data().get("a").unwrap(), "1");
        assert_eq!(request.data().get("b").unwrap(), "two words");
    }

    /// 数据表的覆盖顺序：查询参数 < Cookie < 请求体
    #[test]
    fn test_data_map_merge_order() {
        let body = "key=from_body";
        let raw = format!(
            "POST /p?key=from_query HTTP/1.1\r\nHost: x\r\nCookie: key=from_cookie\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let request = parse(&raw);
        assert_eq!(request.data().get("key").unwrap(), "from_body");
        // 各自的专用表不受合并影响
        assert_eq!(request.query().get("key").unwrap(), "from_query");
        assert_eq!(request.cookies().get("key").unwrap(), "from_cookie");
    }

    /// 未知 Content-Type 的请求体整体暴露为 post 字段
    #[test]
    fn test_raw_body_exposed_as_post() {
        let body = "{\"k\":1}";
        let raw = format!(
            "POST /p HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let request = parse(&raw);
        assert_eq!(request.data().get("post").unwrap(), body);
    }

    /// multipart：标量字段 + 文件上传（规格中的样例）
    #[test]
    fn test_parse_multipart_body() {
        let body = "--XBOUND\r\n\
            Content-Disposition: form-data; name=\"name\"\r\n\
            \r\n\
            value\r\n\
            --XBOUND\r\n\
            Content-Disposition: form-data; name=\"upload\"; filename=\"note.txt\"\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            file body\r\n\
            --XBOUND--\r\n";
        let raw = format!(
            "POST /upload HTTP/1.1\r\nHost: x\r\nContent-Type: multipart/form-data; boundary=XBOUND\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let request = parse(&raw);

        assert_eq!(request.data().get("name").unwrap(), "value");
        let file = request.files().get("upload").unwrap();
        assert_eq!(file.filename, "note.txt");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(file.content, b"file body");
        assert_eq!(file.size, 9);
    }

    /// 验证带引号的 boundary
    #[test]
    fn test_extract_boundary() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=abc").unwrap(),
            "abc"
        );
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=\"abc\"").unwrap(),
            "abc"
        );
        assert!(extract_boundary("multipart/form-data").is_none());
    }

    /// 确保不支持的 HTTP 方法（如 DELETE）会返回错误
    #[test]
    fn test_unsupported_method() {
        let result = Request::try_from_buffer(
            b"DELETE /resource HTTP/1.1\r\nHost: x\r\n\r\n",
            "127.0.0.1:1",
            7878,
            0,
        );
        match result.unwrap_err() {
            Exception::UnSupportedRequestMethod => {}
            _ => panic!("Expected UnSupportedRequestMethod error"),
        }
    }

    /// 确保不支持的版本（如 HTTP/2.0）被正确拒绝
    #[test]
    fn test_unsupported_http_version() {
        let result = Request::try_from_buffer(
            b"GET / HTTP/2.0\r\nHost: x\r\n\r\n",
            "127.0.0.1:1",
            7878,
            0,
        );
        match result.unwrap_err() {
            Exception::UnsupportedHttpVersion => {}
            _ => panic!("Expected UnsupportedHttpVersion error"),
        }
    }

    /// NUL 起始字节意味着连接上不会再有请求
    #[test]
    fn test_nul_byte_means_no_request() {
        let result = Request::try_from_buffer(&[0u8, 1, 2], "127.0.0.1:1", 7878, 0).unwrap();
        assert!(result.is_none());
        let result = Request::try_from_buffer(&[], "127.0.0.1:1", 7878, 0).unwrap();
        assert!(result.is_none());
    }

    /// 验证 Header 字段名大小写不敏感、值保留原样
    #[test]
    fn test_case_insensitive_headers() {
        let request =
            parse("GET / HTTP/1.1\r\nhost: localhost:7878\r\nUSER-AGENT: Test\r\n\r\n");
        assert_eq!(request.user_agent(), "Test");
        assert_eq!(request.header("host").unwrap(), "localhost:7878");
    }

    /// 宽松分隔：接受缺少 CR 的 `\n\n` 头部结束符
    #[test]
    fn test_bare_lf_header_terminator() {
        let request = parse("GET /x HTTP/1.1\nHost: y\n\n");
        assert_eq!(request.path(), "/x");
        assert_eq!(request.host(), "y");
    }

    /// 缺失 Host 头时回退到 localhost 与配置端口
    #[test]
    fn test_missing_host_defaults() {
        let request = parse("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(request.host(), "localhost");
        assert_eq!(request.port(), 7878);
    }

    /// 验证 keep-alive 判定：HTTP/1.1 缺省保持，close 显式关闭
    #[test]
    fn test_keep_alive_requested() {
        let request = parse("GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(request.keep_alive_requested());

        let request = parse("GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
        assert!(!request.keep_alive_requested());

        let request = parse("GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n");
        assert!(request.keep_alive_requested());
    }

    /// 请求方法的小写兼容性处理
    #[test]
    fn test_lowercase_method() {
        let request = parse("get / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(request.method(), HttpRequestMethod::Get);
    }

    /// 路径中的百分号编码在解析阶段还原
    #[test]
    fn test_percent_encoded_path() {
        let request = parse("GET /docs/hello%20world.txt HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(request.path(), "/docs/hello world.txt");
    }

    /// 异步读取路径与缓冲解析结果一致
    #[tokio::test]
    async fn test_read_from_stream() {
        let raw = b"GET /async HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut stream = &raw[..];
        let request = Request::read_from(&mut stream, "127.0.0.1:9", 7878, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.path(), "/async");
    }

    /// 对端在发送任何字节前关闭连接：干净的"无请求"
    #[tokio::test]
    async fn test_read_from_clean_eof() {
        let raw: &[u8] = b"";
        let mut stream = raw;
        let request = Request::read_from(&mut stream, "127.0.0.1:9", 7878, 1)
            .await
            .unwrap();
        assert!(request.is_none());
    }

    /// 头部读到一半 EOF：同样按"无请求"处理，而不是报错
    #[tokio::test]
    async fn test_read_from_truncated_head() {
        let raw: &[u8] = b"GET / HTTP/1.1\r\nHost";
        let mut stream = raw;
        let result = Request::read_from(&mut stream, "127.0.0.1:9", 7878, 1)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
