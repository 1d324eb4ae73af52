use crate::{
    exception::Exception,
    param::*,
    request::Request,
    util::{url_encode, HtmlBuilder},
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// 一条响应 Cookie。值在序列化时做 URL 编码。
#[derive(Debug, Clone, Default)]
pub struct Cookie {
    pub value: String,
    pub expires: Option<SystemTime>,
    pub path: Option<String>,
    pub domain: Option<String>,
}

impl Cookie {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }
}

/// 响应体的来源：内部缓冲区，或绕过缓冲直接发送的文件。
#[derive(Debug, Clone, PartialEq)]
enum Body {
    Buffer,
    File { path: PathBuf, length: u64 },
}

/// HTTP 响应构建器。
///
/// 所有 `write` 调用都只追加到内部缓冲区，不直接触碰 Socket，因此
/// Content-Type 与 Content-Length 可以在发送前的任意时刻修改。
/// 头部块由 `headers_sent` 标志保证每个请求最多序列化一次。
#[derive(Debug)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    /// 自定义标头，`Server` 默认在位；同名设置是替换语义
    headers: Vec<(String, String)>,
    cookies: Vec<(String, Cookie)>,
    content_type: String,
    content_encoding: Option<HttpEncoding>,
    /// 请求声明的 Accept-Encoding，flush 时据此协商压缩
    accept_encoding: Vec<HttpEncoding>,
    /// 处理器可将某类内容（已压缩的媒体等）标记为不可压缩
    compressible: bool,
    buffer: Vec<u8>,
    body: Body,
    headers_sent: bool,
    keep_alive: bool,
    /// Keep-Alive 提示头中的 max 值（剩余请求预算）
    keep_alive_max: u32,
    head_only: bool,
}

impl Response {
    /// 初始化一个新请求的响应。
    ///
    /// keep-alive 由客户端意愿与调用方资格（worker 剩余预算）合取决定；
    /// 授予时发送 `Connection: Keep-Alive` 与剩余预算提示头。
    pub fn init(request: &Request, keep_alive_eligible: bool, remaining_budget: u32) -> Self {
        let keep_alive = request.keep_alive_requested() && keep_alive_eligible;
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            headers: vec![("Server".to_string(), SERVER_NAME.to_string())],
            cookies: Vec::new(),
            content_type: "text/html;charset=utf-8".to_string(),
            content_encoding: None,
            accept_encoding: request.accept_encoding().clone(),
            compressible: true,
            buffer: Vec::new(),
            body: Body::Buffer,
            headers_sent: false,
            keep_alive,
            keep_alive_max: remaining_budget,
            head_only: request.method() == HttpRequestMethod::Head,
        }
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&text) => text.to_string(),
            None => {
                // 动态脚本可以设置任意状态码，未知码给出兜底短语而非中止
                warn!("未收录的状态码：{}", code);
                "Unknown".to_string()
            }
        };
        self
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = content_type.to_string();
        self
    }

    /// 禁止对当前响应体做传输压缩
    pub fn disable_compression(&mut self) -> &mut Self {
        self.compressible = false;
        self
    }

    /// 设置标头。同名（大小写不敏感）标头被替换而非追加。
    pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
        for (existing, existing_value) in self.headers.iter_mut() {
            if existing.eq_ignore_ascii_case(name) {
                *existing_value = value.to_string();
                return self;
            }
        }
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn set_cookie(&mut self, name: &str, cookie: Cookie) -> &mut Self {
        for (existing, existing_cookie) in self.cookies.iter_mut() {
            if existing == name {
                *existing_cookie = cookie;
                return self;
            }
        }
        self.cookies.push((name.to_string(), cookie));
        self
    }

    /// 向响应体缓冲区追加字节。若当前响应体是文件则先切回缓冲模式。
    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        if self.body != Body::Buffer {
            self.body = Body::Buffer;
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(bytes);
        self
    }

    pub fn write_str(&mut self, text: &str) -> &mut Self {
        self.write(text.as_bytes())
    }

    pub fn writeln(&mut self, text: &str) -> &mut Self {
        self.write(text.as_bytes());
        self.write(b"\n")
    }

    /// 302 重定向。Location 由请求的 host/port 组合成绝对地址。
    ///
    /// 调用后应立即结束处理器逻辑（以 `Ok(())` 返回）。
    pub fn redirect(&mut self, request: &Request, uri: &str) -> &mut Self {
        let location = format!("http://{}:{}{}", request.host(), request.port(), uri);
        debug!("302重定向至{}", location);
        self.set_code(302);
        self.header("Location", &location);
        self.buffer.clear();
        self.body = Body::Buffer;
        self
    }

    /// 条件 GET：若客户端缓存仍然新鲜则将响应置为 304 并返回 true。
    ///
    /// HTTP 日期只有秒级精度，比较前先把 mtime 截断到秒。
    pub fn check_not_modified(&mut self, request: &Request, mtime: SystemTime) -> bool {
        let since = match request
            .header("if-modified-since")
            .and_then(|value| httpdate::parse_http_date(value).ok())
        {
            Some(t) => t,
            None => return false,
        };
        let mtime_secs = mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let since_secs = since
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if mtime_secs <= since_secs {
            self.set_code(304);
            self.buffer.clear();
            self.body = Body::Buffer;
            true
        } else {
            false
        }
    }

    /// 丢弃已缓冲的内容，改为直接发送文件。
    ///
    /// 自动设置 `Last-Modified`；若 `If-Modified-Since` 判定未修改则
    /// 短路为无响应体的 304。文件流式发送不参与传输压缩。
    pub fn send_file(&mut self, path: &Path, request: &Request) -> Result<(), Exception> {
        let metadata = std::fs::metadata(path)?;
        let mtime = metadata.modified()?;

        if self.check_not_modified(request, mtime) {
            debug!("文件{}未修改，返回304", path.display());
            return Ok(());
        }

        self.header("Last-Modified", &httpdate::fmt_http_date(mtime));
        self.buffer.clear();
        self.compressible = false;
        self.body = Body::File {
            path: path.to_path_buf(),
            length: metadata.len(),
        };
        Ok(())
    }

    /// 渲染一个标准错误页（404/500 等）到响应缓冲区。
    pub fn error_page(&mut self, code: u16, note: Option<&str>) -> &mut Self {
        self.set_code(code);
        self.set_content_type("text/html;charset=utf-8");
        self.buffer.clear();
        self.body = Body::Buffer;
        let html = HtmlBuilder::from_status_code(code, note).build();
        self.write_str(&html);
        self
    }

    /// 渲染动态内容错误的 500 页面。
    ///
    /// debug 模式下附带出错行附近的源码摘录；生产模式只暴露脚本路径。
    pub fn script_error_page(
        &mut self,
        path: &str,
        line: usize,
        message: &str,
        excerpt: Option<&str>,
    ) -> &mut Self {
        self.set_code(500);
        self.set_content_type("text/html;charset=utf-8");
        self.buffer.clear();
        self.body = Body::Buffer;
        let html = HtmlBuilder::from_script_error(path, line, message, excerpt).build();
        self.write_str(&html);
        self
    }

    /// 把响应写入 Socket：先（至多一次）发送头部块，再发送响应体。
    ///
    /// 缓冲体在此刻做压缩协商并确定 Content-Length；文件体按
    /// `chunk_size` 分块流式传输。返回写出的总字节数。
    pub async fn flush<W>(&mut self, stream: &mut W, chunk_size: usize) -> Result<u64, Exception>
    where
        W: AsyncWrite + Unpin,
    {
        let mut sent: u64 = 0;

        if !self.headers_sent {
            // 压缩只对缓冲体生效，且必须发生在头部定稿之前
            if self.body == Body::Buffer
                && self.compressible
                && self.status_code != 304
                && !self.buffer.is_empty()
            {
                if let Some(encoding) = decide_encoding(&self.accept_encoding) {
                    match compress(std::mem::take(&mut self.buffer), Some(encoding)) {
                        Ok(compressed) => {
                            debug!("响应体压缩完成，编码：{}", encoding);
                            self.buffer = compressed;
                            self.content_encoding = Some(encoding);
                        }
                        Err(e) => {
                            // 压缩失败没有恢复手段：缓冲已被取走
                            error!("压缩响应体失败: {}", e);
                            return Err(Exception::Io(e.to_string()));
                        }
                    }
                }
            }

            let header_bytes = self.serialize_headers();
            stream
                .write_all(&header_bytes)
                .await
                .map_err(|e| Exception::Io(e.to_string()))?;
            sent += header_bytes.len() as u64;
            self.headers_sent = true;
        }

        let suppress_body = self.head_only || self.status_code == 304;
        match (&self.body, suppress_body) {
            (_, true) => {}
            (Body::Buffer, false) => {
                stream
                    .write_all(&self.buffer)
                    .await
                    .map_err(|e| Exception::Io(e.to_string()))?;
                sent += self.buffer.len() as u64;
            }
            (Body::File { path, .. }, false) => {
                let mut file = tokio::fs::File::open(path).await?;
                let mut chunk = vec![0u8; chunk_size.max(1)];
                loop {
                    let n = tokio::io::AsyncReadExt::read(&mut file, &mut chunk)
                        .await
                        .map_err(|e| Exception::Io(e.to_string()))?;
                    if n == 0 {
                        break;
                    }
                    stream
                        .write_all(&chunk[..n])
                        .await
                        .map_err(|e| Exception::Io(e.to_string()))?;
                    sent += n as u64;
                }
            }
        }
        stream
            .flush()
            .await
            .map_err(|e| Exception::Io(e.to_string()))?;
        self.buffer.clear();
        Ok(sent)
    }

    /// 序列化头部块。调用方（flush）负责保证至多执行一次。
    ///
    /// 组装顺序：状态行、Date、自定义标头、Set-Cookie、连接管理头、
    /// Content-Type、Content-Length。
    fn serialize_headers(&self) -> Vec<u8> {
        let mut head = String::new();
        head.push_str(&format!(
            "HTTP/{} {} {}{}",
            self.version, self.status_code, self.information, CRLF
        ));
        head.push_str(&format!(
            "Date: {}{}",
            httpdate::fmt_http_date(SystemTime::now()),
            CRLF
        ));
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        for (name, cookie) in &self.cookies {
            head.push_str(&format!(
                "Set-Cookie: {}={}",
                name,
                url_encode(&cookie.value)
            ));
            if let Some(expires) = cookie.expires {
                head.push_str(&format!("; Expires={}", httpdate::fmt_http_date(expires)));
            }
            if let Some(path) = &cookie.path {
                head.push_str(&format!("; Path={}", path));
            }
            if let Some(domain) = &cookie.domain {
                head.push_str(&format!("; Domain={}", domain));
            }
            head.push_str(CRLF);
        }
        if let Some(encoding) = self.content_encoding {
            head.push_str(&format!("Content-Encoding: {}{}", encoding, CRLF));
        }
        if self.keep_alive {
            head.push_str(&format!("Connection: Keep-Alive{}", CRLF));
            head.push_str(&format!(
                "Keep-Alive: timeout={}, max={}{}",
                KEEP_ALIVE_TIMEOUT_SECS, self.keep_alive_max, CRLF
            ));
        } else {
            head.push_str(&format!("Connection: close{}", CRLF));
        }
        if self.status_code != 304 {
            head.push_str(&format!("Content-Type: {}{}", self.content_type, CRLF));
        }
        head.push_str(&format!(
            "Content-Length: {}{}",
            self.content_length(),
            CRLF
        ));
        head.push_str(CRLF);
        head.into_bytes()
    }

    fn content_length(&self) -> u64 {
        if self.status_code == 304 {
            return 0;
        }
        match &self.body {
            Body::Buffer => self.buffer.len() as u64,
            Body::File { length, .. } => *length,
        }
    }
}

// --- Getter 访问器实现 ---

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    #[cfg(test)]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }
}

/// 脚本程序通过该接口向响应写出内容、标头与状态码
impl crate::engine::ScriptOutput for Response {
    fn echo(&mut self, text: &str) {
        self.write_str(text);
    }

    fn header(&mut self, name: &str, value: &str) {
        Response::header(self, name, value);
    }

    fn status(&mut self, code: u16) {
        self.set_code(code);
    }
}

pub fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        let compressed_size = compressed.len();
        let ratio = if original_size > 0 {
            ((original_size as i64 - compressed_size as i64) as f64 / original_size as f64) * 100.0
        } else {
            0.0
        };
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes, 压缩率: {:.1}%",
            mode, original_size, compressed_size, ratio
        );
    }

    result
}

pub fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/jpeg",
        "image/jpg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/bmp",
        "image/x-icon",
        "video/",
        "audio/",
        "application/zip",
        "application/x-rar",
        "application/x-7z-compressed",
        "application/gzip",
        "application/x-gzip",
        "font/woff",
        "font/woff2",
        "application/vnd.ms-fontobject",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

pub fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else {
        None
    }
}
