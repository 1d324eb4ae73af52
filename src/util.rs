use std::fs;
use std::path::Path;

use crate::param::STATUS_CODES;

pub struct HtmlBuilder {
    title: String,
    css: String,
    script: String,
    body: String,
}

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => n,
            None => match STATUS_CODES.get(&code) {
                Some(d) => *d,
                None => {
                    panic!("非法的状态码：{}", code);
                }
            },
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code, description
        );
        Self {
            title,
            css,
            script: "".to_string(),
            body,
        }
    }

    /// 构建 500 错误页面，带出错脚本的路径、行号与消息。
    ///
    /// 仅当 `excerpt` 为 `Some` 时（即配置开启了 debug），页面才会包含
    /// 出错位置附近的源码摘录；生产模式下客户端只能看到状态行和脚本路径。
    pub fn from_script_error(
        path: &str,
        line: usize,
        message: &str,
        excerpt: Option<&str>,
    ) -> Self {
        let mut builder = Self::from_status_code(500, Some("服务器在生成动态内容时出现了一个内部错误。"));
        builder
            .body
            .push_str(&format!("<p><code>{} : {}</code></p>", escape_html(path), line));
        if let Some(src) = excerpt {
            builder.body.push_str(&format!(
                "<p>{}</p><pre>{}</pre>",
                escape_html(message),
                escape_html(src)
            ));
            builder.css.push_str(
                r"
            pre {
                background: #f4f4f4;
                padding: 8px;
                overflow-x: auto;
            }
            ",
            );
        }
        builder
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <!-- 本文件由shaneyale的Rust Appserver自动生成 -->
            <html>
                <head>
                    <meta charset="utf-8">
                    <script>{}</script>
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.script, self.title, self.css, self.body
        )
    }
}

/// 对将嵌入 HTML 的文本做最小转义
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// 读取源文件中 `line`（从 1 开始）附近的若干行，用于错误页面的代码摘录。
///
/// 摘录范围为出错行前后各 2 行，每行带行号前缀，出错行以 `>` 标记。
pub fn source_excerpt(path: &Path, line: usize) -> Option<String> {
    let source = fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return None;
    }
    let start = line.saturating_sub(3);
    let end = (line + 2).min(lines.len());
    let mut excerpt = String::new();
    for (idx, text) in lines[start..end].iter().enumerate() {
        let number = start + idx + 1;
        let marker = if number == line { ">" } else { " " };
        excerpt.push_str(&format!("{} {:>4} | {}\n", marker, number, text));
    }
    Some(excerpt)
}

/// 按 `application/x-www-form-urlencoded` 规则解码：`+` 还原为空格，
/// `%XX` 还原为对应字节。任何非法的百分号序列都会返回 `None`，
/// 由调用方决定是丢弃该键值对还是使用原文。
pub fn url_decode(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let hex_str = std::str::from_utf8(hex).ok()?;
                let value = u8::from_str_radix(hex_str, 16).ok()?;
                decoded.push(value);
                i += 3;
            }
            b => {
                decoded.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(decoded).ok()
}

/// URL 编码，用于 Set-Cookie 的值以及重定向地址中的保留字符。
///
/// 字母、数字和 `-_.~` 保持原样，空格编码为 `%20`（不是 `+`，
/// Cookie 值中的 `+` 不会被浏览器还原）。
pub fn url_encode(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}
