// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 内容处理器模块
//!
//! 路由器按文件后缀在注册表中选择处理器。四类动态内容各有一个处理器
//! 变体，它们共享同一条缓存规则（见 `cache::ArtifactCache`）：查缓存、
//! mtime 不一致则重新编译、然后以当前请求上下文执行产物。
//! 没有命中注册表的后缀走静态文件兜底。

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use bytes::Bytes;
use log::debug;

use crate::cache::{FileCache, WorkerCaches};
use crate::config::Config;
use crate::engine::{compile_stylesheet, Program, Template};
use crate::exception::Exception;
use crate::param::MIME_TYPES;
use crate::request::Request;
use crate::response::{should_skip_compression, Response};

/// 动态内容处理器接口。
///
/// `content_type` 是该类内容的固定 MIME 类型；`handle` 负责渲染并把
/// 结果写入响应缓冲区。正常完成返回 `Ok(())`，编译/执行失败返回
/// `Exception::ScriptError`。
pub trait ContentHandler: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn handle(
        &self,
        path: &Path,
        request: &Request,
        response: &mut Response,
        caches: &mut WorkerCaches,
        config: &Config,
    ) -> Result<(), Exception>;
}

/// 模板页处理器（`.tpl`）
pub struct TemplatePage;

impl ContentHandler for TemplatePage {
    fn content_type(&self) -> &'static str {
        "text/html;charset=utf-8"
    }

    fn handle(
        &self,
        path: &Path,
        request: &Request,
        response: &mut Response,
        caches: &mut WorkerCaches,
        _config: &Config,
    ) -> Result<(), Exception> {
        let name = path.to_string_lossy().to_string();
        let template = caches
            .templates
            .get_or_build(path, |source| Template::compile(&name, source))?;
        response.set_content_type(self.content_type());
        let html = template.render(request.data());
        response.write_str(&html);
        Ok(())
    }
}

/// 内联脚本处理器（`.jss`）
pub struct InlineScript;

impl ContentHandler for InlineScript {
    fn content_type(&self) -> &'static str {
        "text/html;charset=utf-8"
    }

    fn handle(
        &self,
        path: &Path,
        request: &Request,
        response: &mut Response,
        caches: &mut WorkerCaches,
        _config: &Config,
    ) -> Result<(), Exception> {
        let name = path.to_string_lossy().to_string();
        let program = caches
            .scripts
            .get_or_build(path, |source| Program::compile(&name, source))?;
        response.set_content_type(self.content_type());
        program.run(&name, request.data(), response)
    }
}

/// 转译脚本处理器（`.sjs`）：简写语法先转译为内联脚本指令再执行
pub struct TranspiledScript;

impl ContentHandler for TranspiledScript {
    fn content_type(&self) -> &'static str {
        "text/html;charset=utf-8"
    }

    fn handle(
        &self,
        path: &Path,
        request: &Request,
        response: &mut Response,
        caches: &mut WorkerCaches,
        _config: &Config,
    ) -> Result<(), Exception> {
        let name = path.to_string_lossy().to_string();
        let program = caches
            .transpiled
            .get_or_build(path, |source| Program::transpile(&name, source))?;
        response.set_content_type(self.content_type());
        program.run(&name, request.data(), response)
    }
}

/// 样式表预处理器（`.styl`）
pub struct Stylesheet;

impl ContentHandler for Stylesheet {
    fn content_type(&self) -> &'static str {
        "text/css;charset=utf-8"
    }

    fn handle(
        &self,
        path: &Path,
        request: &Request,
        response: &mut Response,
        caches: &mut WorkerCaches,
        _config: &Config,
    ) -> Result<(), Exception> {
        let name = path.to_string_lossy().to_string();
        let css = caches
            .stylesheets
            .get_or_build(path, |source| compile_stylesheet(&name, source))?;

        // 样式表是普通可缓存内容，同样尊重条件 GET
        let mtime = fs::metadata(path)?.modified()?;
        if response.check_not_modified(request, mtime) {
            return Ok(());
        }
        response.header("Last-Modified", &httpdate::fmt_http_date(mtime));
        response.set_content_type(self.content_type());
        response.write_str(&css);
        Ok(())
    }
}

/// 后缀到处理器的注册表。
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Box<dyn ContentHandler>>,
}

impl HandlerRegistry {
    /// 注册全部内置动态内容处理器
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register("tpl", Box::new(TemplatePage));
        registry.register("jss", Box::new(InlineScript));
        registry.register("sjs", Box::new(TranspiledScript));
        registry.register("styl", Box::new(Stylesheet));
        registry
    }

    pub fn register(&mut self, extension: &'static str, handler: Box<dyn ContentHandler>) {
        self.handlers.insert(extension, handler);
    }

    /// 按小写后缀查找处理器
    pub fn lookup(&self, extension: &str) -> Option<&dyn ContentHandler> {
        self.handlers.get(extension).map(|h| h.as_ref())
    }
}

/// 静态文件兜底：MIME 查表、条件 GET、小文件内容缓存、大文件流式发送。
pub fn serve_static(
    path: &Path,
    request: &Request,
    response: &mut Response,
    caches: &mut WorkerCaches,
    config: &Config,
) -> Result<(), Exception> {
    let mime = guess_mime(path);
    response.set_content_type(mime);

    let metadata = fs::metadata(path)?;
    let mtime = metadata.modified()?;
    let size = metadata.len();

    if response.check_not_modified(request, mtime) {
        debug!("静态文件{}未修改，返回304", path.display());
        return Ok(());
    }

    if size > config.streaming_threshold() {
        // 大文件绕过缓冲与压缩，由 flush 分块发送
        debug!("静态文件{}超过流式阈值，使用sendfile路径", path.display());
        return response.send_file(path, request);
    }

    response.header("Last-Modified", &httpdate::fmt_http_date(mtime));
    if should_skip_compression(mime) {
        response.disable_compression();
    }

    let key = path.to_string_lossy().to_string();
    if let Some(content) = caches.files.find(&key, mtime) {
        debug!("静态文件缓存命中：{}", key);
        let bytes = content.clone();
        response.write(&bytes);
        return Ok(());
    }

    let content = fs::read(path)?;
    if FileCache::should_cache(size, config.streaming_threshold()) {
        caches
            .files
            .push(&key, Bytes::from(content.clone()), mtime);
    }
    response.write(&content);
    Ok(())
}

/// MIME 查表，未知后缀与无后缀文件按纯文本处理
fn guess_mime(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(extension) => MIME_TYPES
            .get(extension.to_lowercase().as_str())
            .copied()
            .unwrap_or("text/plain"),
        None => "text/plain",
    }
}
