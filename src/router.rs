// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由分发模块
//!
//! 将请求 URI 映射到处理逻辑，优先级从高到低：
//! 1. action 钩子：按 URI 首段查表，命中则完全绕过文件路由。
//! 2. 文件系统解析：`文档根 + 路径` 规范化；失败时逐级回退前缀，
//!    无法解析的尾部作为 PATH_INFO 附加在请求上。
//! 3. 目录：缺少结尾斜杠时 302 重定向补上；否则按配置的顺序查找
//!    目录索引文件。
//! 4. 后缀查处理器注册表，未命中则静态文件兜底。
//!
//! 规范化后的路径必须仍位于文档根之内，越界视为非法路径（目录遍历防御）。

use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::cache::WorkerCaches;
use crate::config::Config;
use crate::exception::Exception;
use crate::handler::{serve_static, HandlerRegistry};
use crate::hooks::ServerHooks;
use crate::param::{HttpRequestMethod, ALLOWED_METHODS, DEFAULT_ACTION};
use crate::request::Request;
use crate::response::Response;

/// 文件系统解析结果
struct Resolved {
    path: PathBuf,
    path_info: Option<String>,
}

/// 把请求分发到 action 钩子、动态处理器或静态文件。
///
/// 成功返回即响应已就绪；错误由调用方（worker）转换为错误页面。
pub fn dispatch(
    request: &mut Request,
    response: &mut Response,
    hooks: &ServerHooks,
    registry: &HandlerRegistry,
    caches: &mut WorkerCaches,
    config: &Config,
    id: u128,
) -> Result<(), Exception> {
    // OPTIONS 在路由之前应答
    if request.method() == HttpRequestMethod::Options {
        debug!("[ID{}]请求方法为OPTIONS", id);
        let allow = ALLOWED_METHODS
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        response.set_code(204);
        response.header("Allow", &allow);
        return Ok(());
    }

    // 1. action 钩子
    let first_segment = request
        .path()
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
        .to_string();
    let action_name = if first_segment.is_empty() {
        DEFAULT_ACTION.to_string()
    } else {
        first_segment
    };
    if let Some(hook) = hooks.action(&action_name) {
        debug!("[ID{}]命中action钩子：{}", id, action_name);
        return hook(request, response);
    }

    // 2. 文件系统解析
    let root = Path::new(config.www_root())
        .canonicalize()
        .map_err(|e| Exception::Io(format!("文档根目录不可用：{}", e)))?;
    let resolved = resolve_path(&root, request.path(), id)?;

    // 规范化后的路径必须仍在文档根之内
    if !resolved.path.starts_with(&root) {
        warn!(
            "[ID{}]请求路径{}越出文档根，判定为非法路径",
            id,
            request.path()
        );
        return Err(Exception::InvalidPath);
    }

    if let Some(info) = resolved.path_info {
        debug!("[ID{}]PATH_INFO: {}", id, info);
        request.set_path_info(info);
    }

    let mut target = resolved.path;

    // 3. 目录处理：补斜杠重定向，或解析目录索引
    if target.is_dir() {
        if !request.path().ends_with('/') {
            let location = format!("{}/", request.path());
            debug!("[ID{}]目录请求缺少结尾斜杠，重定向至{}", id, location);
            response.redirect(request, &location);
            return Ok(());
        }
        target = match resolve_index(&target, config) {
            Some(index) => index,
            None => {
                warn!("[ID{}]目录{}下没有可用的索引文件", id, target.display());
                return Err(Exception::FileNotFound);
            }
        };
        debug!("[ID{}]目录索引解析为{}", id, target.display());
    }

    request.set_resolved_path(target.clone());

    // 4. 后缀分发
    let extension = target
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match registry.lookup(&extension) {
        Some(handler) => {
            debug!("[ID{}]动态处理器接管：.{}", id, extension);
            request.set_script_path(target.clone());
            handler.handle(&target, request, response, caches, config)
        }
        None => {
            debug!("[ID{}]静态文件兜底：{}", id, target.display());
            serve_static(&target, request, response, caches, config)
        }
    }
}

/// 解析 `root + uri_path` 为物理路径。
///
/// 完整路径无法规范化时逐级缩短前缀重试：若某个前缀解析为普通文件，
/// 余下的尾部作为 PATH_INFO 返回；前缀是目录则说明资源确实不存在。
fn resolve_path(root: &Path, uri_path: &str, id: u128) -> Result<Resolved, Exception> {
    let segments: Vec<&str> = uri_path.split('/').filter(|s| !s.is_empty()).collect();

    // 先尝试完整路径
    let full: PathBuf = root.join(segments.join("/"));
    if let Ok(path) = full.canonicalize() {
        return Ok(Resolved {
            path,
            path_info: None,
        });
    }

    // 逐级缩短前缀
    for cut in (1..segments.len()).rev() {
        let prefix: PathBuf = root.join(segments[..cut].join("/"));
        let path = match prefix.canonicalize() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if path.is_file() {
            let info = format!("/{}", segments[cut..].join("/"));
            debug!(
                "[ID{}]前缀{}解析成功，尾部{}作为PATH_INFO",
                id,
                path.display(),
                info
            );
            return Ok(Resolved {
                path,
                path_info: Some(info),
            });
        }
        // 目录前缀下找不到子项：资源不存在
        break;
    }

    warn!("[ID{}]请求的路径{}无法解析", id, uri_path);
    Err(Exception::FileNotFound)
}

/// 在目录下按配置顺序查找第一个存在的索引文件
fn resolve_index(dir: &Path, config: &Config) -> Option<PathBuf> {
    for name in config.index_files() {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
