//! # 钩子注册表模块
//!
//! 嵌入方通过该模块向服务器注入自定义逻辑：
//! - **启动钩子**：带名字的有序列表，每个 worker 在服务第一个请求前执行
//!   一次（典型用途：按配置建立数据库连接），执行耗时会被记录。
//! - **停机钩子**：服务器退出前执行。
//! - **请求钩子**：分发前的 request_start 与分发后、缓冲复位前的
//!   request_end。
//! - **action 钩子**：按 URI 首段注册，命中即完全绕过文件路由。

use std::collections::HashMap;

use log::info;

use crate::config::Config;
use crate::exception::Exception;
use crate::request::Request;
use crate::response::Response;

pub type StartupHook = Box<dyn Fn(&Config) + Send + Sync>;
pub type ShutdownHook = Box<dyn Fn() + Send + Sync>;
pub type RequestHook = Box<dyn Fn(&Request, &mut Response) + Send + Sync>;
pub type ActionHook =
    Box<dyn Fn(&mut Request, &mut Response) -> Result<(), Exception> + Send + Sync>;

#[derive(Default)]
pub struct ServerHooks {
    startup: Vec<(String, StartupHook)>,
    shutdown: Vec<ShutdownHook>,
    request_start: Option<RequestHook>,
    request_end: Option<RequestHook>,
    actions: HashMap<String, ActionHook>,
}

impl ServerHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个启动钩子。执行顺序与注册顺序一致。
    pub fn on_startup(&mut self, name: &str, hook: StartupHook) -> &mut Self {
        self.startup.push((name.to_string(), hook));
        self
    }

    pub fn on_shutdown(&mut self, hook: ShutdownHook) -> &mut Self {
        self.shutdown.push(hook);
        self
    }

    pub fn set_request_start(&mut self, hook: RequestHook) -> &mut Self {
        self.request_start = Some(hook);
        self
    }

    pub fn set_request_end(&mut self, hook: RequestHook) -> &mut Self {
        self.request_end = Some(hook);
        self
    }

    /// 注册 action 钩子。`segment` 为 URI 的第一个路径段；
    /// 请求 `/` 时以 [`crate::param::DEFAULT_ACTION`] 查表。
    pub fn register_action(&mut self, segment: &str, hook: ActionHook) -> &mut Self {
        self.actions.insert(segment.to_string(), hook);
        self
    }

    pub fn action(&self, segment: &str) -> Option<&ActionHook> {
        self.actions.get(segment)
    }

    /// 依序执行全部启动钩子并记录各自耗时
    pub fn run_startup(&self, config: &Config) {
        for (name, hook) in &self.startup {
            let started = std::time::Instant::now();
            hook(config);
            info!(
                "启动钩子 {} 执行完毕，耗时{}ms",
                name,
                started.elapsed().as_millis()
            );
        }
    }

    pub fn run_shutdown(&self) {
        for hook in &self.shutdown {
            hook();
        }
    }

    pub fn run_request_start(&self, request: &Request, response: &mut Response) {
        if let Some(hook) = &self.request_start {
            hook(request, response);
        }
    }

    pub fn run_request_end(&self, request: &Request, response: &mut Response) {
        if let Some(hook) = &self.request_end {
            hook(request, response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_startup_hooks_run_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut hooks = ServerHooks::new();
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            hooks.on_startup(
                name,
                Box::new(move |_config| {
                    order.lock().unwrap().push(name.to_string());
                }),
            );
        }
        hooks.run_startup(&Config::new());
        assert_eq!(
            order.lock().unwrap().as_slice(),
            ["first", "second", "third"]
        );
    }

    #[test]
    fn test_shutdown_hooks_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut hooks = ServerHooks::new();
        for _ in 0..2 {
            let count = Arc::clone(&count);
            hooks.on_shutdown(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        hooks.run_shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_action_lookup() {
        let mut hooks = ServerHooks::new();
        hooks.register_action(
            "status",
            Box::new(|_request, response| {
                response.write_str("ok");
                Ok(())
            }),
        );
        assert!(hooks.action("status").is_some());
        assert!(hooks.action("other").is_none());
    }
}
