pub mod accesslog;
pub mod cache;
pub mod config;
pub mod engine;
pub mod exception;
pub mod handler;
pub mod hooks;
pub mod param;
pub mod request;
pub mod response;
pub mod router;
pub mod supervisor;
pub mod util;
pub mod worker;

pub use accesslog::AccessLog;
pub use cache::{ArtifactCache, FileCache, WorkerCaches};
pub use config::Config;
pub use exception::Exception;
pub use handler::{ContentHandler, HandlerRegistry};
pub use hooks::ServerHooks;
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::{Cookie, Response};
pub use util::HtmlBuilder;
