use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use core::str;
use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

/// 可选的数据库连接参数。
///
/// 服务器自身不持有 SQL 客户端，该结构体仅在配置中透传给嵌入方注册的
/// 启动钩子，由钩子自行决定如何建立连接。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    www_root: String,
    port: u16,
    worker_count: usize,
    requests_per_worker: u32,
    cache_size: usize,
    local: bool,
    #[serde(default = "default_index_files")]
    index_files: Vec<String>,
    #[serde(default = "default_streaming_threshold")]
    streaming_threshold: u64,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_access_log")]
    access_log: String,
    #[serde(default = "default_flush_interval_secs")]
    flush_interval_secs: u64,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    database: Option<DbConfig>,
}

fn default_index_files() -> Vec<String> {
    vec!["index.tpl".to_string(), "index.html".to_string()]
}

fn default_streaming_threshold() -> u64 {
    10485760 // 10MB
}

fn default_chunk_size() -> usize {
    262144 // 256KB
}

fn default_access_log() -> String {
    "log/access.log".to_string()
}

fn default_flush_interval_secs() -> u64 {
    2
}

impl Config {
    pub fn new() -> Self {
        Self {
            www_root: ".".to_string(),
            port: 7878,
            worker_count: 0,
            requests_per_worker: 500,
            cache_size: 5,
            local: true,
            index_files: default_index_files(),
            streaming_threshold: default_streaming_threshold(),
            chunk_size: default_chunk_size(),
            access_log: default_access_log(),
            flush_interval_secs: default_flush_interval_secs(),
            debug: false,
            database: None,
        }
    }

    pub fn from_toml(filename: &str) -> Self {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => panic!("no such file {} exception:{}", filename, e),
        };
        let mut str_val = String::new();
        match file.read_to_string(&mut str_val) {
            Ok(s) => s,
            Err(e) => panic!("Error Reading file: {}", e),
        };

        let mut raw_config: Config = match toml::from_str(&str_val) {
            Ok(t) => t,
            Err(_) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置");
                Config::new()
            }
        };
        if raw_config.worker_count == 0 {
            raw_config.worker_count = num_cpus::get();
        }
        if raw_config.requests_per_worker == 0 {
            warn!("requests_per_worker被设置为0，worker将无法服务任何请求，因此该值将被改为500。");
            raw_config.requests_per_worker = 500;
        }
        if raw_config.cache_size == 0 {
            warn!("cache_size被设置为0，但目前尚不支持禁用缓存，因此该值将被改为5。");
            raw_config.cache_size = 5;
        }
        raw_config
    }
}

impl Config {
    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn requests_per_worker(&self) -> u32 {
        self.requests_per_worker
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn index_files(&self) -> &[String] {
        &self.index_files
    }

    pub fn streaming_threshold(&self) -> u64 {
        self.streaming_threshold
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn access_log(&self) -> &str {
        &self.access_log
    }

    pub fn flush_interval_secs(&self) -> u64 {
        self.flush_interval_secs
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn database(&self) -> Option<&DbConfig> {
        self.database.as_ref()
    }
}
