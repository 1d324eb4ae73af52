use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;

use crate::exception::Exception;

/// 一条编译产物缓存记录：源文件的 mtime 加上编译结果。
struct ArtifactEntry<A> {
    mtime: SystemTime,
    artifact: Arc<A>,
}

/// 以文件路径为键、mtime 为新鲜度依据的编译产物缓存。
///
/// 四类动态内容（模板页、内联脚本、转译脚本、样式表）各持有一个实例，
/// 共享同一条失效规则：磁盘上的 mtime 与缓存记录不一致（无论变新还是变旧）
/// 即触发重新编译。旧产物随记录替换被丢弃，`Arc` 保证仍在执行中的引用
/// 不受影响。缓存不主动淘汰，条目数随 worker 生命周期增长；worker 的
/// 请求数预算到期退出时整个缓存一并释放。
pub struct ArtifactCache<A> {
    entries: HashMap<PathBuf, ArtifactEntry<A>>,
}

impl<A> ArtifactCache<A> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// 返回 `path` 对应的产物；缓存缺失或源文件 mtime 变化时调用 `build`
    /// 重新编译并替换旧条目。
    ///
    /// `build` 接收源文件的完整文本。源文件不可读按 404 处理（路由层已
    /// 确认过文件存在，此处的 NotFound 意味着竞态删除）。
    pub fn get_or_build<F>(&mut self, path: &Path, build: F) -> Result<Arc<A>, Exception>
    where
        F: FnOnce(&str) -> Result<A, Exception>,
    {
        let mtime = fs::metadata(path)?.modified()?;

        if let Some(entry) = self.entries.get(path) {
            if entry.mtime == mtime {
                return Ok(Arc::clone(&entry.artifact));
            }
        }

        let source = fs::read_to_string(path)?;
        let artifact = Arc::new(build(&source)?);
        self.entries.insert(
            path.to_path_buf(),
            ArtifactEntry {
                mtime,
                artifact: Arc::clone(&artifact),
            },
        );
        Ok(artifact)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<A> Default for ArtifactCache<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct FileEntry {
    content: Bytes,
    modified_time: SystemTime,
}

/// 静态小文件的内容缓存，LRU 淘汰，mtime 校验新鲜度。
pub struct FileCache {
    cache: LruCache<String, FileEntry>,
}

impl FileCache {
    // 根据容量构造
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("调用from_capacity时指定的大小是0。如果需要自动设置大小，请在调用处进行处理，而不是传入0");
        }
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
        }
    }
    // 放入
    pub fn push(&mut self, filename: &str, bytes: Bytes, modified_time: SystemTime) {
        let entry = FileEntry {
            content: bytes,
            modified_time,
        };
        self.cache.put(filename.to_string(), entry);
    }

    // 检查文件大小是否适合缓存
    pub fn should_cache(file_size: u64, threshold: u64) -> bool {
        file_size <= threshold
    }
    // 查询有效缓存
    pub fn find(&mut self, filename: &str, current_modified_time: SystemTime) -> Option<&Bytes> {
        match self.cache.get(filename) {
            Some(entry) => {
                if entry.modified_time == current_modified_time {
                    Some(&entry.content)
                } else {
                    None
                }
            }
            None => None,
        }
    }

    // 测试
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

/// 单个 worker 持有的全部缓存。
///
/// 缓存是 worker 私有的：worker 之间不共享、不加锁，worker 退出时整体丢弃。
pub struct WorkerCaches {
    pub templates: ArtifactCache<crate::engine::Template>,
    pub scripts: ArtifactCache<crate::engine::Program>,
    pub transpiled: ArtifactCache<crate::engine::Program>,
    pub stylesheets: ArtifactCache<String>,
    pub files: FileCache,
}

impl WorkerCaches {
    pub fn new(file_cache_capacity: usize) -> Self {
        Self {
            templates: ArtifactCache::new(),
            scripts: ArtifactCache::new(),
            transpiled: ArtifactCache::new(),
            stylesheets: ArtifactCache::new(),
            files: FileCache::from_capacity(file_cache_capacity),
        }
    }
}
