//! 存储抽象模块
//! 定义压测所需的最小存储接口：open / get / set / batch / metrics / close

pub mod mem;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod sink;
pub mod stats;

pub use mem::MemStore;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;
pub use sink::{CacheCallDetail, CacheCallRecorder, CacheCallSink, CallStats};

/// 命令行默认使用的存储
#[cfg(feature = "rocksdb")]
pub type DefaultStore = RocksStore;
/// 命令行默认使用的存储（未启用 `rocksdb` 特性时数据只在内存中）
#[cfg(not(feature = "rocksdb"))]
pub type DefaultStore = MemStore;

/// 读取索引块的调用点
pub const CALLER_INDEX: &str = "table_reader.read_index";
/// 读取数据块的调用点
pub const CALLER_DATA_BLOCK: &str = "table_reader.read_data_block";
/// 读取过滤器块的调用点
pub const CALLER_FILTER: &str = "table_reader.read_filter";

use crate::config::{MIN_CACHE_MB, MIN_HANDLES};
use crate::error::Result;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// 写入确认策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Durability {
    /// 等待日志落盘后再确认
    Sync,
    /// 写入内存即确认
    NoSync,
}

/// 打开存储的参数
#[derive(Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub cache_size_mb: usize,
    pub max_open_files: usize,
    pub read_only: bool,
    /// 覆盖默认的内存表大小（字节）
    pub memtable_size: Option<usize>,
    pub sink: Arc<dyn CacheCallSink>,
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("path", &self.path)
            .field("cache_size_mb", &self.cache_size_mb)
            .field("max_open_files", &self.max_open_files)
            .field("read_only", &self.read_only)
            .field("memtable_size", &self.memtable_size)
            .finish_non_exhaustive()
    }
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>, cache_size_mb: usize, max_open_files: usize) -> Self {
        Self {
            path: path.into(),
            cache_size_mb,
            max_open_files,
            read_only: false,
            memtable_size: None,
            sink: Arc::new(CacheCallRecorder::new()),
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn memtable_size(mut self, bytes: usize) -> Self {
        self.memtable_size = Some(bytes);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn CacheCallSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 保证最小缓存和文件句柄
    pub fn normalized(mut self) -> Self {
        self.cache_size_mb = self.cache_size_mb.max(MIN_CACHE_MB);
        self.max_open_files = self.max_open_files.max(MIN_HANDLES);
        self
    }

    /// 缓存总字节数
    pub fn cache_bytes(&self) -> usize {
        self.cache_size_mb * 1024 * 1024
    }

    /// 内存表大小：缓存的一半再分给两张内存表
    pub fn effective_memtable_size(&self) -> usize {
        self.memtable_size
            .unwrap_or_else(|| self.cache_bytes() / 2 / 2)
            .max(1)
    }
}

/// 一组命中/未命中计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HitMiss {
    pub hits: u64,
    pub misses: u64,
}

/// 存储对外暴露的累计指标
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub filter: HitMiss,
    pub block_cache: HitMiss,
    pub table_cache: HitMiss,
    /// 块缓存占用，`MemStore` 按块计，RocksDB 按字节计
    pub block_cache_entries: u64,
    pub block_cache_capacity: u64,
    pub memtable_entries: u64,
    pub memtable_bytes: u64,
    pub tables: u64,
    pub table_entries: u64,
    pub flushes: u64,
    pub writes: u64,
    pub synced_writes: u64,
    pub batch_commits: u64,
    pub gets: u64,
}

impl fmt::Display for StoreMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "memtable: {} entries, {} bytes; flushes {}",
            self.memtable_entries, self.memtable_bytes, self.flushes
        )?;
        writeln!(f, "tables: {} ({} entries)", self.tables, self.table_entries)?;
        writeln!(
            f,
            "writes: {} ({} synced); batch commits: {}; gets: {}",
            self.writes, self.synced_writes, self.batch_commits, self.gets
        )?;
        writeln!(
            f,
            "block cache: {}/{} used, hits {}, misses {}",
            self.block_cache_entries,
            self.block_cache_capacity,
            self.block_cache.hits,
            self.block_cache.misses
        )?;
        writeln!(
            f,
            "table cache: hits {}, misses {}",
            self.table_cache.hits, self.table_cache.misses
        )?;
        writeln!(
            f,
            "filter: hits {}, misses {}",
            self.filter.hits, self.filter.misses
        )
    }
}

/// 批量写入
pub trait WriteBatch {
    /// 追加一条写入
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// 提交当前累积的写入
    fn commit(&mut self, durability: Durability) -> Result<()>;

    /// 清空批次以便复用
    fn reset(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 被测存储的统一接口
///
/// 实现必须支持多线程并发读写，压测侧不加任何外部锁。
pub trait Store: Send + Sync + Sized {
    /// `get` 返回的值，drop 即释放
    type Value: AsRef<[u8]>;

    type Batch<'a>: WriteBatch
    where
        Self: 'a;

    fn open(opts: StoreOptions) -> Result<Self>;

    /// 点查，不存在返回 `None`
    fn get(&self, key: &[u8]) -> Result<Option<Self::Value>>;

    fn set(&self, key: &[u8], value: &[u8], durability: Durability) -> Result<()>;

    fn new_batch(&self) -> Self::Batch<'_>;

    fn metrics(&self) -> StoreMetrics;

    /// 按调用点的缓存统计，只读
    fn cache_calls(&self) -> CacheCallDetail;

    fn close(self) -> Result<()>;
}
