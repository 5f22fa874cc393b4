//! RocksDB 存储
//!
//! 整块缓存同时承载数据块、索引块和过滤器块，每层 sst 带 10 bit/key 的布隆过滤器，
//! 两张内存表（一张活跃一张冻结）。命中计数取自 RocksDB 自带的统计。

use super::stats::{self, Tickers};
use super::{CacheCallDetail, Durability, HitMiss, Store, StoreMetrics, StoreOptions, WriteBatch};
use crate::error::{BenchError, Result};
use rocksdb::{BlockBasedOptions, Cache, DB, Options, WriteBatch as RawBatch, WriteOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const FILTER_BITS_PER_KEY: f64 = 10.0;
/// 内存表个数上限
const MEMTABLE_LIMIT: i32 = 2;
/// L1 的 sst 目标大小，之后逐层翻倍
const TARGET_FILE_SIZE: u64 = 2 * 1024 * 1024;
const TARGET_FILE_SIZE_MULTIPLIER: i32 = 2;
/// WAL 累积到这个字节数就在后台同步一次
const WAL_BYTES_PER_SYNC: u64 = 5 * 100 * 1024;

const PROP_MEMTABLE_ENTRIES: &str = "rocksdb.num-entries-active-mem-table";
const PROP_MEMTABLE_BYTES: &str = "rocksdb.cur-size-all-mem-tables";

#[derive(Default)]
struct Counters {
    writes: AtomicU64,
    synced_writes: AtomicU64,
    batch_commits: AtomicU64,
    gets: AtomicU64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

pub struct RocksStore {
    db: DB,
    /// 与 db 共享同一个统计对象
    opts: Options,
    cache: Cache,
    cache_capacity: u64,
    path: PathBuf,
    read_only: bool,
    sync: WriteOptions,
    no_sync: WriteOptions,
    counters: Counters,
}

impl RocksStore {
    fn db_options(opts: &StoreOptions, cache: &Cache) -> Options {
        let mut table = BlockBasedOptions::default();
        table.set_block_cache(cache);
        table.set_bloom_filter(FILTER_BITS_PER_KEY, false);
        table.set_cache_index_and_filter_blocks(true);

        let parallelism = std::thread::available_parallelism()
            .map(|n| i32::try_from(n.get()).unwrap_or(i32::MAX))
            .unwrap_or(1);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.set_max_open_files(i32::try_from(opts.max_open_files).unwrap_or(i32::MAX));
        db_opts.set_write_buffer_size(opts.effective_memtable_size());
        db_opts.set_max_write_buffer_number(MEMTABLE_LIMIT);
        db_opts.increase_parallelism(parallelism);
        db_opts.set_target_file_size_base(TARGET_FILE_SIZE);
        db_opts.set_target_file_size_multiplier(TARGET_FILE_SIZE_MULTIPLIER);
        db_opts.set_wal_bytes_per_sync(WAL_BYTES_PER_SYNC);
        db_opts.set_block_based_table_factory(&table);
        db_opts.enable_statistics();
        db_opts
    }

    fn write_options(&self, durability: Durability) -> &WriteOptions {
        match durability {
            Durability::Sync => &self.sync,
            Durability::NoSync => &self.no_sync,
        }
    }

    fn count_write(&self, n: u64, durability: Durability) {
        bump(&self.counters.writes, n);
        if durability == Durability::Sync {
            bump(&self.counters.synced_writes, n);
        }
    }

    fn tickers(&self) -> Tickers {
        self.opts
            .get_statistics()
            .map(|text| Tickers::parse(&text))
            .unwrap_or_default()
    }

    fn property(&self, name: &str) -> u64 {
        self.db
            .property_int_value(name)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// 把内存表刷成 sst
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl Store for RocksStore {
    type Value = Vec<u8>;
    type Batch<'a> = RocksBatch<'a>;

    fn open(opts: StoreOptions) -> Result<Self> {
        let opts = opts.normalized();
        if opts.read_only {
            if !opts.path.is_dir() {
                return Err(BenchError::StoreOpen(format!(
                    "{} is not an existing directory",
                    opts.path.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&opts.path).map_err(|e| {
                BenchError::StoreOpen(format!("create {}: {}", opts.path.display(), e))
            })?;
        }

        let cache = Cache::new_lru_cache(opts.cache_bytes());
        let db_opts = Self::db_options(&opts, &cache);
        let db = if opts.read_only {
            DB::open_for_read_only(&db_opts, &opts.path, false)
        } else {
            DB::open(&db_opts, &opts.path)
        }
        .map_err(|e| BenchError::StoreOpen(format!("{}: {}", opts.path.display(), e)))?;

        let mut sync = WriteOptions::default();
        sync.set_sync(true);
        let mut no_sync = WriteOptions::default();
        no_sync.set_sync(false);

        info!(
            path = %opts.path.display(),
            cache_mb = opts.cache_size_mb,
            handles = opts.max_open_files,
            memtable_bytes = opts.effective_memtable_size(),
            read_only = opts.read_only,
            "rocksdb opened"
        );

        Ok(Self {
            db,
            opts: db_opts,
            cache,
            cache_capacity: opts.cache_bytes() as u64,
            path: opts.path,
            read_only: opts.read_only,
            sync,
            no_sync,
            counters: Counters::default(),
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        bump(&self.counters.gets, 1);
        Ok(self.db.get(key)?)
    }

    fn set(&self, key: &[u8], value: &[u8], durability: Durability) -> Result<()> {
        self.db.put_opt(key, value, self.write_options(durability))?;
        self.count_write(1, durability);
        Ok(())
    }

    fn new_batch(&self) -> RocksBatch<'_> {
        RocksBatch {
            store: self,
            inner: RawBatch::default(),
        }
    }

    fn metrics(&self) -> StoreMetrics {
        let tickers = self.tickers();
        let (tables, table_entries) = match self.db.live_files() {
            Ok(files) => (
                files.len() as u64,
                files.iter().map(|f| f.num_entries).sum(),
            ),
            Err(e) => {
                debug!(error = %e, "live files unavailable");
                (0, 0)
            }
        };
        let c = &self.counters;
        StoreMetrics {
            filter: tickers.filter(),
            block_cache: tickers.block_cache(),
            // 表缓存命中没有对应计数，只记录打开文件的次数
            table_cache: HitMiss {
                hits: 0,
                misses: tickers.get(stats::FILE_OPENS),
            },
            block_cache_entries: self.cache.get_usage() as u64,
            block_cache_capacity: self.cache_capacity,
            memtable_entries: self.property(PROP_MEMTABLE_ENTRIES),
            memtable_bytes: self.property(PROP_MEMTABLE_BYTES),
            tables,
            table_entries,
            flushes: tickers.get(stats::FLUSHES),
            writes: load(&c.writes),
            synced_writes: load(&c.synced_writes),
            batch_commits: load(&c.batch_commits),
            gets: load(&c.gets),
        }
    }

    /// 由块缓存按类型的计数得出，不经过 `StoreOptions::sink`
    fn cache_calls(&self) -> CacheCallDetail {
        self.tickers().cache_calls()
    }

    fn close(self) -> Result<()> {
        if !self.read_only {
            self.flush()?;
        }
        let m = self.metrics();
        info!(
            path = %self.path.display(),
            writes = m.writes,
            gets = m.gets,
            tables = m.tables,
            "rocksdb closed"
        );
        Ok(())
    }
}

/// `RocksStore` 的批量写入
pub struct RocksBatch<'a> {
    store: &'a RocksStore,
    inner: RawBatch,
}

impl WriteBatch for RocksBatch<'_> {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.inner.put(key, value);
    }

    fn commit(&mut self, durability: Durability) -> Result<()> {
        let n = self.inner.len() as u64;
        let batch = std::mem::take(&mut self.inner);
        self.store
            .db
            .write_opt(batch, self.store.write_options(durability))?;
        bump(&self.store.counters.batch_commits, 1);
        self.store.count_write(n, durability);
        Ok(())
    }

    fn reset(&mut self) {
        self.inner.clear();
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
