//! 进程内有序存储，供测试和基准使用
//!
//! 内存表写满后冻结成只读的有序表，每张表带一个布隆过滤器，
//! 读路径依次经过表缓存、过滤器、索引块和数据块缓存，
//! 所以各项命中计数可以在不落盘的情况下被断言。
//! 不做合并，也不落盘，进程退出即丢失。

use super::{
    CALLER_DATA_BLOCK, CALLER_INDEX, CacheCallDetail, Durability, HitMiss, Store, StoreMetrics,
    StoreOptions, WriteBatch,
};
use crate::error::{BenchError, Result};
use hashlink::LruCache as HashlinkLruCache;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// 数据块目标大小（字节）
const BLOCK_SIZE: usize = 4096;
const FILTER_BITS_PER_KEY: usize = 10;
const FILTER_PROBES: u64 = 6;
/// 索引块在块缓存中的编号
const INDEX_BLOCK: u32 = u32::MAX;

fn probes(key: &[u8], nbits: u64) -> impl Iterator<Item = u64> {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let h = hasher.finish();
    let h1 = h & 0xffff_ffff;
    let h2 = (h >> 32) | 1;
    (0..FILTER_PROBES).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % nbits)
}

/// 布隆过滤器
struct Filter {
    bits: Vec<u64>,
    nbits: u64,
}

impl Filter {
    fn build<'a>(keys: impl ExactSizeIterator<Item = &'a [u8]>) -> Self {
        let words = (keys.len() * FILTER_BITS_PER_KEY).div_ceil(64).max(1);
        let nbits = (words * 64) as u64;
        let mut bits = vec![0u64; words];
        for key in keys {
            for bit in probes(key, nbits) {
                bits[(bit / 64) as usize] |= 1 << (bit % 64);
            }
        }
        Self { bits, nbits }
    }

    fn may_contain(&self, key: &[u8]) -> bool {
        probes(key, self.nbits).all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }
}

type Entry = (Vec<u8>, Vec<u8>);

/// 冻结后的有序表
struct Table {
    id: u64,
    first_keys: Vec<Vec<u8>>,
    blocks: Vec<Vec<Entry>>,
    filter: Filter,
    entries: u64,
}

impl Table {
    fn build(id: u64, mem: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        let filter = Filter::build(mem.keys().map(Vec::as_slice));
        let entries = mem.len() as u64;

        let mut blocks = Vec::new();
        let mut current = Vec::new();
        let mut current_bytes = 0;
        for (k, v) in mem {
            current_bytes += k.len() + v.len();
            current.push((k, v));
            if current_bytes >= BLOCK_SIZE {
                blocks.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
        }
        if !current.is_empty() {
            blocks.push(current);
        }
        let first_keys = blocks.iter().map(|b: &Vec<Entry>| b[0].0.clone()).collect();

        Self {
            id,
            first_keys,
            blocks,
            filter,
            entries,
        }
    }

    /// 可能包含 key 的数据块：首 key 不大于 key 的最后一块
    fn block_for(&self, key: &[u8]) -> Option<usize> {
        self.first_keys
            .partition_point(|first| first.as_slice() <= key)
            .checked_sub(1)
    }
}

#[derive(Default)]
struct Inner {
    mem: BTreeMap<Vec<u8>, Vec<u8>>,
    mem_bytes: usize,
    /// 旧表在前
    tables: Vec<Arc<Table>>,
    next_table_id: u64,
}

impl Inner {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let (klen, vlen) = (key.len(), value.len());
        match self.mem.insert(key, value) {
            Some(old) => self.mem_bytes = self.mem_bytes + vlen - old.len(),
            None => self.mem_bytes += klen + vlen,
        }
    }
}

#[derive(Default)]
struct Counters {
    filter_hits: AtomicU64,
    filter_misses: AtomicU64,
    block_hits: AtomicU64,
    block_misses: AtomicU64,
    table_hits: AtomicU64,
    table_misses: AtomicU64,
    flushes: AtomicU64,
    writes: AtomicU64,
    synced_writes: AtomicU64,
    batch_commits: AtomicU64,
    gets: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// 进程内有序存储
pub struct MemStore {
    opts: StoreOptions,
    memtable_limit: usize,
    inner: RwLock<Inner>,
    block_cache: Mutex<LruCache<(u64, u32), ()>>,
    table_cache: Mutex<HashlinkLruCache<u64, ()>>,
    counters: Counters,
}

impl MemStore {
    /// 把当前内存表冻结成一张表，内存表为空时不做任何事
    pub fn flush_memtable(&self) {
        let mut inner = self.inner.write();
        self.freeze(&mut inner);
    }

    fn freeze(&self, inner: &mut Inner) {
        if inner.mem.is_empty() {
            return;
        }
        let mem = std::mem::take(&mut inner.mem);
        inner.mem_bytes = 0;
        let id = inner.next_table_id;
        inner.next_table_id += 1;
        let table = Table::build(id, mem);
        debug!(table = id, entries = table.entries, blocks = table.blocks.len(), "memtable frozen");
        inner.tables.push(Arc::new(table));
        bump(&self.counters.flushes);
    }

    fn maybe_freeze(&self, inner: &mut Inner) {
        if inner.mem_bytes >= self.memtable_limit {
            self.freeze(inner);
        }
    }

    fn writable(&self) -> Result<()> {
        if self.opts.read_only {
            Err(BenchError::Store("store is opened read-only".into()))
        } else {
            Ok(())
        }
    }

    fn count_write(&self, n: u64, durability: Durability) {
        self.counters.writes.fetch_add(n, Ordering::Relaxed);
        if durability == Durability::Sync {
            self.counters.synced_writes.fetch_add(n, Ordering::Relaxed);
        }
    }

    fn open_table(&self, id: u64) {
        let hit = {
            let mut cache = self.table_cache.lock();
            if cache.get(&id).is_some() {
                true
            } else {
                cache.insert(id, ());
                false
            }
        };
        bump(if hit {
            &self.counters.table_hits
        } else {
            &self.counters.table_misses
        });
    }

    fn read_block(&self, table: u64, block: u32, caller: &'static str) {
        let hit = {
            let mut cache = self.block_cache.lock();
            if cache.get(&(table, block)).is_some() {
                true
            } else {
                cache.put((table, block), ());
                false
            }
        };
        bump(if hit {
            &self.counters.block_hits
        } else {
            &self.counters.block_misses
        });
        self.opts.sink.record(caller, hit);
    }

    fn search_table(&self, table: &Table, key: &[u8]) -> Option<Vec<u8>> {
        self.open_table(table.id);
        if !table.filter.may_contain(key) {
            bump(&self.counters.filter_hits);
            return None;
        }
        bump(&self.counters.filter_misses);

        self.read_block(table.id, INDEX_BLOCK, CALLER_INDEX);
        let idx = table.block_for(key)?;
        self.read_block(table.id, idx as u32, CALLER_DATA_BLOCK);
        let block = &table.blocks[idx];
        block
            .binary_search_by(|(k, _)| k.as_slice().cmp(key))
            .ok()
            .map(|pos| block[pos].1.clone())
    }
}

impl Store for MemStore {
    type Value = Vec<u8>;
    type Batch<'a> = MemBatch<'a>;

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

        let blocks = NonZeroUsize::new(opts.cache_bytes() / BLOCK_SIZE).unwrap_or(NonZeroUsize::MIN);
        let memtable_limit = opts.effective_memtable_size();
        info!(
            path = %opts.path.display(),
            cache_mb = opts.cache_size_mb,
            block_cache_blocks = blocks.get(),
            memtable_bytes = memtable_limit,
            read_only = opts.read_only,
            "store opened"
        );

        Ok(Self {
            memtable_limit,
            inner: RwLock::new(Inner::default()),
            block_cache: Mutex::new(LruCache::new(blocks)),
            table_cache: Mutex::new(HashlinkLruCache::new(opts.max_open_files)),
            counters: Counters::default(),
            opts,
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        bump(&self.counters.gets);
        let tables = {
            let inner = self.inner.read();
            if let Some(v) = inner.mem.get(key) {
                return Ok(Some(v.clone()));
            }
            inner.tables.clone()
        };
        Ok(tables
            .iter()
            .rev()
            .find_map(|table| self.search_table(table, key)))
    }

    fn set(&self, key: &[u8], value: &[u8], durability: Durability) -> Result<()> {
        self.writable()?;
        self.count_write(1, durability);
        let mut inner = self.inner.write();
        inner.put(key.to_vec(), value.to_vec());
        self.maybe_freeze(&mut inner);
        Ok(())
    }

    fn new_batch(&self) -> MemBatch<'_> {
        MemBatch {
            store: self,
            entries: Vec::new(),
        }
    }

    fn metrics(&self) -> StoreMetrics {
        let c = &self.counters;
        let (memtable_entries, memtable_bytes, tables, table_entries) = {
            let inner = self.inner.read();
            (
                inner.mem.len() as u64,
                inner.mem_bytes as u64,
                inner.tables.len() as u64,
                inner.tables.iter().map(|t| t.entries).sum(),
            )
        };
        let (block_cache_entries, block_cache_capacity) = {
            let cache = self.block_cache.lock();
            (cache.len() as u64, cache.cap().get() as u64)
        };
        StoreMetrics {
            filter: HitMiss {
                hits: load(&c.filter_hits),
                misses: load(&c.filter_misses),
            },
            block_cache: HitMiss {
                hits: load(&c.block_hits),
                misses: load(&c.block_misses),
            },
            table_cache: HitMiss {
                hits: load(&c.table_hits),
                misses: load(&c.table_misses),
            },
            block_cache_entries,
            block_cache_capacity,
            memtable_entries,
            memtable_bytes,
            tables,
            table_entries,
            flushes: load(&c.flushes),
            writes: load(&c.writes),
            synced_writes: load(&c.synced_writes),
            batch_commits: load(&c.batch_commits),
            gets: load(&c.gets),
        }
    }

    fn cache_calls(&self) -> CacheCallDetail {
        self.opts.sink.detail()
    }

    fn close(self) -> Result<()> {
        let m = self.metrics();
        info!(
            path = %self.opts.path.display(),
            writes = m.writes,
            gets = m.gets,
            tables = m.tables,
            "store closed"
        );
        Ok(())
    }
}

/// `MemStore` 的批量写入
pub struct MemBatch<'a> {
    store: &'a MemStore,
    entries: Vec<Entry>,
}

impl WriteBatch for MemBatch<'_> {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.entries.push((key.to_vec(), value.to_vec()));
    }

    fn commit(&mut self, durability: Durability) -> Result<()> {
        self.store.writable()?;
        bump(&self.store.counters.batch_commits);
        self.store.count_write(self.entries.len() as u64, durability);
        let mut inner = self.store.inner.write();
        for (k, v) in self.entries.drain(..) {
            inner.put(k, v);
        }
        self.store.maybe_freeze(&mut inner);
        Ok(())
    }

    fn reset(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CacheCallRecorder, CacheCallSink};
    use tempfile::tempdir;

    fn open_in(dir: &std::path::Path) -> MemStore {
        MemStore::open(StoreOptions::new(dir, 16, 64)).unwrap()
    }

    #[test]
    fn open_creates_data_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/db");
        let store = MemStore::open(StoreOptions::new(&path, 16, 64)).unwrap();
        assert!(path.is_dir());
        store.close().unwrap();
    }

    #[test]
    fn read_only_open_of_missing_dir_fails() {
        let dir = tempdir().unwrap();
        let opts = StoreOptions::new(dir.path().join("missing"), 16, 64).read_only(true);
        assert!(matches!(MemStore::open(opts), Err(BenchError::StoreOpen(_))));
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let store = MemStore::open(StoreOptions::new(dir.path(), 16, 64).read_only(true)).unwrap();
        assert!(store.set(b"k", b"v", Durability::NoSync).is_err());
        let mut batch = store.new_batch();
        batch.set(b"k", b"v");
        assert!(batch.commit(Durability::NoSync).is_err());
    }

    #[test]
    fn set_get_overwrite() {
        let dir = tempdir().unwrap();
        let store = open_in(dir.path());
        store.set(b"a", b"1", Durability::Sync).unwrap();
        store.set(b"a", b"22", Durability::NoSync).unwrap();
        assert_eq!(store.get(b"a").unwrap().as_deref(), Some(&b"22"[..]));
        assert_eq!(store.get(b"b").unwrap(), None);

        let m = store.metrics();
        assert_eq!(m.memtable_entries, 1);
        assert_eq!(m.memtable_bytes, 3);
        assert_eq!(m.writes, 2);
        assert_eq!(m.synced_writes, 1);
    }

    #[test]
    fn batch_applies_on_commit_only() {
        let dir = tempdir().unwrap();
        let store = open_in(dir.path());
        let mut batch = store.new_batch();
        batch.set(b"x", b"1");
        batch.set(b"y", b"2");
        assert_eq!(batch.len(), 2);
        assert_eq!(store.get(b"x").unwrap(), None);

        batch.commit(Durability::NoSync).unwrap();
        batch.reset();
        assert!(batch.is_empty());
        assert!(store.get(b"x").unwrap().is_some());
        assert!(store.get(b"y").unwrap().is_some());
        assert_eq!(store.metrics().batch_commits, 1);
    }

    #[test]
    fn reads_after_flush_go_through_caches() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(CacheCallRecorder::new());
        let store = MemStore::open(
            StoreOptions::new(dir.path(), 16, 64).sink(sink.clone() as Arc<dyn CacheCallSink>),
        )
        .unwrap();
        for i in 0..500u32 {
            store.set(&i.to_be_bytes(), &[7u8; 100], Durability::NoSync).unwrap();
        }
        store.flush_memtable();
        assert_eq!(store.metrics().tables, 1);
        assert_eq!(store.metrics().memtable_entries, 0);

        assert!(store.get(&42u32.to_be_bytes()).unwrap().is_some());
        assert!(store.get(&42u32.to_be_bytes()).unwrap().is_some());

        let m = store.metrics();
        assert_eq!(m.table_cache, HitMiss { hits: 1, misses: 1 });
        // 索引块 + 数据块，第二次全部命中
        assert_eq!(m.block_cache, HitMiss { hits: 2, misses: 2 });
        assert_eq!(m.filter.misses, 2);

        let detail = store.cache_calls();
        assert_eq!(detail[CALLER_INDEX].calls, 2);
        assert_eq!(detail[CALLER_DATA_BLOCK].hits, 1);
        assert_eq!(detail, sink.detail());
    }

    #[test]
    fn filter_rejects_most_absent_keys() {
        let dir = tempdir().unwrap();
        let store = open_in(dir.path());
        for i in 0..2000u32 {
            store.set(&i.to_be_bytes(), b"v", Durability::NoSync).unwrap();
        }
        store.flush_memtable();
        for i in 10_000..11_000u32 {
            assert_eq!(store.get(&i.to_be_bytes()).unwrap(), None);
        }
        let m = store.metrics();
        assert_eq!(m.filter.hits + m.filter.misses, 1000);
        assert!(m.filter.hits > 900, "filter hits {}", m.filter.hits);
    }

    #[test]
    fn small_memtable_freezes_automatically() {
        let dir = tempdir().unwrap();
        let store = MemStore::open(StoreOptions::new(dir.path(), 16, 64).memtable_size(1024)).unwrap();
        for i in 0..100u64 {
            store.set(&i.to_be_bytes(), &[1u8; 100], Durability::NoSync).unwrap();
        }
        let m = store.metrics();
        assert!(m.flushes >= 9);
        assert_eq!(m.memtable_entries + m.table_entries, 100);
        for i in 0..100u64 {
            assert!(store.get(&i.to_be_bytes()).unwrap().is_some(), "key {i}");
        }
    }

    #[test]
    fn newest_table_wins() {
        let dir = tempdir().unwrap();
        let store = open_in(dir.path());
        store.set(b"k", b"old", Durability::NoSync).unwrap();
        store.flush_memtable();
        store.set(b"k", b"new", Durability::NoSync).unwrap();
        store.flush_memtable();
        assert_eq!(store.get(b"k").unwrap().as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let dir = tempdir().unwrap();
        let store = MemStore::open(StoreOptions::new(dir.path(), 16, 64).memtable_size(64 * 1024)).unwrap();
        std::thread::scope(|s| {
            for t in 0..4u64 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..2000u64 {
                        let key = (t * 10_000 + i).to_be_bytes();
                        store.set(&key, &key, Durability::NoSync).unwrap();
                        let _ = store.get(&key).unwrap();
                    }
                });
            }
        });
        for t in 0..4u64 {
            for i in 0..2000u64 {
                let key = (t * 10_000 + i).to_be_bytes();
                assert_eq!(store.get(&key).unwrap().as_deref(), Some(&key[..]));
            }
        }
    }
}
