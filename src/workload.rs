//! 工作负载模块
//!
//! 四种负载共用一个形状：序号 -> key -> 存储操作，
//! 区别只在于 key 是否经过哈希、是否攒批以及写入确认策略。

use crate::config::{BATCH_SIZE, ErrorPolicy, PROGRESS_INTERVAL, VALUE_LEN};
use crate::error::{BenchError, Result};
use crate::key::{Key, KeyDeriver, encode_index};
use crate::store::{Durability, Store, WriteBatch};
use rand::prelude::*;
use rand::rngs::SmallRng;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// 负载类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pattern {
    /// 顺序写入，key 为原始编码，不经过哈希
    Sequential,
    /// 顺序序号、哈希 key、攒批写入
    Batch,
    /// 在 `[0, keyspace)` 内均匀随机写
    RandomWrite { keyspace: u64 },
    /// 在 `[0, keyspace)` 内均匀随机读
    RandomRead { keyspace: u64 },
}

impl Pattern {
    /// 名称（用于日志）
    pub fn name(&self) -> &'static str {
        match self {
            Pattern::Sequential => "seq write",
            Pattern::Batch => "batch write",
            Pattern::RandomWrite { .. } => "random write",
            Pattern::RandomRead { .. } => "random read",
        }
    }

    fn keyspace(&self) -> Option<u64> {
        match self {
            Pattern::RandomWrite { keyspace } | Pattern::RandomRead { keyspace } => Some(*keyspace),
            _ => None,
        }
    }
}

/// 单个工作线程的执行结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// 执行的操作数
    pub ops: u64,
    /// 失败的操作数
    pub failed: u64,
    pub hits: u64,
    pub misses: u64,
    /// 批量提交次数
    pub commits: u64,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.ops += other.ops;
        self.failed += other.failed;
        self.hits += other.hits;
        self.misses += other.misses;
        self.commits += other.commits;
    }

    /// 读命中率
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 线程的随机种子：指定了基准种子就用它加线程号，否则用当前时间加线程号
pub fn seed_for(base: Option<u64>, thread_id: u64) -> u64 {
    let base = base.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    });
    base.wrapping_add(thread_id)
}

/// 工作线程
///
/// 持有自己的随机数源和哈希状态，只能在所属线程内构造和使用。
pub struct Worker {
    thread_id: u64,
    deriver: KeyDeriver,
    rng: SmallRng,
    value: [u8; VALUE_LEN],
    policy: ErrorPolicy,
}

impl Worker {
    pub fn new(thread_id: u64, seed: u64) -> Self {
        Self {
            thread_id,
            deriver: KeyDeriver::new(),
            rng: SmallRng::seed_from_u64(seed),
            value: [0u8; VALUE_LEN],
            policy: ErrorPolicy::default(),
        }
    }

    pub fn policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 执行恰好 `count` 次操作
    pub fn run<S: Store>(&mut self, pattern: Pattern, count: u64, store: &S) -> Result<WorkerStats> {
        if pattern.keyspace() == Some(0) {
            return Err(BenchError::Config(format!("{} needs a non-empty keyspace", pattern.name())));
        }

        let start = Instant::now();
        let mut stats = WorkerStats::default();
        let mut batch = (pattern == Pattern::Batch).then(|| store.new_batch());

        for i in 0..count {
            let index = self.index(pattern, count, i);
            let key = self.key(pattern, index);
            let (outcome, affected) = match (pattern, batch.as_mut()) {
                (Pattern::RandomRead { .. }, _) => match store.get(&key) {
                    Ok(Some(value)) => {
                        drop(value);
                        stats.hits += 1;
                        (Ok(()), 1)
                    }
                    Ok(None) => {
                        stats.misses += 1;
                        (Ok(()), 1)
                    }
                    Err(e) => (Err(e), 1),
                },
                (Pattern::Batch, Some(batch)) => {
                    self.rng.fill_bytes(&mut self.value);
                    batch.set(&key, &self.value);
                    if batch.len() >= BATCH_SIZE {
                        let pending = batch.len() as u64;
                        (Self::commit(batch, &mut stats), pending)
                    } else {
                        (Ok(()), 0)
                    }
                }
                _ => {
                    self.rng.fill_bytes(&mut self.value);
                    (store.set(&key, &self.value, Durability::Sync), 1)
                }
            };
            self.settle(outcome, affected, &mut stats)?;

            if i > 0 && i % PROGRESS_INTERVAL == 0 {
                self.progress(pattern, i, start, &key);
            }
        }

        if let Some(batch) = batch.as_mut() {
            if !batch.is_empty() {
                let pending = batch.len() as u64;
                let outcome = Self::commit(batch, &mut stats);
                self.settle(outcome, pending, &mut stats)?;
            }
        }

        stats.ops = count;
        let secs = start.elapsed().as_secs_f64();
        let rate = if secs > 0.0 { count as f64 / secs } else { 0.0 };
        info!(
            thread = self.thread_id,
            "{} done {:.2}s, {:.2} ops/s",
            pattern.name(),
            secs,
            rate
        );
        Ok(stats)
    }

    fn index(&mut self, pattern: Pattern, count: u64, i: u64) -> u64 {
        match pattern {
            Pattern::Sequential | Pattern::Batch => self.thread_id * count + i,
            Pattern::RandomWrite { keyspace } | Pattern::RandomRead { keyspace } => {
                self.rng.random_range(0..keyspace)
            }
        }
    }

    fn key(&mut self, pattern: Pattern, index: u64) -> Key {
        match pattern {
            Pattern::Sequential => encode_index(index),
            _ => self.deriver.derive(index),
        }
    }

    /// 异步落盘提交并清空批次，只有成功的提交计入 `commits`
    fn commit<B: WriteBatch>(batch: &mut B, stats: &mut WorkerStats) -> Result<()> {
        let outcome = batch.commit(Durability::NoSync);
        batch.reset();
        if outcome.is_ok() {
            stats.commits += 1;
        }
        outcome
    }

    /// 按策略处理操作结果，失败时把受影响的写入数计入失败
    fn settle(&self, outcome: Result<()>, affected: u64, stats: &mut WorkerStats) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                stats.failed += affected;
                match self.policy {
                    ErrorPolicy::Ignore => {
                        debug!(thread = self.thread_id, error = %e, "operation failed, ignored");
                        Ok(())
                    }
                    ErrorPolicy::FailFast => Err(e),
                }
            }
        }
    }

    fn progress(&self, pattern: Pattern, done: u64, start: Instant, key: &Key) {
        let ms = start.elapsed().as_millis() as u64;
        let hps = if ms > 0 { done * 1000 / ms } else { 0 };
        if pattern == Pattern::Batch {
            info!(thread = self.thread_id, sample_key = %hex::encode(key), "used time {} ms, hps {}", ms, hps);
        } else {
            info!(thread = self.thread_id, "used time {} ms, hps {}", ms, hps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CacheCallDetail, StoreMetrics, StoreOptions};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// 记录每次写入与提交的存储替身
    #[derive(Default)]
    struct RecordingStore {
        data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
        writes: Mutex<Vec<(Vec<u8>, Durability)>>,
        commits: Mutex<Vec<(usize, Durability)>>,
        fail: bool,
    }

    impl RecordingStore {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn check(&self) -> Result<()> {
            if self.fail {
                Err(BenchError::Store("injected failure".into()))
            } else {
                Ok(())
            }
        }
    }

    struct RecordingBatch<'a> {
        store: &'a RecordingStore,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    }

    impl WriteBatch for RecordingBatch<'_> {
        fn set(&mut self, key: &[u8], value: &[u8]) {
            self.entries.push((key.to_vec(), value.to_vec()));
        }

        fn commit(&mut self, durability: Durability) -> Result<()> {
            self.store.check()?;
            self.store.commits.lock().push((self.entries.len(), durability));
            self.store.data.lock().extend(self.entries.drain(..));
            Ok(())
        }

        fn reset(&mut self) {
            self.entries.clear();
        }

        fn len(&self) -> usize {
            self.entries.len()
        }
    }

    impl Store for RecordingStore {
        type Value = Vec<u8>;
        type Batch<'a> = RecordingBatch<'a>;

        fn open(_opts: StoreOptions) -> Result<Self> {
            Ok(Self::default())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.check()?;
            Ok(self.data.lock().get(key).cloned())
        }

        fn set(&self, key: &[u8], value: &[u8], durability: Durability) -> Result<()> {
            self.check()?;
            self.writes.lock().push((key.to_vec(), durability));
            self.data.lock().insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn new_batch(&self) -> RecordingBatch<'_> {
            RecordingBatch {
                store: self,
                entries: Vec::new(),
            }
        }

        fn metrics(&self) -> StoreMetrics {
            StoreMetrics::default()
        }

        fn cache_calls(&self) -> CacheCallDetail {
            CacheCallDetail::new()
        }

        fn close(self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn batch_load_commits_every_thousand_and_the_tail() {
        let store = RecordingStore::default();
        let stats = Worker::new(0, 1).run(Pattern::Batch, 2500, &store).unwrap();

        let commits = store.commits.lock().clone();
        assert_eq!(
            commits,
            vec![
                (1000, Durability::NoSync),
                (1000, Durability::NoSync),
                (500, Durability::NoSync)
            ]
        );
        assert_eq!(stats.commits, 3);
        assert_eq!(stats.ops, 2500);
        assert!(store.writes.lock().is_empty());

        let mut d = KeyDeriver::new();
        let data = store.data.lock();
        assert_eq!(data.len(), 2500);
        assert!((0..2500).all(|i| data.contains_key(&d.derive(i)[..])));
    }

    #[test]
    fn batch_load_skips_empty_tail_commit() {
        let store = RecordingStore::default();
        Worker::new(0, 1).run(Pattern::Batch, 2000, &store).unwrap();
        assert_eq!(store.commits.lock().len(), 2);
    }

    #[test]
    fn sequential_uses_raw_disjoint_indices() {
        let store = RecordingStore::default();
        Worker::new(1, 1).run(Pattern::Sequential, 5, &store).unwrap();

        let writes = store.writes.lock();
        let keys: Vec<Vec<u8>> = writes.iter().map(|(k, _)| k.clone()).collect();
        let expected: Vec<Vec<u8>> = (5..10).map(|i| encode_index(i).to_vec()).collect();
        assert_eq!(keys, expected);
        assert!(writes.iter().all(|(_, d)| *d == Durability::Sync));
        assert!(store.commits.lock().is_empty());
    }

    #[test]
    fn values_are_fresh_per_write() {
        let store = RecordingStore::default();
        Worker::new(0, 9).run(Pattern::Sequential, 2, &store).unwrap();
        let data = store.data.lock();
        let a = &data[&encode_index(0).to_vec()];
        let b = &data[&encode_index(1).to_vec()];
        assert_eq!(a.len(), VALUE_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn random_write_stays_in_keyspace_and_is_seed_reproducible() {
        let keyspace = 50;
        let mut d = KeyDeriver::new();
        let valid: Vec<Key> = (0..keyspace).map(|i| d.derive(i)).collect();

        let run = |seed| {
            let store = RecordingStore::default();
            Worker::new(3, seed)
                .run(Pattern::RandomWrite { keyspace }, 200, &store)
                .unwrap();
            store.writes.into_inner().into_iter().map(|(k, _)| k).collect::<Vec<_>>()
        };
        let first = run(seed_for(Some(7), 3));
        assert_eq!(first.len(), 200);
        assert!(first.iter().all(|k| valid.iter().any(|v| &v[..] == k.as_slice())));
        assert_eq!(first, run(seed_for(Some(7), 3)));
    }

    #[test]
    fn random_read_counts_hits_and_misses() {
        let store = RecordingStore::default();
        let stats = Worker::new(0, 1)
            .run(Pattern::RandomRead { keyspace: 100 }, 300, &store)
            .unwrap();
        assert_eq!(stats.misses, 300);
        assert_eq!(stats.hit_rate(), 0.0);

        Worker::new(0, 1).run(Pattern::Batch, 100, &store).unwrap();
        let stats = Worker::new(0, 2)
            .run(Pattern::RandomRead { keyspace: 100 }, 300, &store)
            .unwrap();
        assert_eq!(stats.hits, 300);
        assert_eq!(stats.hit_rate(), 1.0);
    }

    #[test]
    fn failures_are_counted_when_ignored() {
        let store = RecordingStore::failing();
        let stats = Worker::new(0, 1)
            .run(Pattern::RandomWrite { keyspace: 10 }, 25, &store)
            .unwrap();
        assert_eq!(stats.ops, 25);
        assert_eq!(stats.failed, 25);

        let stats = Worker::new(0, 1).run(Pattern::Batch, 1500, &store).unwrap();
        assert_eq!(stats.failed, 1500);
        assert_eq!(stats.commits, 0);
    }

    #[test]
    fn failed_commits_are_not_counted() {
        let store = RecordingStore::failing();
        let stats = Worker::new(0, 1).run(Pattern::Batch, 2500, &store).unwrap();
        assert_eq!(stats.commits, 0);
        assert_eq!(stats.failed, 2500);
        assert!(store.commits.lock().is_empty());

        let err = Worker::new(0, 1)
            .policy(ErrorPolicy::FailFast)
            .run(Pattern::Batch, 1000, &store)
            .unwrap_err();
        assert!(matches!(err, BenchError::Store(_)));
    }

    #[test]
    fn fail_fast_returns_first_error() {
        let store = RecordingStore::failing();
        let err = Worker::new(0, 1)
            .policy(ErrorPolicy::FailFast)
            .run(Pattern::Sequential, 10, &store)
            .unwrap_err();
        assert!(matches!(err, BenchError::Store(_)));
    }

    #[test]
    fn empty_keyspace_is_rejected() {
        let store = RecordingStore::default();
        let err = Worker::new(0, 1)
            .run(Pattern::RandomRead { keyspace: 0 }, 1, &store)
            .unwrap_err();
        assert!(matches!(err, BenchError::Config(_)));
    }

    #[test]
    fn seeds_differ_per_thread() {
        assert_ne!(seed_for(Some(1), 0), seed_for(Some(1), 1));
        assert_ne!(seed_for(None, 0), seed_for(None, 1));
    }

    #[test]
    fn merge_sums_fields() {
        let mut a = WorkerStats {
            ops: 1,
            failed: 2,
            hits: 3,
            misses: 4,
            commits: 5,
        };
        a.merge(&a.clone());
        assert_eq!(a.ops, 2);
        assert_eq!(a.commits, 10);
    }
}
