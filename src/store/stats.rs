//! 解析 RocksDB 统计文本
//!
//! `Options::get_statistics` 输出形如：
//!
//! ```text
//! rocksdb.block.cache.hit COUNT : 12
//! rocksdb.db.flush.micros P50 : 0.000000 P95 : 0.000000 ... COUNT : 3 SUM : 811
//! ```
//!
//! 计数器和直方图都带 `COUNT`，这里只取这一项。

use super::{CALLER_DATA_BLOCK, CALLER_FILTER, CALLER_INDEX, CacheCallDetail, CallStats, HitMiss};
use std::collections::HashMap;

pub const BLOCK_CACHE_HIT: &str = "rocksdb.block.cache.hit";
pub const BLOCK_CACHE_MISS: &str = "rocksdb.block.cache.miss";
pub const INDEX_HIT: &str = "rocksdb.block.cache.index.hit";
pub const INDEX_MISS: &str = "rocksdb.block.cache.index.miss";
pub const DATA_HIT: &str = "rocksdb.block.cache.data.hit";
pub const DATA_MISS: &str = "rocksdb.block.cache.data.miss";
pub const FILTER_BLOCK_HIT: &str = "rocksdb.block.cache.filter.hit";
pub const FILTER_BLOCK_MISS: &str = "rocksdb.block.cache.filter.miss";
/// 过滤器判定 key 不存在，省掉一次读
pub const BLOOM_USEFUL: &str = "rocksdb.bloom.filter.useful";
/// 过滤器判定可能存在
pub const BLOOM_POSITIVE: &str = "rocksdb.bloom.filter.full.positive";
/// 打开 sst 文件，即表缓存未命中
pub const FILE_OPENS: &str = "rocksdb.no.file.opens";
pub const FLUSHES: &str = "rocksdb.db.flush.micros";

/// 一次统计快照
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tickers(HashMap<String, u64>);

impl Tickers {
    pub fn parse(text: &str) -> Self {
        let counts = text
            .lines()
            .filter_map(|line| {
                let name = line.split_whitespace().next()?;
                let (_, rest) = line.split_once("COUNT : ")?;
                let count = rest.split_whitespace().next()?.parse().ok()?;
                Some((name.to_string(), count))
            })
            .collect();
        Self(counts)
    }

    /// 未出现的计数视为 0
    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or_default()
    }

    pub fn hit_miss(&self, hit: &str, miss: &str) -> HitMiss {
        HitMiss {
            hits: self.get(hit),
            misses: self.get(miss),
        }
    }

    /// 过滤器“命中”指直接排除了 key
    pub fn filter(&self) -> HitMiss {
        self.hit_miss(BLOOM_USEFUL, BLOOM_POSITIVE)
    }

    pub fn block_cache(&self) -> HitMiss {
        self.hit_miss(BLOCK_CACHE_HIT, BLOCK_CACHE_MISS)
    }

    /// 没有调用过的调用点不出现在结果里
    pub fn cache_calls(&self) -> CacheCallDetail {
        [
            (CALLER_INDEX, INDEX_HIT, INDEX_MISS),
            (CALLER_DATA_BLOCK, DATA_HIT, DATA_MISS),
            (CALLER_FILTER, FILTER_BLOCK_HIT, FILTER_BLOCK_MISS),
        ]
        .into_iter()
        .filter_map(|(caller, hit, miss)| {
            let hits = self.get(hit);
            let calls = hits + self.get(miss);
            (calls > 0).then(|| (caller.to_string(), CallStats { hits, calls }))
        })
        .collect()
    }
}
