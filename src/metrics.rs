//! 指标汇总模块
//! 阶段前后采样存储计数器，计算差值并格式化按调用点的缓存报告

use crate::store::{CacheCallDetail, Store, StoreMetrics};
use std::fmt::Write as _;
use tracing::warn;

/// 某一时刻的缓存相关计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub filter_hits: u64,
    pub filter_misses: u64,
    pub block_cache_hits: u64,
    pub block_cache_misses: u64,
    pub table_cache_hits: u64,
    pub table_cache_misses: u64,
}

impl From<&StoreMetrics> for MetricsSnapshot {
    fn from(m: &StoreMetrics) -> Self {
        Self {
            filter_hits: m.filter.hits,
            filter_misses: m.filter.misses,
            block_cache_hits: m.block_cache.hits,
            block_cache_misses: m.block_cache.misses,
            table_cache_hits: m.table_cache.hits,
            table_cache_misses: m.table_cache.misses,
        }
    }
}

impl MetricsSnapshot {
    /// 读取存储当前的累计计数
    pub fn capture<S: Store>(store: &S) -> Self {
        Self::from(&store.metrics())
    }

    /// 每次点查平均触发的 I/O 次数（块缓存与表缓存未命中之和）
    pub fn avg_io_per_get(&self, reads: u64) -> f64 {
        if reads == 0 {
            0.0
        } else {
            (self.block_cache_misses + self.table_cache_misses) as f64 / reads as f64
        }
    }
}

fn floored(field: &'static str, before: u64, after: u64) -> u64 {
    after.checked_sub(before).unwrap_or_else(|| {
        warn!(field, before, after, "counter went backwards, delta floored at 0");
        0
    })
}

/// 逐字段计算 `b - a`，计数器倒退时取 0
pub fn delta(a: &MetricsSnapshot, b: &MetricsSnapshot) -> MetricsSnapshot {
    MetricsSnapshot {
        filter_hits: floored("filter_hits", a.filter_hits, b.filter_hits),
        filter_misses: floored("filter_misses", a.filter_misses, b.filter_misses),
        block_cache_hits: floored("block_cache_hits", a.block_cache_hits, b.block_cache_hits),
        block_cache_misses: floored(
            "block_cache_misses",
            a.block_cache_misses,
            b.block_cache_misses,
        ),
        table_cache_hits: floored("table_cache_hits", a.table_cache_hits, b.table_cache_hits),
        table_cache_misses: floored(
            "table_cache_misses",
            a.table_cache_misses,
            b.table_cache_misses,
        ),
    }
}

/// 格式化按调用点的缓存统计，调用点按字典序排列
pub fn format_cache_call_detail(detail: &CacheCallDetail) -> String {
    let mut out = String::new();
    out.push_str("Cache Statistics:\n");
    out.push_str("--------------------------------------------------------\n");
    out.push_str("Caller\t\tHits\tMisses\tCalls\tHitRate\n");
    for (caller, stats) in detail {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{:.2}",
            caller,
            stats.hits,
            stats.misses(),
            stats.calls,
            stats.hit_rate()
        );
    }
    out
}
