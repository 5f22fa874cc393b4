//! 按调用点统计的缓存命中计数
//!
//! 计数器由存储持有并注入，报告侧只做只读访问。

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 单个调用点的命中与调用次数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallStats {
    pub hits: u64,
    pub calls: u64,
}

impl CallStats {
    #[inline]
    pub fn misses(&self) -> u64 {
        self.calls.saturating_sub(self.hits)
    }

    /// 命中率，没有调用时为 0
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.hits as f64 / self.calls as f64
        }
    }
}

/// 调用点 -> 统计，按调用点字典序排列
pub type CacheCallDetail = BTreeMap<String, CallStats>;

/// 缓存调用统计接收端
pub trait CacheCallSink: Send + Sync {
    /// 记录一次缓存查找
    fn record(&self, caller: &'static str, hit: bool);

    /// 当前累计值的只读快照
    fn detail(&self) -> CacheCallDetail;
}

#[derive(Default)]
struct SiteCounter {
    hits: AtomicU64,
    calls: AtomicU64,
}

/// 默认实现：每个调用点一对原子计数器
#[derive(Default)]
pub struct CacheCallRecorder {
    sites: RwLock<HashMap<&'static str, Arc<SiteCounter>>>,
}

impl CacheCallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, caller: &'static str) -> Arc<SiteCounter> {
        if let Some(c) = self.sites.read().get(caller) {
            return Arc::clone(c);
        }
        Arc::clone(self.sites.write().entry(caller).or_default())
    }
}

impl CacheCallSink for CacheCallRecorder {
    fn record(&self, caller: &'static str, hit: bool) {
        let counter = self.counter(caller);
        counter.calls.fetch_add(1, Ordering::AcqRel);
        if hit {
            counter.hits.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn detail(&self) -> CacheCallDetail {
        self.sites
            .read()
            .iter()
            .map(|(caller, c)| {
                // 先读 hits 再读 calls，保证 hits <= calls
                let hits = c.hits.load(Ordering::Acquire);
                let calls = c.calls.load(Ordering::Acquire);
                (caller.to_string(), CallStats { hits, calls })
            })
            .collect()
    }
}
