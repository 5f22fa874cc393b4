//! 配置模块
//! 定义所有应用级别的常量和压测配置

use crate::error::{BenchError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

/// key 长度（字节）
pub const KEY_LEN: usize = 32;

/// value 长度（字节）
pub const VALUE_LEN: usize = 110;

/// 批量写入每批条数
pub const BATCH_SIZE: usize = 1000;

/// 每隔多少次操作输出一次进度
pub const PROGRESS_INTERVAL: u64 = 1_000_000;

/// 预热读次数 = 总记录数 / WARMUP_DIVISOR
pub const WARMUP_DIVISOR: u64 = 10_000;

/// 预热与正式读之间的等待时间（秒）
pub const SETTLE_DELAY_SECS: u64 = 5;

/// 读写缓存的最小内存（MB）
pub const MIN_CACHE_MB: usize = 16;

/// 最少文件句柄数
pub const MIN_HANDLES: usize = 16;

/// 打开存储时申请的文件句柄数
pub const MAX_OPEN_FILES: usize = 100_000;

/// 命令行默认值
pub mod defaults {
    pub const TOTAL_RECORDS: u64 = 2_000_000_000;
    pub const WRITE_OPS: u64 = 10_000_000;
    pub const READ_OPS: u64 = 10_000_000;
    pub const CACHE_SIZE_MB: usize = 512;
    pub const THREADS: u64 = 32;
    pub const DATA_DIR: &str = "./data/bench_kv";
    pub const LOG_LEVEL: u8 = 3;
}

/// 基准测试配置
pub mod bench {
    /// 采样数量
    pub const SAMPLE_SIZE: usize = 20;

    /// 测量时间（秒）
    pub const MEASUREMENT_TIME_SECS: u64 = 10;

    /// 每次迭代的操作数量
    pub const OPS_PER_ITER: u64 = 10_000;

    /// 预写入的记录数
    pub const PRELOAD_RECORDS: u64 = 100_000;

    /// 随机种子
    pub const SEED: u64 = 42;
}

/// 错误消息常量
pub mod messages {
    pub const STORE_OPEN_FAILED: &str = "Failed to open store";
    pub const PRELOAD_FAILED: &str = "Failed to preload store";
    pub const PHASE_FAILED: &str = "Benchmark phase failed";
    pub const INVALID_SPEC: &str = "Invalid workload spec";
}

/// 单次读写失败时的处理策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// 计数后继续，不重试
    #[default]
    Ignore,
    /// 该线程遇到第一个错误即退出
    FailFast,
}

/// 压测配置，启动时构建一次，之后不可变
#[derive(Clone, Debug)]
pub struct WorkloadSpec {
    pub needs_init: bool,
    pub total_records: u64,
    pub write_ops: u64,
    pub read_ops: u64,
    pub thread_count: u64,
    pub batch_mode: bool,
    pub cache_size_mb: usize,
    pub data_dir: PathBuf,
    pub log_level: u8,
    /// 固定种子；为空时按当前时间加线程号生成
    pub seed: Option<u64>,
    pub settle_delay: Duration,
    pub error_policy: ErrorPolicy,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            needs_init: false,
            total_records: defaults::TOTAL_RECORDS,
            write_ops: defaults::WRITE_OPS,
            read_ops: defaults::READ_OPS,
            thread_count: defaults::THREADS,
            batch_mode: true,
            cache_size_mb: defaults::CACHE_SIZE_MB,
            data_dir: PathBuf::from(defaults::DATA_DIR),
            log_level: defaults::LOG_LEVEL,
            seed: None,
            settle_delay: Duration::from_secs(SETTLE_DELAY_SECS),
            error_policy: ErrorPolicy::Ignore,
        }
    }
}

impl WorkloadSpec {
    /// 校验配置，任何阶段开始前调用
    pub fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            return Err(BenchError::Config("thread count must be at least 1".into()));
        }
        if self.total_records == 0 && (self.write_ops > 0 || self.read_ops > 0) {
            return Err(BenchError::Config(
                "random write/read phases need a non-empty keyspace (total records > 0)".into(),
            ));
        }
        Ok(())
    }

    /// 数字日志级别对应的过滤级别，3 及以上输出进度信息
    pub fn level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 => LevelFilter::OFF,
            1 => LevelFilter::ERROR,
            2 => LevelFilter::WARN,
            3 => LevelFilter::INFO,
            4 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}
