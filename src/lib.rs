//! 有序 KV 存储压测库
//!
//! 在可配置的并发读写负载下测量存储的吞吐和缓存效率，
//! 包括顺序灌数、批量灌数、随机写、随机读四种负载。
//!
//! 特性：
//! - Keccak-256 派生的确定性 key
//! - 按线程均分任务，每个线程独占随机数源和哈希状态
//! - 阶段前后采样存储计数器并计算差值
//! - 按调用点统计的缓存命中报告

pub mod config;
pub mod error;
pub mod key;
pub mod metrics;
pub mod orchestrator;
pub mod partition;
pub mod store;
pub mod workload;
