//! 任务切分模块

use crate::error::{BenchError, Result};

/// 单个线程分到的操作数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadShare {
    pub thread_id: u64,
    pub op_count: u64,
}

/// 把 `total` 次操作平均分给 `threads` 个线程
///
/// 余数直接丢弃，不会补给任何线程。
pub fn partition(total: u64, threads: u64) -> Result<Vec<ThreadShare>> {
    if threads == 0 {
        return Err(BenchError::Config("cannot partition work across 0 threads".into()));
    }
    let per = total / threads;
    Ok((0..threads)
        .map(|thread_id| ThreadShare {
            thread_id,
            op_count: per,
        })
        .collect())
}

/// 实际分配出去的操作总数
pub fn assigned(shares: &[ThreadShare]) -> u64 {
    shares.iter().map(|s| s.op_count).sum()
}
