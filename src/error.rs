//! 错误处理模块
//! 定义了所有应用级别的错误类型

use thiserror::Error;

/// 应用主错误类型
#[derive(Debug, Clone, Error)]
pub enum BenchError {
    /// 配置错误，在任何阶段开始前失败
    #[error("Configuration error: {0}")]
    Config(String),
    /// 存储打开失败，整个运行中止
    #[error("Store open error: {0}")]
    StoreOpen(String),
    /// 单次读写失败
    #[error("Store operation error: {0}")]
    Store(String),
    /// 工作线程异常退出
    #[error("Worker error: {0}")]
    Worker(String),
    /// IO错误
    #[error("IO error: {0}")]
    Io(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, BenchError>;

impl From<std::io::Error> for BenchError {
    fn from(err: std::io::Error) -> Self {
        BenchError::Io(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for BenchError {
    fn from(err: rocksdb::Error) -> Self {
        BenchError::Store(err.to_string())
    }
}

/// 错误上下文扩展trait
pub trait ErrorContext<T> {
    /// 添加上下文信息
    fn with_context(self, context: &str) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| match e {
            BenchError::Config(msg) => BenchError::Config(format!("{}: {}", context, msg)),
            BenchError::StoreOpen(msg) => BenchError::StoreOpen(format!("{}: {}", context, msg)),
            BenchError::Store(msg) => BenchError::Store(format!("{}: {}", context, msg)),
            BenchError::Worker(msg) => BenchError::Worker(format!("{}: {}", context, msg)),
            BenchError::Io(msg) => BenchError::Io(format!("{}: {}", context, msg)),
        })
    }
}
