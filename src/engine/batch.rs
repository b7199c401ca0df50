// ==========================================
// CAMA 导入引擎 - 批处理引擎
// ==========================================
// 职责: 把任意持久化调用包装为带超时 / 重试 / 熔断 / 回滚的分批执行
// 输入: 待写入项 + BatchWriter + ProcessOptions
// 输出: BatchRunSummary（或携带部分汇总的 BatchRunError）
// ==========================================

pub mod circuit_breaker;
pub mod error;
pub mod processor;
pub mod retry;
pub mod transaction;

pub use circuit_breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
pub use error::{BatchError, BatchRunError};
pub use processor::{BatchProcessor, ProcessOptions, ProgressCallback};
pub use retry::RetryPolicy;
pub use transaction::{
    BatchWriter, DeleteWriter, TransactionManager, TransactionRecord, TransactionRecorder,
    TxOperation, UpsertWriter,
};
