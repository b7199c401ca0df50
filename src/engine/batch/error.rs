// ==========================================
// CAMA 导入引擎 - 批处理错误类型
// ==========================================
// 致命: 重试耗尽 / 回滚失败（终止整次运行）
// 非致命: 熔断打开 / 永久错误（计入失败批次）
// ==========================================

use crate::domain::batch::BatchRunSummary;
use crate::repository::error::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("熔断器已打开，{retry_after_ms}ms 后允许试探")]
    CircuitOpen { retry_after_ms: u64 },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("重试 {attempts} 次后仍失败: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: PersistenceError,
    },

    #[error("回滚失败，存储状态可能不一致: {message}")]
    RollbackFailure { message: String },
}

impl BatchError {
    /// 是否终止整次运行
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BatchError::RetriesExhausted { .. } | BatchError::RollbackFailure { .. }
        )
    }
}

/// 运行被终止时携带已完成部分的汇总
#[derive(Error, Debug, Clone)]
#[error("批处理运行终止 (batch {batch_index}): {cause}")]
pub struct BatchRunError {
    pub batch_index: usize,
    pub cause: BatchError,
    pub summary: BatchRunSummary,
}
