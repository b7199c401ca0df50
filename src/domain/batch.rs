// ==========================================
// CAMA 导入引擎 - 批处理领域模型
// ==========================================
// 职责: 进度事件 / 批次失败明细 / 运行汇总
// ==========================================

use serde::{Deserialize, Serialize};

/// 批次完成后的进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub total_batches: usize,
    pub processed_items: usize,
    pub total_items: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchFailureKind {
    CircuitOpen,
    Permanent,
    RetriesExhausted,
    RollbackFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub item_count: usize,
    pub attempts: u32,
    pub kind: BatchFailureKind,
    pub message: String,
}

// ==========================================
// BatchRunSummary - 运行汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRunSummary {
    pub total_items: usize,
    pub total_batches: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub rolled_back_batches: usize,
    /// 取消后未启动的批次
    pub skipped_batches: usize,
    pub failures: Vec<BatchFailure>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl BatchRunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed_batches == 0 && !self.cancelled
    }
}
