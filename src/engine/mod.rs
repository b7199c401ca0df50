// ==========================================
// CAMA 导入引擎 - 引擎层
// ==========================================
// 职责: 分批持久化（重试 / 熔断 / 回滚）与快照对账
// 红线: Engine 不拼 SQL，持久化只经 PersistenceGateway
// ==========================================

pub mod batch;
pub mod reconciliation;

// 重导出核心引擎
pub use batch::{BatchProcessor, CircuitBreaker, ProcessOptions, RetryPolicy};
pub use reconciliation::{ReconciliationEngine, ReconciliationOutcome};
