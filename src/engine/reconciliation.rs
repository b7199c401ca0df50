// ==========================================
// CAMA 导入引擎 - 对账
// ==========================================
// 职责: 新文件 vs 已存快照 → ComparisonReport；售价决策应用与审计
// ==========================================

pub mod comparator;
pub mod engine;
pub mod sales_decision;
pub mod snapshot_loader;

pub use comparator::{compare, sales_equal, PRICE_TOLERANCE};
pub use engine::{ParsedSource, ReconciliationEngine, ReconciliationOutcome};
pub use sales_decision::{
    apply_decision, apply_decisions, build_decision_records, record_decisions, resolve_decision,
};
pub use snapshot_loader::{load_snapshot, SnapshotPaging};
