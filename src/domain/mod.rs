// ==========================================
// CAMA 导入引擎 - 领域层
// ==========================================
// 职责: 纯数据结构，不含 IO 与业务流程
// ==========================================

pub mod batch;
pub mod code_table;
pub mod property;
pub mod reconciliation;
pub mod types;

pub use batch::{BatchFailure, BatchFailureKind, BatchProgress, BatchRunSummary};
pub use code_table::{CodeDefinition, CodeDefinitionTable, InfoSourceCode, DIRECT_GROUP};
pub use property::{
    AssetInfo, CanonicalPropertyRecord, HeaderIndex, ImportContext, InspectionInfo,
    PreservedFieldSet, PreviousSale, PropertyValues, RawVendorRecord, SaleInfo, SalesHistory,
    SALES_HISTORY_FIELD,
};
pub use reconciliation::{
    ChangeRecord, ClassChange, ClassField, ComparisonReport, PropertyRef, SaleChange,
    SaleDecisionRecord,
};
pub use types::{
    BreakerState, Delimiter, FailureKind, InfoSourceCategory, SaleDecision, VendorKind,
};
