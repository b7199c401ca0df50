// ==========================================
// CAMA 导入引擎 - 核心库
// ==========================================
// 职责: CAMA 厂商文件（BRT / Microsystems）导入、对账与分批持久化
// 技术栈: Rust + tokio + SQLite
// 系统定位: 人工最终决策（售价变更必须人工确认）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 持久化网关
pub mod repository;

// 引擎层 - 批处理与对账
pub mod engine;

// 导入层 - 厂商文件
pub mod importer;

// 配置层 - 导入参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{BreakerState, Delimiter, FailureKind, SaleDecision, VendorKind};

// 领域实体
pub use domain::{
    BatchRunSummary, CanonicalPropertyRecord, CodeDefinitionTable, ComparisonReport,
    ImportContext, PreservedFieldSet, SaleInfo,
};

// 引擎
pub use engine::{BatchProcessor, CircuitBreaker, ProcessOptions, ReconciliationEngine};

// 导入器
pub use importer::{
    ImportError, ImportResult, ImportRunSummary, PropertyImporter, PropertyImporterImpl,
    UpdatePlan,
};

// 配置与持久化
pub use config::{ConfigManager, ImportConfig, ImportConfigReader};
pub use repository::{PersistenceGateway, SqlitePropertyGateway};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "CAMA 导入引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
