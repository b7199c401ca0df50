// ==========================================
// CAMA 导入引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: PersistenceGateway 接口与 SQLite 适配器
// 约束: 所有查询使用参数化
// ==========================================

pub mod error;
pub mod property_gateway;
pub mod property_repo;

#[cfg(test)]
pub(crate) mod memory_gateway;

// 重导出核心仓储
pub use error::{PersistenceError, PersistenceResult};
pub use property_gateway::{PersistenceGateway, UpsertStats};
pub use property_repo::SqlitePropertyGateway;
