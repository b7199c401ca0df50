// ==========================================
// CAMA 导入引擎 - 配置层
// ==========================================
// 职责: 导入 / 批处理 / 对账参数，缺省值 + 全局覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config;
pub mod import_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use import_config::{ImportConfig, DEFAULT_PRESERVED_FIELDS};
pub use import_config_trait::ImportConfigReader;
