// ==========================================
// CAMA 导入引擎 - 导入层
// ==========================================
// 职责: 厂商文件 → 规范化记录 → 持久化
// 支持: Microsystems (管道分隔) / BRT (CSV / TAB) 源文件与代码文件
// ==========================================

// 模块声明
pub mod code_table_parser;
pub mod composite_key;
pub mod conflict_handler;
pub mod data_cleaner;
pub mod error;
pub mod field_mapper;
pub mod field_preservation;
pub mod file_parser;
pub mod format_detector;
pub mod importer_trait;
pub mod property_importer_impl;

// 重导出核心类型
pub use code_table_parser::{classify_info_source, parse_code_file};
pub use composite_key::{composite_key, key_for_record};
pub use conflict_handler::{ConflictHandlerImpl, DedupeOutcome, KeyCollision};
pub use data_cleaner::DataCleanerImpl;
pub use error::{ImportError, ImportResult};
pub use field_mapper::FieldMapperImpl;
pub use field_preservation::FieldPreservationMerger;
pub use file_parser::{ParseOutcome, RowWarning, VendorFileParser};
pub use format_detector::{detect_format, DetectedFormat};
pub use property_importer_impl::{ImportRunSummary, PropertyImporterImpl, UpdatePlan};

// 重导出 Trait 接口
pub use importer_trait::{ConflictHandler, DataCleaner, FieldMapper, FileParser, PropertyImporter};
