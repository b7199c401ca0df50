// ==========================================
// CAMA 导入引擎 - 导入模块错误类型
// ==========================================
// 行级问题不是错误（计入告警）；此处只放终止本次运行的错误
// 工具: thiserror 派生宏
// ==========================================

use crate::engine::batch::BatchRunError;
use crate::repository::error::PersistenceError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式无法识别: {0}")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("源文件解析失败: {0}")]
    ParseError(String),

    #[error("源文件无有效数据行（共跳过 {skipped} 行）")]
    NoValidRows { skipped: usize },

    #[error("代码文件解析失败: {0}")]
    CodeFileParseError(String),

    // ===== 配置错误 =====
    #[error("配置读取失败 (key: {key}): {message}")]
    ConfigReadError { key: String, message: String },

    #[error("配置值格式错误 (key: {key}, value: {value}): {message}")]
    ConfigValueError {
        key: String,
        value: String,
        message: String,
    },

    // ===== 业务规则错误 =====
    #[error("存在 {count} 条待决售价变更，禁止提交更新")]
    PendingSaleDecisions { count: usize },

    #[error("售价历史无法读取 (key: {key}): {message}")]
    SalesHistoryError { key: String, message: String },

    #[error("决策目标不存在售价变更: {0}")]
    UnknownSaleChange(String),

    // ===== 下游错误 =====
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    BatchRun(#[from] Box<BatchRunError>),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ImportError::FileNotFound(err.to_string()),
            _ => ImportError::FileReadError(err.to_string()),
        }
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::ParseError(err.to_string())
    }
}

impl From<BatchRunError> for ImportError {
    fn from(err: BatchRunError) -> Self {
        ImportError::BatchRun(Box::new(err))
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
