// ==========================================
// CAMA 导入引擎 - 持久化错误类型
// ==========================================
// 分类: 瞬时（可重试）/ 超时（可重试，熔断加权）/ 永久（不重试）
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::types::FailureKind;
use thiserror::Error;

/// 可重试的远端错误码（SQL state 与 socket 错误）
pub const RETRYABLE_CODES: &[&str] = &[
    "57014",      // 语句超时
    "08003",      // 连接不存在
    "08006",      // 连接失败
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
];

/// 持久化网关错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("瞬时持久化错误 (code={code:?}): {message}")]
    Transient {
        code: Option<String>,
        message: String,
    },

    #[error("持久化操作超时: {operation} 超过 {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("永久持久化错误 (code={code:?}): {message}")]
    Permanent {
        code: Option<String>,
        message: String,
    },

    #[error("数据库锁获取失败: {0}")]
    Lock(String),

    #[error("记录序列化失败: {0}")]
    Serialization(String),
}

impl PersistenceError {
    /// 按错误码与消息归类
    ///
    /// # 规则
    /// - code 命中 RETRYABLE_CODES → Transient
    /// - 消息包含 timeout / connection（不区分大小写）→ Transient
    /// - 其余 → Permanent
    pub fn classify(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let code_hit = code.map(|c| RETRYABLE_CODES.contains(&c)).unwrap_or(false);
        let lower = message.to_ascii_lowercase();
        let message_hit = lower.contains("timeout") || lower.contains("connection");

        if code_hit || message_hit {
            PersistenceError::Transient {
                code: code.map(str::to_string),
                message,
            }
        } else {
            PersistenceError::Permanent {
                code: code.map(str::to_string),
                message,
            }
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        PersistenceError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistenceError::Transient { .. } | PersistenceError::Timeout { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            PersistenceError::Timeout { .. } => true,
            PersistenceError::Transient { code, message } => {
                matches!(code.as_deref(), Some("57014") | Some("ETIMEDOUT"))
                    || message.to_ascii_lowercase().contains("timeout")
            }
            _ => false,
        }
    }

    /// 熔断器用的失败分类
    pub fn failure_kind(&self) -> FailureKind {
        if self.is_timeout() {
            FailureKind::Timeout
        } else {
            FailureKind::Other
        }
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => {
                let message = msg.clone().unwrap_or_else(|| err.to_string());
                match e.code {
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                        PersistenceError::Transient {
                            code: Some(format!("SQLITE_{}", e.extended_code)),
                            message,
                        }
                    }
                    _ => PersistenceError::Permanent {
                        code: Some(format!("SQLITE_{}", e.extended_code)),
                        message,
                    },
                }
            }
            _ => PersistenceError::Permanent {
                code: None,
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

/// Result 类型别名
pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_code() {
        assert!(PersistenceError::classify(Some("57014"), "canceling statement").is_retryable());
        assert!(PersistenceError::classify(Some("ECONNRESET"), "reset").is_retryable());
        assert!(!PersistenceError::classify(Some("23505"), "duplicate key").is_retryable());
    }

    #[test]
    fn test_classify_by_message() {
        assert!(PersistenceError::classify(None, "Connection refused").is_retryable());
        assert!(PersistenceError::classify(None, "upstream request TIMEOUT").is_retryable());
        assert!(!PersistenceError::classify(None, "violates check constraint").is_retryable());
    }

    #[test]
    fn test_timeout_failure_kind() {
        assert_eq!(
            PersistenceError::timeout("bulk_upsert", 45_000).failure_kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            PersistenceError::classify(Some("57014"), "statement timeout").failure_kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            PersistenceError::classify(Some("08006"), "connection failure").failure_kind(),
            FailureKind::Other
        );
    }

    #[test]
    fn test_sqlite_busy_is_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(PersistenceError::from(err).is_retryable());

        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed".to_string()),
        );
        assert!(!PersistenceError::from(err).is_retryable());
    }
}
