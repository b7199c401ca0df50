// ==========================================
// CAMA 导入引擎 - 重试策略
// ==========================================
// 退避: min(base · 2^(n-1), max)，n 从 1 开始
// ==========================================

use crate::config::ImportConfig;
use crate::repository::error::PersistenceError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 每批最多尝试次数（含首次）
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl From<&ImportConfig> for RetryPolicy {
    fn from(cfg: &ImportConfig) -> Self {
        Self {
            max_retries: cfg.max_retries.max(1),
            base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_retry_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次失败后的等待时间
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn is_retryable(&self, err: &PersistenceError) -> bool {
        err.is_retryable()
    }

    /// 第 attempt 次失败后是否继续（max_retries 为总尝试次数，至少 1 次）
    pub fn should_retry(&self, err: &PersistenceError, attempt: u32) -> bool {
        self.is_retryable(err) && attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(p.backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(p.backoff_delay(6), Duration::from_millis(30_000));
        assert_eq!(p.backoff_delay(60), Duration::from_millis(30_000));
    }

    #[test]
    fn test_should_retry() {
        let p = RetryPolicy::default();
        let transient = PersistenceError::classify(Some("ECONNRESET"), "reset");
        let permanent = PersistenceError::classify(Some("23505"), "duplicate key");

        assert!(p.should_retry(&transient, 1));
        assert!(p.should_retry(&transient, 2));
        assert!(!p.should_retry(&transient, 3));
        assert!(!p.should_retry(&permanent, 1));
        assert!(p.should_retry(&PersistenceError::timeout("bulk_upsert", 45_000), 1));

        let single = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert!(!single.should_retry(&transient, 1));
    }
}
