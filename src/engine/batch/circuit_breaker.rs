// ==========================================
// CAMA 导入引擎 - 熔断器
// ==========================================
// 状态机:
// - CLOSED → OPEN: 失败数 ≥ failure_threshold，或连续超时数 ≥ timeout_threshold
// - OPEN → HALF_OPEN: 恢复窗口到期后的下一次 try_acquire
// - HALF_OPEN: 只放行一次试探；成功 → CLOSED（计数清零），失败 → OPEN
// 红线: OPEN 期间不得发起任何远端调用
// ==========================================

use crate::config::ImportConfig;
use crate::domain::types::{BreakerState, FailureKind};
use crate::engine::batch::error::BatchError;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub timeout_threshold: u32,
    pub recovery: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            timeout_threshold: 2,
            recovery: Duration::from_millis(90_000),
        }
    }
}

impl From<&ImportConfig> for BreakerConfig {
    fn from(cfg: &ImportConfig) -> Self {
        Self {
            failure_threshold: cfg.breaker_failure_threshold.max(1),
            timeout_threshold: cfg.breaker_timeout_threshold.max(1),
            recovery: Duration::from_millis(cfg.breaker_recovery_ms),
        }
    }
}

/// 熔断器状态快照（日志与报告用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub consecutive_timeouts: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    consecutive_timeouts: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

// ==========================================
// CircuitBreaker
// ==========================================
// 计数器在锁内更新；并发批次可共享同一实例
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                consecutive_timeouts: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    // 计数器只含整数与时间戳，中毒后内容仍可用
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 调用前检查
    ///
    /// # 返回
    /// - Ok(()): 允许调用
    /// - Err(CircuitOpen): 不允许调用，retry_after_ms 为剩余恢复时间
    pub fn try_acquire(&self) -> Result<(), BatchError> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.config.recovery);
                if elapsed >= self.config.recovery {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("熔断器进入 HALF_OPEN，放行一次试探调用");
                    Ok(())
                } else {
                    Err(BatchError::CircuitOpen {
                        retry_after_ms: (self.config.recovery - elapsed).as_millis() as u64,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(BatchError::CircuitOpen { retry_after_ms: 0 })
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            info!(from = %inner.state, "熔断器恢复 CLOSED");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.consecutive_timeouts = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self, kind: FailureKind) {
        let mut inner = self.lock();

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                warn!(kind = ?kind, "试探调用失败，熔断器重新打开");
            }
            BreakerState::Open => {
                // 打开前已发出的调用，只累计不重置计时
                inner.failure_count += 1;
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                match kind {
                    FailureKind::Timeout => inner.consecutive_timeouts += 1,
                    FailureKind::Other => inner.consecutive_timeouts = 0,
                }

                if inner.failure_count >= self.config.failure_threshold
                    || inner.consecutive_timeouts >= self.config.timeout_threshold
                {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        failure_count = inner.failure_count,
                        consecutive_timeouts = inner.consecutive_timeouts,
                        recovery_ms = self.config.recovery.as_millis() as u64,
                        "熔断器打开"
                    );
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            consecutive_timeouts: inner.consecutive_timeouts,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
