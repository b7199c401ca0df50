// ==========================================
// CAMA 导入引擎 - 批处理器
// ==========================================
// 职责: 分批 + 超时 + 重试 + 熔断 + 事务回滚，顺序或有界并发执行
// 红线: 一批记录作为一次原子请求写入，不拆成单条
// 红线: 重试耗尽或回滚失败 → 终止整次运行
// 红线: 取消只在启动新批次前检查，进行中的批次跑完
// ==========================================

use crate::config::ImportConfig;
use crate::domain::batch::{BatchFailure, BatchFailureKind, BatchProgress, BatchRunSummary};
use crate::engine::batch::circuit_breaker::CircuitBreaker;
use crate::engine::batch::error::{BatchError, BatchRunError};
use crate::engine::batch::retry::RetryPolicy;
use crate::engine::batch::transaction::{BatchWriter, TransactionManager, TransactionRecorder};
use crate::repository::error::PersistenceError;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

// ==========================================
// ProcessOptions - 单次运行参数
// ==========================================
#[derive(Clone)]
pub struct ProcessOptions {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// 单次批次写入超时
    pub batch_timeout: Duration,
    pub rollback_timeout: Duration,
    pub enable_rollback: bool,
    /// 1 = 顺序执行
    pub max_concurrency: usize,
    pub inter_batch_delay: Duration,
    pub progress: Option<ProgressCallback>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::from(&ImportConfig::default())
    }
}

impl From<&ImportConfig> for ProcessOptions {
    fn from(cfg: &ImportConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            retry: RetryPolicy::from(cfg),
            batch_timeout: Duration::from_millis(cfg.batch_timeout_ms),
            rollback_timeout: Duration::from_millis(cfg.rollback_timeout_ms),
            enable_rollback: cfg.enable_rollback,
            max_concurrency: cfg.max_concurrency.max(1),
            inter_batch_delay: Duration::from_millis(cfg.inter_batch_delay_ms),
            progress: None,
            cancel: None,
        }
    }
}

impl ProcessOptions {
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

struct BatchSuccess {
    written: usize,
    rolled_back: bool,
}

struct BatchFailed {
    attempts: u32,
    kind: BatchFailureKind,
    cause: BatchError,
    rolled_back: bool,
}

type BatchOutcome = Result<BatchSuccess, BatchFailed>;

// ==========================================
// BatchProcessor
// ==========================================
// 熔断器跨运行共享（同一远端存储）
pub struct BatchProcessor {
    breaker: Arc<CircuitBreaker>,
}

impl BatchProcessor {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// 分批执行
    ///
    /// # 参数
    /// - records: 全部待写入项
    /// - writer: 被包装的持久化调用
    /// - options: 运行参数
    ///
    /// # 返回
    /// - Ok(BatchRunSummary): 运行结束（可能含非致命失败批次或已取消）
    /// - Err(BatchRunError): 致命错误，携带截至终止时的汇总
    pub async fn process<T>(
        &self,
        records: Vec<T>,
        writer: Arc<dyn BatchWriter<T>>,
        options: &ProcessOptions,
    ) -> Result<BatchRunSummary, BatchRunError>
    where
        T: Send + Sync,
    {
        let started = Instant::now();
        let batch_size = options.batch_size.max(1);
        let batches: Vec<&[T]> = records.chunks(batch_size).collect();
        let total_batches = batches.len();

        let stats = Mutex::new(BatchRunSummary {
            total_items: records.len(),
            total_batches,
            ..Default::default()
        });

        info!(
            total_items = records.len(),
            total_batches,
            batch_size,
            max_concurrency = options.max_concurrency,
            "批处理开始"
        );

        let writer_ref: &dyn BatchWriter<T> = writer.as_ref();
        let mut fatal: Option<(usize, BatchError)> = None;
        let mut launched = 0usize;

        if options.max_concurrency <= 1 {
            // ===== 顺序模式 =====
            for (index, batch) in batches.iter().enumerate() {
                if options.is_cancelled() {
                    break;
                }
                if index > 0 && !options.inter_batch_delay.is_zero() {
                    tokio::time::sleep(options.inter_batch_delay).await;
                }
                launched += 1;

                let outcome = self.run_batch(index, batch, writer_ref, options).await;
                if let Some(cause) = self.apply_outcome(&stats, index, batch.len(), outcome, options) {
                    fatal = Some((index, cause));
                    break;
                }
            }
        } else {
            // ===== 有界并发模式（滑动窗口，先完成先补位）=====
            let mut in_flight = FuturesUnordered::new();
            loop {
                while fatal.is_none()
                    && in_flight.len() < options.max_concurrency
                    && launched < total_batches
                    && !options.is_cancelled()
                {
                    let index = launched;
                    let batch = batches[index];
                    in_flight.push(async move {
                        if index > 0 && !options.inter_batch_delay.is_zero() {
                            tokio::time::sleep(options.inter_batch_delay).await;
                        }
                        let outcome = self.run_batch(index, batch, writer_ref, options).await;
                        (index, batch.len(), outcome)
                    });
                    launched += 1;
                }

                match in_flight.next().await {
                    Some((index, len, outcome)) => {
                        if let Some(cause) = self.apply_outcome(&stats, index, len, outcome, options) {
                            // 首个致命错误生效；其余进行中批次继续跑完
                            if fatal.is_none() {
                                fatal = Some((index, cause));
                            }
                        }
                    }
                    None => break,
                }
            }
        }

        let mut summary = stats.into_inner().unwrap_or_else(PoisonError::into_inner);
        summary.skipped_batches = total_batches - launched;
        summary.cancelled = fatal.is_none() && launched < total_batches;
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        if summary.cancelled {
            warn!(
                skipped_batches = summary.skipped_batches,
                processed = summary.processed_count,
                "批处理已取消"
            );
        }

        match fatal {
            Some((batch_index, cause)) => {
                error!(
                    batch_index,
                    error = %cause,
                    processed = summary.processed_count,
                    failed = summary.failed_count,
                    "批处理终止"
                );
                Err(BatchRunError {
                    batch_index,
                    cause,
                    summary,
                })
            }
            None => {
                info!(
                    processed = summary.processed_count,
                    failed = summary.failed_count,
                    successful_batches = summary.successful_batches,
                    failed_batches = summary.failed_batches,
                    rolled_back_batches = summary.rolled_back_batches,
                    elapsed_ms = summary.elapsed_ms,
                    "批处理完成"
                );
                Ok(summary)
            }
        }
    }

    /// 单批: 熔断检查 → 开启事务 → 限时写入 → 提交 / 回滚 → 退避重试
    async fn run_batch<T>(
        &self,
        index: usize,
        batch: &[T],
        writer: &dyn BatchWriter<T>,
        options: &ProcessOptions,
    ) -> BatchOutcome
    where
        T: Send + Sync,
    {
        let mut rolled_back = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if let Err(open) = self.breaker.try_acquire() {
                warn!(batch_index = index, attempt, "熔断器打开，批次快速失败");
                return Err(BatchFailed {
                    attempts: attempt,
                    kind: BatchFailureKind::CircuitOpen,
                    cause: open,
                    rolled_back,
                });
            }

            let tx = if options.enable_rollback {
                TransactionManager::begin(index, attempt)
            } else {
                TransactionRecorder::disabled()
            };

            let result = match tokio::time::timeout(options.batch_timeout, writer.write_batch(batch, &tx)).await {
                Ok(r) => r,
                Err(_) => Err(PersistenceError::timeout(
                    "write_batch",
                    options.batch_timeout.as_millis() as u64,
                )),
            };

            let err = match result {
                Ok(written) => {
                    TransactionManager::commit(&tx);
                    self.breaker.record_success();
                    debug!(batch_index = index, attempt, written, "批次写入成功");
                    return Ok(BatchSuccess {
                        written,
                        rolled_back,
                    });
                }
                Err(e) => e,
            };

            self.breaker.record_failure(err.failure_kind());

            if tx.is_enabled() {
                match TransactionManager::rollback(&tx, writer, options.rollback_timeout).await {
                    Ok(n) => rolled_back |= n > 0,
                    Err(rb) => {
                        return Err(BatchFailed {
                            attempts: attempt,
                            kind: BatchFailureKind::RollbackFailure,
                            cause: rb,
                            rolled_back,
                        })
                    }
                }
            }

            if !options.retry.should_retry(&err, attempt) {
                let (kind, cause) = if options.retry.is_retryable(&err) {
                    (
                        BatchFailureKind::RetriesExhausted,
                        BatchError::RetriesExhausted {
                            attempts: attempt,
                            last: err,
                        },
                    )
                } else {
                    warn!(batch_index = index, attempt, error = %err, "不可重试错误，批次失败");
                    (BatchFailureKind::Permanent, BatchError::Persistence(err))
                };
                return Err(BatchFailed {
                    attempts: attempt,
                    kind,
                    cause,
                    rolled_back,
                });
            }

            let delay = options.retry.backoff_delay(attempt);
            warn!(
                batch_index = index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "批次写入失败，退避后重试"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// 汇总单批结果并触发进度回调；返回致命错误
    fn apply_outcome(
        &self,
        stats: &Mutex<BatchRunSummary>,
        index: usize,
        len: usize,
        outcome: BatchOutcome,
        options: &ProcessOptions,
    ) -> Option<BatchError> {
        let (progress, fatal) = {
            let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
            let fatal = match outcome {
                Ok(ok) => {
                    s.processed_count += len;
                    s.successful_batches += 1;
                    if ok.rolled_back {
                        s.rolled_back_batches += 1;
                    }
                    debug!(batch_index = index, written = ok.written, "批次完成");
                    None
                }
                Err(failed) => {
                    s.failed_count += len;
                    s.failed_batches += 1;
                    if failed.rolled_back {
                        s.rolled_back_batches += 1;
                    }
                    s.failures.push(BatchFailure {
                        batch_index: index,
                        item_count: len,
                        attempts: failed.attempts,
                        kind: failed.kind,
                        message: failed.cause.to_string(),
                    });
                    failed.cause.is_fatal().then_some(failed.cause)
                }
            };

            let done = s.processed_count + s.failed_count;
            let progress = BatchProgress {
                batch_index: index,
                total_batches: s.total_batches,
                processed_items: done,
                total_items: s.total_items,
                percent: if s.total_items == 0 {
                    100.0
                } else {
                    done as f64 * 100.0 / s.total_items as f64
                },
            };
            (progress, fatal)
        };

        if let Some(cb) = &options.progress {
            cb(progress);
        }
        fatal
    }
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new(Arc::new(CircuitBreaker::default()))
    }
}
