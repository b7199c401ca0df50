// ==========================================
// CAMA 导入引擎 - 批次事务管理
// ==========================================
// 职责: 记录每次批次尝试中的可逆操作，失败时逆序回放
// 红线: 操作必须在写入之前记录（携带足以还原的原始状态）
// 红线: 回滚受独立超时约束，不重试；回滚失败即致命
// ==========================================

use crate::domain::property::CanonicalPropertyRecord;
use crate::engine::batch::error::BatchError;
use crate::repository::error::{PersistenceError, PersistenceResult};
use crate::repository::property_gateway::PersistenceGateway;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 可逆操作
#[derive(Debug, Clone, PartialEq)]
pub enum TxOperation {
    /// 新增（回滚 = 删除）
    Insert { job_id: String, keys: Vec<String> },
    /// 覆盖（回滚 = 还原原值）
    Update { originals: Vec<CanonicalPropertyRecord> },
    /// 删除（回滚 = 重新写入原值）
    Delete { originals: Vec<CanonicalPropertyRecord> },
}

impl TxOperation {
    pub fn item_count(&self) -> usize {
        match self {
            TxOperation::Insert { keys, .. } => keys.len(),
            TxOperation::Update { originals } | TxOperation::Delete { originals } => {
                originals.len()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub batch_index: usize,
    pub attempt: u32,
    pub operations: Vec<TxOperation>,
}

// ==========================================
// TransactionRecorder - 写入方持有的记录句柄
// ==========================================
#[derive(Debug, Clone)]
pub struct TransactionRecorder {
    record: Arc<Mutex<TransactionRecord>>,
    enabled: bool,
}

impl TransactionRecorder {
    /// 不记录任何操作（enable_rollback = false）
    pub fn disabled() -> Self {
        Self {
            record: Arc::new(Mutex::new(TransactionRecord {
                id: Uuid::nil(),
                batch_index: 0,
                attempt: 0,
                operations: Vec::new(),
            })),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, op: TxOperation) {
        if !self.enabled || op.item_count() == 0 {
            return;
        }
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .operations
            .push(op);
    }

    pub fn operation_count(&self) -> usize {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .operations
            .len()
    }

    fn take(&self) -> TransactionRecord {
        let mut guard = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        TransactionRecord {
            id: guard.id,
            batch_index: guard.batch_index,
            attempt: guard.attempt,
            operations: std::mem::take(&mut guard.operations),
        }
    }
}

// ==========================================
// BatchWriter Trait - 被包装的持久化调用
// ==========================================
// 实现者: UpsertWriter / DeleteWriter（测试中另有故障注入实现）
#[async_trait]
pub trait BatchWriter<T>: Send + Sync {
    /// 写入一批；返回成功写入的条数
    async fn write_batch(&self, batch: &[T], tx: &TransactionRecorder) -> PersistenceResult<usize>;

    /// 撤销单个操作
    async fn undo(&self, op: &TxOperation) -> PersistenceResult<()>;
}

// ==========================================
// TransactionManager
// ==========================================
pub struct TransactionManager;

impl TransactionManager {
    pub fn begin(batch_index: usize, attempt: u32) -> TransactionRecorder {
        TransactionRecorder {
            record: Arc::new(Mutex::new(TransactionRecord {
                id: Uuid::new_v4(),
                batch_index,
                attempt,
                operations: Vec::new(),
            })),
            enabled: true,
        }
    }

    /// 提交: 丢弃已记录的操作
    pub fn commit(tx: &TransactionRecorder) {
        let record = tx.take();
        debug!(
            tx_id = %record.id,
            batch_index = record.batch_index,
            operations = record.operations.len(),
            "批次事务已提交"
        );
    }

    /// 逆序回放已记录操作
    ///
    /// # 返回
    /// - Ok(n): 撤销的操作数
    /// - Err(RollbackFailure): 任一撤销失败或整体超时
    pub async fn rollback<T>(
        tx: &TransactionRecorder,
        writer: &dyn BatchWriter<T>,
        timeout: Duration,
    ) -> Result<usize, BatchError> {
        let record = tx.take();
        if record.operations.is_empty() {
            return Ok(0);
        }

        let tx_id = record.id;
        let batch_index = record.batch_index;
        let total = record.operations.len();

        let replay = async {
            for op in record.operations.iter().rev() {
                writer.undo(op).await?;
            }
            Ok::<usize, PersistenceError>(total)
        };

        match tokio::time::timeout(timeout, replay).await {
            Ok(Ok(n)) => {
                info!(tx_id = %tx_id, batch_index, operations = n, "批次事务已回滚");
                Ok(n)
            }
            Ok(Err(e)) => {
                error!(tx_id = %tx_id, batch_index, error = %e, "回滚失败");
                Err(BatchError::RollbackFailure {
                    message: e.to_string(),
                })
            }
            Err(_) => {
                error!(tx_id = %tx_id, batch_index, timeout_ms = timeout.as_millis() as u64, "回滚超时");
                Err(BatchError::RollbackFailure {
                    message: format!("回滚超过 {}ms", timeout.as_millis()),
                })
            }
        }
    }
}

// ==========================================
// UpsertWriter - 写入规范化记录
// ==========================================
// 写入前读取已有记录: 已存在 → Update(原值)，不存在 → Insert(key)
pub struct UpsertWriter {
    gateway: Arc<dyn PersistenceGateway>,
    job_id: String,
    preserved_fields: Vec<String>,
}

impl UpsertWriter {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        job_id: impl Into<String>,
        preserved_fields: Vec<String>,
    ) -> Self {
        Self {
            gateway,
            job_id: job_id.into(),
            preserved_fields,
        }
    }
}

#[async_trait]
impl BatchWriter<CanonicalPropertyRecord> for UpsertWriter {
    async fn write_batch(
        &self,
        batch: &[CanonicalPropertyRecord],
        tx: &TransactionRecorder,
    ) -> PersistenceResult<usize> {
        if tx.is_enabled() {
            let keys: Vec<String> = batch.iter().map(|r| r.composite_key.clone()).collect();
            let originals = self.gateway.fetch_by_keys(&self.job_id, &keys).await?;
            let existing: HashSet<&str> =
                originals.iter().map(|r| r.composite_key.as_str()).collect();
            let inserted: Vec<String> = keys
                .iter()
                .filter(|k| !existing.contains(k.as_str()))
                .cloned()
                .collect();

            tx.record(TxOperation::Insert {
                job_id: self.job_id.clone(),
                keys: inserted,
            });
            tx.record(TxOperation::Update { originals });
        }

        let stats = self
            .gateway
            .bulk_upsert(batch, &self.preserved_fields)
            .await?;
        Ok(stats.total_processed)
    }

    async fn undo(&self, op: &TxOperation) -> PersistenceResult<()> {
        undo_with_gateway(self.gateway.as_ref(), op).await
    }
}

// ==========================================
// DeleteWriter - 删除已移除房产
// ==========================================
pub struct DeleteWriter {
    gateway: Arc<dyn PersistenceGateway>,
    job_id: String,
}

impl DeleteWriter {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, job_id: impl Into<String>) -> Self {
        Self {
            gateway,
            job_id: job_id.into(),
        }
    }
}

#[async_trait]
impl BatchWriter<String> for DeleteWriter {
    async fn write_batch(&self, batch: &[String], tx: &TransactionRecorder) -> PersistenceResult<usize> {
        if tx.is_enabled() {
            let originals = self.gateway.fetch_by_keys(&self.job_id, batch).await?;
            tx.record(TxOperation::Delete { originals });
        }
        self.gateway.delete_records(&self.job_id, batch).await?;
        // 已不存在的 key 也视为处理完成
        Ok(batch.len())
    }

    async fn undo(&self, op: &TxOperation) -> PersistenceResult<()> {
        undo_with_gateway(self.gateway.as_ref(), op).await
    }
}

async fn undo_with_gateway(gateway: &dyn PersistenceGateway, op: &TxOperation) -> PersistenceResult<()> {
    match op {
        TxOperation::Insert { job_id, keys } => {
            gateway.delete_records(job_id, keys).await?;
        }
        TxOperation::Update { originals } | TxOperation::Delete { originals } => {
            gateway.restore_records(originals).await?;
        }
    }
    Ok(())
}
