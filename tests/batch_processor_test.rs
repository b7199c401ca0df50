// ==========================================
// BatchProcessor 集成测试
// ==========================================
// 测试目标: 故障注入网关 + SQLite，验证回滚 / 熔断 / 并发 / 取消
// ==========================================


use async_trait::async_trait;
use cama_import::domain::batch::{BatchFailureKind, BatchProgress};
use cama_import::domain::code_table::CodeDefinitionTable;
use cama_import::domain::property::{CanonicalPropertyRecord, PreservedFieldSet};
use cama_import::domain::reconciliation::SaleDecisionRecord;
use cama_import::domain::types::BreakerState;
use cama_import::engine::batch::{
    BatchError, BatchProcessor, BatchWriter, BreakerConfig, CircuitBreaker, ProcessOptions,
    RetryPolicy, UpsertWriter,
};
use cama_import::logging;
use cama_import::repository::{
    PersistenceError, PersistenceGateway, PersistenceResult, SqlitePropertyGateway, UpsertStats,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::{create_test_db, sample_record, sample_records};

const JOB: &str = "job-batch";

// ==========================================
// FaultyGateway - bulk_upsert 故障注入
// ==========================================

#[derive(Debug, Clone)]
enum Fault {
    /// 不写入，直接失败
    FailBeforeWrite(PersistenceError),
    /// 写入成功但返回失败（确认丢失）
    FailAfterWrite(PersistenceError),
    /// 挂起直到被批次超时取消
    Hang,
}

struct FaultyGateway {
    inner: SqlitePropertyGateway,
    script: Mutex<VecDeque<Option<Fault>>>,
    /// 脚本耗尽后的默认故障
    fallback: Option<Fault>,
    upsert_calls: AtomicUsize,
}

impl FaultyGateway {
    fn new(db_path: &str, script: Vec<Option<Fault>>, fallback: Option<Fault>) -> Self {
        Self {
            inner: SqlitePropertyGateway::new(db_path).expect("Failed to open gateway"),
            script: Mutex::new(script.into()),
            fallback,
            upsert_calls: AtomicUsize::new(0),
        }
    }

    fn next_fault(&self) -> Option<Fault> {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(f) => f,
            None => self.fallback.clone(),
        }
    }
}

#[async_trait]
impl PersistenceGateway for FaultyGateway {
    async fn bulk_upsert(
        &self,
        records: &[CanonicalPropertyRecord],
        preserved_fields: &[String],
    ) -> PersistenceResult<UpsertStats> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_fault() {
            None => self.inner.bulk_upsert(records, preserved_fields).await,
            Some(Fault::FailBeforeWrite(e)) => Err(e),
            Some(Fault::FailAfterWrite(e)) => {
                self.inner.bulk_upsert(records, preserved_fields).await?;
                Err(e)
            }
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                self.inner.bulk_upsert(records, preserved_fields).await
            }
        }
    }

    async fn fetch_page(
        &self,
        job_id: &str,
        offset: usize,
        limit: usize,
    ) -> PersistenceResult<Vec<CanonicalPropertyRecord>> {
        self.inner.fetch_page(job_id, offset, limit).await
    }

    async fn fetch_preserved_fields(
        &self,
        job_id: &str,
        keys: &[String],
        field_names: &[String],
    ) -> PersistenceResult<HashMap<String, PreservedFieldSet>> {
        self.inner.fetch_preserved_fields(job_id, keys, field_names).await
    }

    async fn fetch_by_keys(
        &self,
        job_id: &str,
        keys: &[String],
    ) -> PersistenceResult<Vec<CanonicalPropertyRecord>> {
        self.inner.fetch_by_keys(job_id, keys).await
    }

    async fn delete_records(&self, job_id: &str, keys: &[String]) -> PersistenceResult<usize> {
        self.inner.delete_records(job_id, keys).await
    }

    async fn restore_records(&self, records: &[CanonicalPropertyRecord]) -> PersistenceResult<usize> {
        self.inner.restore_records(records).await
    }

    async fn replace_code_table(
        &self,
        job_id: &str,
        table: &CodeDefinitionTable,
    ) -> PersistenceResult<()> {
        self.inner.replace_code_table(job_id, table).await
    }

    async fn fetch_code_table(&self, job_id: &str) -> PersistenceResult<Option<CodeDefinitionTable>> {
        self.inner.fetch_code_table(job_id).await
    }

    async fn append_sale_decisions(
        &self,
        job_id: &str,
        decisions: &[SaleDecisionRecord],
    ) -> PersistenceResult<usize> {
        self.inner.append_sale_decisions(job_id, decisions).await
    }

    async fn fetch_sale_decisions(
        &self,
        job_id: &str,
    ) -> PersistenceResult<HashMap<String, SaleDecisionRecord>> {
        self.inner.fetch_sale_decisions(job_id).await
    }
}

// ==========================================
// 构造函数
// ==========================================

fn transient() -> PersistenceError {
    PersistenceError::classify(Some("ECONNRESET"), "connection reset by peer")
}

fn permanent() -> PersistenceError {
    PersistenceError::classify(Some("23505"), "duplicate key value violates unique constraint")
}

fn options(batch_size: usize, max_retries: u32) -> ProcessOptions {
    ProcessOptions {
        batch_size,
        retry: RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        },
        batch_timeout: Duration::from_millis(200),
        rollback_timeout: Duration::from_secs(5),
        enable_rollback: true,
        max_concurrency: 1,
        inter_batch_delay: Duration::ZERO,
        progress: None,
        cancel: None,
    }
}

fn processor(failure_threshold: u32, timeout_threshold: u32) -> BatchProcessor {
    BatchProcessor::new(Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold,
        timeout_threshold,
        recovery: Duration::from_secs(90),
    })))
}

fn writer(gateway: &Arc<FaultyGateway>) -> Arc<dyn BatchWriter<CanonicalPropertyRecord>> {
    Arc::new(UpsertWriter::new(
        gateway.clone(),
        JOB,
        vec!["validation_status".to_string()],
    ))
}

async fn stored_keys(gateway: &FaultyGateway) -> Vec<String> {
    let mut keys: Vec<String> = gateway
        .fetch_page(JOB, 0, 1_000)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.composite_key)
        .collect();
    keys.sort();
    keys
}

// ==========================================
// 回滚
// ==========================================

#[tokio::test]
async fn test_lost_ack_is_rolled_back_then_retried() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = Arc::new(FaultyGateway::new(
        &db_path,
        vec![Some(Fault::FailAfterWrite(transient()))],
        None,
    ));

    let summary = processor(10, 10)
        .process(sample_records(JOB, 4), writer(&gateway), &options(2, 3))
        .await
        .expect("run should succeed after retry");

    assert_eq!(summary.processed_count, 4);
    assert_eq!(summary.successful_batches, 2);
    assert_eq!(summary.rolled_back_batches, 1);
    assert_eq!(gateway.upsert_calls.load(Ordering::SeqCst), 3);
    assert_eq!(stored_keys(&gateway).await, vec!["K000", "K001", "K002", "K003"]);
}

#[tokio::test]
async fn test_exhausted_batch_restores_original_records() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = Arc::new(FaultyGateway::new(&db_path, vec![None], Some(Fault::FailAfterWrite(transient()))));

    // 先写入原始状态（含保留字段）
    let mut original = sample_record(JOB, "K000", "ORIGINAL OWNER");
    original.preserved.set("validation_status", json!("reviewed"));
    gateway
        .bulk_upsert(&[original.clone()], &["validation_status".to_string()])
        .await
        .unwrap();

    let mut changed = sample_record(JOB, "K000", "CHANGED OWNER");
    changed.preserved.set("validation_status", json!("stale"));
    let batch = vec![changed, sample_record(JOB, "K001", "NEW")];

    let err = processor(10, 10)
        .process(batch, writer(&gateway), &options(2, 2))
        .await
        .unwrap_err();

    assert!(matches!(err.cause, BatchError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(err.summary.failed_batches, 1);
    assert_eq!(err.summary.rolled_back_batches, 1);

    // 覆盖被还原，新增被删除
    assert_eq!(stored_keys(&gateway).await, vec!["K000"]);
    let after = gateway
        .fetch_by_keys(JOB, &["K000".to_string()])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(after.owner_name.as_deref(), Some("ORIGINAL OWNER"));
    assert_eq!(after.preserved.get("validation_status"), Some(&json!("reviewed")));
}

#[tokio::test]
async fn test_permanent_failure_skips_batch_and_continues() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = Arc::new(FaultyGateway::new(
        &db_path,
        vec![None, Some(Fault::FailBeforeWrite(permanent()))],
        None,
    ));

    let summary = processor(10, 10)
        .process(sample_records(JOB, 6), writer(&gateway), &options(2, 3))
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 4);
    assert_eq!(summary.failed_count, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].batch_index, 1);
    assert_eq!(summary.failures[0].kind, BatchFailureKind::Permanent);
    assert_eq!(summary.failures[0].attempts, 1);
    assert_eq!(stored_keys(&gateway).await, vec!["K000", "K001", "K004", "K005"]);
}

// ==========================================
// 熔断
// ==========================================

#[tokio::test(start_paused = true)]
async fn test_consecutive_timeouts_open_breaker_then_recover() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = Arc::new(FaultyGateway::new(
        &db_path,
        vec![Some(Fault::Hang), Some(Fault::Hang)],
        None,
    ));
    let processor = processor(5, 2);

    let summary = processor
        .process(sample_records(JOB, 4), writer(&gateway), &options(2, 3))
        .await
        .expect("circuit-open failures are not fatal");

    // 两次超时后熔断打开，第三次尝试与后续批次快速失败
    assert_eq!(gateway.upsert_calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.failed_batches, 2);
    assert!(summary
        .failures
        .iter()
        .all(|f| f.kind == BatchFailureKind::CircuitOpen));
    assert_eq!(processor.breaker().state(), BreakerState::Open);
    assert!(stored_keys(&gateway).await.is_empty());

    // 恢复窗口之后: 半开试探成功 → 关闭
    tokio::time::advance(Duration::from_secs(91)).await;
    let summary = processor
        .process(sample_records(JOB, 4), writer(&gateway), &options(2, 3))
        .await
        .unwrap();
    assert_eq!(summary.processed_count, 4);
    assert_eq!(processor.breaker().state(), BreakerState::Closed);
    assert_eq!(stored_keys(&gateway).await.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failures_open_breaker_across_batches() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = Arc::new(FaultyGateway::new(
        &db_path,
        Vec::new(),
        Some(Fault::FailBeforeWrite(permanent())),
    ));
    let processor = processor(2, 10);

    let summary = processor
        .process(sample_records(JOB, 8), writer(&gateway), &options(2, 3))
        .await
        .unwrap();

    let kinds: Vec<BatchFailureKind> = summary.failures.iter().map(|f| f.kind).collect();
    assert_eq!(
        kinds,
        vec![
            BatchFailureKind::Permanent,
            BatchFailureKind::Permanent,
            BatchFailureKind::CircuitOpen,
            BatchFailureKind::CircuitOpen,
        ]
    );
    assert_eq!(gateway.upsert_calls.load(Ordering::SeqCst), 2);
}

// ==========================================
// 并发 / 取消
// ==========================================

#[tokio::test]
async fn test_bounded_concurrency_writes_everything() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = Arc::new(FaultyGateway::new(&db_path, Vec::new(), None));

    let mut opts = options(2, 3);
    opts.max_concurrency = 3;

    let summary = processor(10, 10)
        .process(sample_records(JOB, 11), writer(&gateway), &opts)
        .await
        .unwrap();

    assert_eq!(summary.total_batches, 6);
    assert_eq!(summary.successful_batches, 6);
    assert_eq!(summary.processed_count, 11);
    assert_eq!(stored_keys(&gateway).await.len(), 11);
}

#[tokio::test]
async fn test_cancel_stops_launching_new_batches() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = Arc::new(FaultyGateway::new(&db_path, Vec::new(), None));

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let opts = options(2, 3)
        .with_cancel(cancel.clone())
        .with_progress(Arc::new(move |p: BatchProgress| {
            if p.processed_items >= 4 {
                flag.store(true, Ordering::SeqCst);
            }
        }));

    let summary = processor(10, 10)
        .process(sample_records(JOB, 10), writer(&gateway), &opts)
        .await
        .expect("cancellation is not an error");

    assert!(summary.cancelled);
    assert_eq!(summary.processed_count, 4);
    assert_eq!(summary.skipped_batches, 3);
    assert_eq!(stored_keys(&gateway).await.len(), 4);
}
