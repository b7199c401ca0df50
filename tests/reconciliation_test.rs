// ==========================================
// 对账引擎集成测试
// ==========================================
// 测试目标: 差异完整性 / 决策沿用与失效 / 快照分页
// ==========================================


use cama_import::domain::types::SaleDecision;
use cama_import::engine::reconciliation::{load_snapshot, record_decisions, SnapshotPaging};
use cama_import::engine::ReconciliationEngine;
use cama_import::logging;
use cama_import::repository::{PersistenceGateway, SqlitePropertyGateway};
use cama_import::ImportContext;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{
    brt_baseline, brt_csv, brt_key, create_test_db, fast_config, sample_records, BrtRow,
};

const JOB: &str = "job-2025-0301";

fn ctx() -> ImportContext {
    ImportContext::new(JOB, 2025, "0301")
}

/// 以基准文件初始化存储
async fn seed(db_path: &str, rows: &[BrtRow]) -> Arc<SqlitePropertyGateway> {
    let gateway = Arc::new(SqlitePropertyGateway::new(db_path).expect("Failed to open gateway"));
    let source = ReconciliationEngine::new()
        .parse_file(&ctx(), "baseline.csv", &brt_csv(rows))
        .expect("baseline should parse");
    gateway.bulk_upsert(&source.records, &[]).await.unwrap();
    gateway
}

#[tokio::test]
async fn test_report_partitions_key_union() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = seed(&db_path, &brt_baseline()).await;

    // (1,1) 不变；(1,2) 分类变更；(2,5) 移除；(3,1) 新增
    let rows = vec![
        BrtRow::new("1", "1", "10 MAIN ST"),
        BrtRow::new("1", "2", "12 MAIN ST").class("4A", "4A"),
        BrtRow::new("3", "1", "1 NEW RD"),
    ];

    let outcome = ReconciliationEngine::new()
        .reconcile(gateway.as_ref(), &ctx(), "export.csv", &brt_csv(&rows), &fast_config())
        .await
        .unwrap();
    let report = &outcome.report;

    assert_eq!(outcome.snapshot_size, 3);
    assert_eq!(outcome.source.records.len(), 3);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.added[0].composite_key, brt_key("3", "1", "1 NEW RD"));
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.removed[0].composite_key, brt_key("2", "5", "40 ELM AVE"));
    assert_eq!(report.changed_count, 1);
    assert_eq!(report.unchanged_count, 1);
    // BRT 两个分类字段都参与比较
    assert_eq!(report.class_changes.len(), 2);
    assert!(report.sale_changes.is_empty());

    let union: BTreeSet<String> = brt_baseline()
        .iter()
        .chain(rows.iter())
        .map(|r| brt_key(&r.block, &r.lot, &r.location))
        .collect();
    assert_eq!(
        report.added.len() + report.removed.len() + report.changed_count + report.unchanged_count,
        union.len()
    );

    // 对账只读
    assert_eq!(gateway.fetch_page(JOB, 0, 100).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_recorded_decision_is_reused_until_sale_changes_again() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = seed(&db_path, &brt_baseline()).await;
    let engine = ReconciliationEngine::new();
    let config = fast_config();
    let key = brt_key("1", "1", "10 MAIN ST");

    let mut rows = brt_baseline();
    rows[0] = BrtRow::new("1", "1", "10 MAIN ST").sale("06/01/2024", "300000");
    let bytes = brt_csv(&rows);

    let mut outcome = engine
        .reconcile(gateway.as_ref(), &ctx(), "export.csv", &bytes, &config)
        .await
        .unwrap();
    assert!(outcome.report.has_pending_decisions());

    let recorded = record_decisions(
        gateway.as_ref(),
        JOB,
        &mut outcome.report,
        &[(key.clone(), SaleDecision::KeepOld)],
        Some("assessor"),
    )
    .await
    .unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].decided_by.as_deref(), Some("assessor"));
    assert!(!outcome.report.has_pending_decisions());

    // 同一文件再次对账: 决策沿用
    let again = engine
        .reconcile(gateway.as_ref(), &ctx(), "export.csv", &bytes, &config)
        .await
        .unwrap();
    let change = again.report.sale_change(&key).expect("sale change expected");
    assert_eq!(change.decision, SaleDecision::KeepOld);
    assert!(change.reused);

    // 新售价与已决策的不同: 重新待决
    rows[0] = BrtRow::new("1", "1", "10 MAIN ST").sale("09/09/2024", "315000");
    let third = engine
        .reconcile(gateway.as_ref(), &ctx(), "export.csv", &brt_csv(&rows), &config)
        .await
        .unwrap();
    let change = third.report.sale_change(&key).expect("sale change expected");
    assert_eq!(change.decision, SaleDecision::Pending);
    assert!(!change.reused);
}

#[tokio::test]
async fn test_snapshot_paging_reads_every_page() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let gateway = SqlitePropertyGateway::new(&db_path).expect("Failed to open gateway");

    let paging = SnapshotPaging {
        page_size: 2,
        page_delay: Duration::from_millis(1),
        api_timeout: Duration::from_secs(5),
    };

    let empty = load_snapshot(&gateway, JOB, paging).await.unwrap();
    assert!(empty.is_empty());

    // 整页倍数: 最后一次读到空页才结束
    gateway.bulk_upsert(&sample_records(JOB, 4), &[]).await.unwrap();
    assert_eq!(load_snapshot(&gateway, JOB, paging).await.unwrap().len(), 4);

    gateway.bulk_upsert(&sample_records(JOB, 5), &[]).await.unwrap();
    let snapshot = load_snapshot(&gateway, JOB, paging).await.unwrap();
    assert_eq!(snapshot.len(), 5);
    assert!(snapshot.contains_key("K004"));

    // 其他 job 不可见
    assert!(load_snapshot(&gateway, "other-job", paging).await.unwrap().is_empty());
}
