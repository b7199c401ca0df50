// ==========================================
// CAMA 导入引擎 - 售价决策
// ==========================================
// 决策语义:
// - keep_old: 保留旧售价，旧售价入历史
// - use_new: 写入新售价，旧售价入历史
// - keep_both: 保留旧售价，新售价追加入历史（不覆盖）
// 红线: 历史只追加；与末条相同的售价不重复写入
// ==========================================

use crate::domain::property::CanonicalPropertyRecord;
use crate::domain::reconciliation::{ComparisonReport, SaleChange, SaleDecisionRecord};
use crate::domain::types::SaleDecision;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::property_gateway::PersistenceGateway;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

/// 显式选择优先，其次沿用报告中的（历史）决策
pub fn resolve_decision(change: &SaleChange, choice: Option<SaleDecision>) -> SaleDecision {
    match choice {
        Some(d) if d.is_resolved() => d,
        _ => change.decision,
    }
}

/// 对单条记录应用决策
///
/// # 返回
/// - Ok(true): 记录被修改（售价或历史）
/// - Ok(false): pending 或无变化
/// - Err: 已存售价历史无法解析（记录未修改）
pub fn apply_decision(
    record: &mut CanonicalPropertyRecord,
    change: &SaleChange,
    decision: SaleDecision,
    at: DateTime<Utc>,
) -> serde_json::Result<bool> {
    let (current, archived) = match decision {
        SaleDecision::Pending => return Ok(false),
        SaleDecision::KeepOld => (change.old_sale.clone(), change.old_sale.clone()),
        SaleDecision::UseNew => (change.new_sale.clone(), change.old_sale.clone()),
        SaleDecision::KeepBoth => (change.old_sale.clone(), change.new_sale.clone()),
    };

    // 历史先读，读失败时记录保持原样
    let mut history = record.preserved.sales_history()?;
    let sale_changed = record.sale != current;
    record.sale = current;

    let appended = history.push(archived, decision, at);
    if appended {
        record.preserved.set_sales_history(&history)?;
    }

    Ok(sale_changed || appended)
}

/// 对全部记录应用已决售价变更
///
/// # 返回
/// - 被修改的记录数
///
/// # 错误
/// - PendingSaleDecisions: 仍有未决变更
pub fn apply_decisions(
    records: &mut [CanonicalPropertyRecord],
    report: &ComparisonReport,
    at: DateTime<Utc>,
) -> ImportResult<usize> {
    let pending = report.pending_sale_changes().count();
    if pending > 0 {
        return Err(ImportError::PendingSaleDecisions { count: pending });
    }

    let changes: HashMap<&str, &SaleChange> = report
        .sale_changes
        .iter()
        .map(|c| (c.composite_key.as_str(), c))
        .collect();

    let mut applied = 0;
    for record in records.iter_mut() {
        let Some(change) = changes.get(record.composite_key.as_str()) else {
            continue;
        };
        let decision = resolve_decision(change, None);
        if apply_decision(record, change, decision, at).map_err(|e| {
            ImportError::SalesHistoryError {
                key: record.composite_key.clone(),
                message: e.to_string(),
            }
        })?
        {
            applied += 1;
        }
    }

    info!(applied, changes = changes.len(), "售价决策已应用");
    Ok(applied)
}

/// 人工选择 → 审计记录
///
/// # 错误
/// - UnknownSaleChange: key 在报告中没有售价变更
pub fn build_decision_records(
    report: &ComparisonReport,
    choices: &[(String, SaleDecision)],
    decided_by: Option<&str>,
    at: DateTime<Utc>,
) -> ImportResult<Vec<SaleDecisionRecord>> {
    let mut out = Vec::with_capacity(choices.len());
    for (key, decision) in choices {
        let change = report
            .sale_change(key)
            .ok_or_else(|| ImportError::UnknownSaleChange(key.clone()))?;
        if !decision.is_resolved() {
            warn!(composite_key = %key, "忽略 pending 决策");
            continue;
        }
        out.push(SaleDecisionRecord {
            composite_key: key.clone(),
            decision: *decision,
            old_sale: change.old_sale.clone(),
            new_sale: change.new_sale.clone(),
            decided_by: decided_by.map(str::to_string),
            decided_at: at,
        });
    }
    Ok(out)
}

/// 写入决策审计并把决策回填到报告
///
/// # 返回
/// - 已写入的决策记录
pub async fn record_decisions(
    gateway: &dyn PersistenceGateway,
    job_id: &str,
    report: &mut ComparisonReport,
    choices: &[(String, SaleDecision)],
    decided_by: Option<&str>,
) -> ImportResult<Vec<SaleDecisionRecord>> {
    let records = build_decision_records(report, choices, decided_by, Utc::now())?;
    if records.is_empty() {
        return Ok(records);
    }

    gateway.append_sale_decisions(job_id, &records).await?;

    for rec in &records {
        if let Some(change) = report
            .sale_changes
            .iter_mut()
            .find(|c| c.composite_key == rec.composite_key)
        {
            change.decision = rec.decision;
        }
    }

    info!(job_id, count = records.len(), "售价决策已记录");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::property::{
        AssetInfo, InspectionInfo, PreservedFieldSet, PropertyValues, SaleInfo,
    };
    use crate::domain::types::VendorKind;
    use chrono::NaiveDate;

    fn sale(year: i32, price: f64) -> SaleInfo {
        SaleInfo {
            date: NaiveDate::from_ymd_opt(year, 6, 1),
            price: Some(price),
            book: Some("100".to_string()),
            page: Some("20".to_string()),
            nu: None,
        }
    }

    fn change(decision: SaleDecision) -> SaleChange {
        SaleChange {
            composite_key: "K".to_string(),
            old_sale: sale(2019, 100_000.0),
            new_sale: sale(2023, 180_000.0),
            decision,
            reused: false,
        }
    }

    fn record() -> CanonicalPropertyRecord {
        CanonicalPropertyRecord {
            job_id: "job-1".to_string(),
            composite_key: "K".to_string(),
            vendor: VendorKind::Brt,
            source_row: 2,
            block: None,
            lot: None,
            qualifier: None,
            card: None,
            location: None,
            m4_class: None,
            cama_class: None,
            facility: None,
            vcs: None,
            owner_name: None,
            owner_street: None,
            owner_csz: None,
            sale: sale(2023, 180_000.0),
            values: PropertyValues::default(),
            inspection: InspectionInfo::default(),
            asset: AssetInfo::default(),
            preserved: PreservedFieldSet::default(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_use_new_archives_old_sale() {
        let mut rec = record();
        let c = change(SaleDecision::UseNew);
        assert!(apply_decision(&mut rec, &c, SaleDecision::UseNew, Utc::now()).unwrap());
        assert_eq!(rec.sale, c.new_sale);
        let history = rec.preserved.sales_history().unwrap();
        assert_eq!(history.previous_sales.len(), 1);
        assert_eq!(history.previous_sales[0].sale, c.old_sale);
        assert_eq!(history.last_decision, Some(SaleDecision::UseNew));

        // 再次应用不重复写历史
        assert!(!apply_decision(&mut rec, &c, SaleDecision::UseNew, Utc::now()).unwrap());
        assert_eq!(rec.preserved.sales_history().unwrap().previous_sales.len(), 1);
    }

    #[test]
    fn test_keep_old_and_keep_both() {
        let c = change(SaleDecision::KeepOld);

        let mut kept = record();
        apply_decision(&mut kept, &c, SaleDecision::KeepOld, Utc::now()).unwrap();
        assert_eq!(kept.sale, c.old_sale);
        assert_eq!(kept.preserved.sales_history().unwrap().previous_sales[0].sale, c.old_sale);

        let mut both = record();
        apply_decision(&mut both, &c, SaleDecision::KeepBoth, Utc::now()).unwrap();
        assert_eq!(both.sale, c.old_sale);
        assert_eq!(both.preserved.sales_history().unwrap().previous_sales[0].sale, c.new_sale);
    }

    #[test]
    fn test_unreadable_history_is_not_overwritten() {
        let corrupt = serde_json::json!({"previous_sales": "corrupt"});
        let mut rec = record();
        rec.sale = sale(2019, 100_000.0);
        rec.preserved.set(crate::domain::property::SALES_HISTORY_FIELD, corrupt.clone());
        let c = change(SaleDecision::UseNew);

        assert!(apply_decision(&mut rec, &c, SaleDecision::UseNew, Utc::now()).is_err());
        assert_eq!(rec.sale, c.old_sale);
        assert_eq!(
            rec.preserved.get(crate::domain::property::SALES_HISTORY_FIELD),
            Some(&corrupt)
        );

        let report = ComparisonReport {
            sale_changes: vec![c],
            changed_count: 1,
            ..Default::default()
        };
        let mut records = vec![rec];
        let err = apply_decisions(&mut records, &report, Utc::now()).unwrap_err();
        assert!(matches!(err, ImportError::SalesHistoryError { ref key, .. } if key == "K"));
        assert_eq!(
            records[0].preserved.get(crate::domain::property::SALES_HISTORY_FIELD),
            Some(&corrupt)
        );
    }

    #[test]
    fn test_apply_decisions_rejects_pending() {
        let report = ComparisonReport {
            sale_changes: vec![change(SaleDecision::Pending)],
            changed_count: 1,
            ..Default::default()
        };
        let mut records = vec![record()];
        let err = apply_decisions(&mut records, &report, Utc::now()).unwrap_err();
        assert!(matches!(err, ImportError::PendingSaleDecisions { count: 1 }));
    }

    #[test]
    fn test_build_records_unknown_key() {
        let report = ComparisonReport {
            sale_changes: vec![change(SaleDecision::Pending)],
            ..Default::default()
        };
        let ok = build_decision_records(
            &report,
            &[("K".to_string(), SaleDecision::UseNew)],
            Some("assessor"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].decided_by.as_deref(), Some("assessor"));

        let err = build_decision_records(
            &report,
            &[("MISSING".to_string(), SaleDecision::KeepOld)],
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::UnknownSaleChange(_)));
    }
}
