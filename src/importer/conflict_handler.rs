// ==========================================
// CAMA 导入引擎 - composite key 冲突处理
// ==========================================
// 职责: 检测同一文件内多行解析为同一 key 的情况
// 策略: 后写覆盖（保留首次出现的位置），每个冲突 key 上报 KeyCollision
// ==========================================

use crate::domain::property::CanonicalPropertyRecord;
use crate::importer::importer_trait::ConflictHandler;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// 同一 key 对应的多个源行（KeyCollisionAmbiguity）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCollision {
    pub composite_key: String,
    /// 按出现顺序的源行号，最后一行生效
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct DedupeOutcome {
    pub records: Vec<CanonicalPropertyRecord>,
    pub collisions: Vec<KeyCollision>,
}

/// 检测 key 冲突（不修改记录）
///
/// # 返回
/// - 按首次出现顺序排列的冲突列表
pub fn detect_key_collisions(records: &[CanonicalPropertyRecord]) -> Vec<KeyCollision> {
    let mut order: Vec<&str> = Vec::new();
    let mut rows: HashMap<&str, Vec<usize>> = HashMap::new();

    for record in records {
        let entry = rows.entry(record.composite_key.as_str()).or_insert_with(|| {
            order.push(record.composite_key.as_str());
            Vec::new()
        });
        entry.push(record.source_row);
    }

    order
        .into_iter()
        .filter_map(|key| {
            let r = rows.remove(key)?;
            (r.len() > 1).then(|| KeyCollision {
                composite_key: key.to_string(),
                rows: r,
            })
        })
        .collect()
}

/// 去重: 后写覆盖，位置保持首次出现处
pub fn dedupe_last_wins(records: Vec<CanonicalPropertyRecord>) -> Vec<CanonicalPropertyRecord> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<CanonicalPropertyRecord> = Vec::with_capacity(records.len());

    for record in records {
        match position.get(&record.composite_key) {
            Some(&i) => out[i] = record,
            None => {
                position.insert(record.composite_key.clone(), out.len());
                out.push(record);
            }
        }
    }

    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictHandlerImpl;

impl ConflictHandler for ConflictHandlerImpl {
    fn resolve_key_collisions(&self, records: Vec<CanonicalPropertyRecord>) -> DedupeOutcome {
        let collisions = detect_key_collisions(&records);
        for c in &collisions {
            warn!(
                composite_key = %c.composite_key,
                rows = ?c.rows,
                "composite key 冲突，后出现的行生效"
            );
        }

        DedupeOutcome {
            records: dedupe_last_wins(records),
            collisions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::property::{
        AssetInfo, InspectionInfo, PreservedFieldSet, PropertyValues, SaleInfo,
    };
    use crate::domain::types::VendorKind;

    fn record(key: &str, row: usize, owner: &str) -> CanonicalPropertyRecord {
        CanonicalPropertyRecord {
            job_id: "job-1".to_string(),
            composite_key: key.to_string(),
            vendor: VendorKind::Brt,
            source_row: row,
            block: None,
            lot: None,
            qualifier: None,
            card: None,
            location: None,
            m4_class: None,
            cama_class: None,
            facility: None,
            vcs: None,
            owner_name: Some(owner.to_string()),
            owner_street: None,
            owner_csz: None,
            sale: SaleInfo::default(),
            values: PropertyValues::default(),
            inspection: InspectionInfo::default(),
            asset: AssetInfo::default(),
            preserved: PreservedFieldSet::default(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_no_collisions() {
        let out = ConflictHandlerImpl.resolve_key_collisions(vec![
            record("A", 2, "x"),
            record("B", 3, "y"),
        ]);
        assert_eq!(out.records.len(), 2);
        assert!(out.collisions.is_empty());
    }

    #[test]
    fn test_last_write_wins_and_collision_reported() {
        let out = ConflictHandlerImpl.resolve_key_collisions(vec![
            record("A", 2, "first"),
            record("B", 3, "b"),
            record("A", 4, "second"),
            record("A", 5, "third"),
        ]);

        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].composite_key, "A");
        assert_eq!(out.records[0].owner_name.as_deref(), Some("third"));
        assert_eq!(out.records[1].composite_key, "B");
        assert_eq!(
            out.collisions,
            vec![KeyCollision {
                composite_key: "A".to_string(),
                rows: vec![2, 4, 5],
            }]
        );
    }
}
