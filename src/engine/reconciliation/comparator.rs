// ==========================================
// CAMA 导入引擎 - 快照比对
// ==========================================
// 规则:
// - removed = 旧 key − 新 key；added = 新 key − 旧 key
// - 两侧都有: 分类字段不同 → ClassChanged（无需决策）
// - 两侧都有: 售价任一分量不同 → SaleChanged
// - 历史决策的旧 / 新售价与本次一致时沿用，否则重置为 pending
// 分类字段: BRT 比较 m4 + cama；Microsystems 只有 m4
// ==========================================

use crate::domain::property::{CanonicalPropertyRecord, SaleInfo};
use crate::domain::reconciliation::{
    ClassChange, ClassField, ComparisonReport, PropertyRef, SaleChange, SaleDecisionRecord,
};
use crate::domain::types::{SaleDecision, VendorKind};
use std::collections::{BTreeSet, HashMap};

/// 售价比较容差
pub const PRICE_TOLERANCE: f64 = 0.01;

fn text_eq(a: &Option<String>, b: &Option<String>) -> bool {
    a.as_deref().unwrap_or("").trim() == b.as_deref().unwrap_or("").trim()
}

/// 售价是否相同（价格缺失按 0，文本缺失按空串）
pub fn sales_equal(a: &SaleInfo, b: &SaleInfo) -> bool {
    a.date == b.date
        && (a.price.unwrap_or(0.0) - b.price.unwrap_or(0.0)).abs() <= PRICE_TOLERANCE
        && text_eq(&a.book, &b.book)
        && text_eq(&a.page, &b.page)
        && text_eq(&a.nu, &b.nu)
}

fn class_changes(old: &CanonicalPropertyRecord, new: &CanonicalPropertyRecord) -> Vec<ClassChange> {
    let mut fields = vec![(ClassField::M4Class, &old.m4_class, &new.m4_class)];
    if new.vendor == VendorKind::Brt {
        fields.push((ClassField::CamaClass, &old.cama_class, &new.cama_class));
    }

    fields
        .into_iter()
        .filter(|(_, o, n)| !text_eq(o, n))
        .map(|(field, o, n)| ClassChange {
            composite_key: new.composite_key.clone(),
            field,
            old_value: o.clone(),
            new_value: n.clone(),
        })
        .collect()
}

/// 决策沿用判断: 记录时的旧 / 新售价与本次比较完全一致
fn reusable_decision(
    prior: Option<&SaleDecisionRecord>,
    old_sale: &SaleInfo,
    new_sale: &SaleInfo,
) -> Option<SaleDecision> {
    let p = prior?;
    (p.decision.is_resolved()
        && sales_equal(&p.old_sale, old_sale)
        && sales_equal(&p.new_sale, new_sale))
    .then_some(p.decision)
}

fn property_ref(record: &CanonicalPropertyRecord) -> PropertyRef {
    PropertyRef {
        composite_key: record.composite_key.clone(),
        location: record.location.clone(),
    }
}

/// 比对旧快照与新解析记录
///
/// # 参数
/// - old: 已存快照（按 key 索引）
/// - new: 新文件解析结果（key 已去重）
/// - prior: 每个 key 的最新历史决策
///
/// # 返回
/// - ComparisonReport，各列表按 key 排序
pub fn compare(
    old: &HashMap<String, CanonicalPropertyRecord>,
    new: &[CanonicalPropertyRecord],
    prior: &HashMap<String, SaleDecisionRecord>,
) -> ComparisonReport {
    let new_index: HashMap<&str, &CanonicalPropertyRecord> =
        new.iter().map(|r| (r.composite_key.as_str(), r)).collect();
    let all_keys: BTreeSet<&str> = old
        .keys()
        .map(String::as_str)
        .chain(new_index.keys().copied())
        .collect();

    let mut report = ComparisonReport::default();

    for key in all_keys {
        match (old.get(key), new_index.get(key)) {
            (None, Some(n)) => report.added.push(property_ref(n)),
            (Some(o), None) => report.removed.push(property_ref(o)),
            (Some(o), Some(n)) => {
                let classes = class_changes(o, n);
                let sale_changed = !sales_equal(&o.sale, &n.sale);

                if classes.is_empty() && !sale_changed {
                    report.unchanged_count += 1;
                    continue;
                }
                report.changed_count += 1;
                report.class_changes.extend(classes);

                if sale_changed {
                    let reused = reusable_decision(prior.get(key), &o.sale, &n.sale);
                    report.sale_changes.push(SaleChange {
                        composite_key: key.to_string(),
                        old_sale: o.sale.clone(),
                        new_sale: n.sale.clone(),
                        decision: reused.unwrap_or(SaleDecision::Pending),
                        reused: reused.is_some(),
                    });
                }
            }
            (None, None) => {}
        }
    }

    report
}
