// ==========================================
// CAMA 导入引擎 - 对账领域模型
// ==========================================
// 职责: 变更记录 / 对账报告 / 售价决策审计记录
// 红线: 决策与历史只追加
// ==========================================

use crate::domain::property::SaleInfo;
use crate::domain::types::SaleDecision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 分类字段名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassField {
    M4Class,
    CamaClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRef {
    pub composite_key: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassChange {
    pub composite_key: String,
    pub field: ClassField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleChange {
    pub composite_key: String,
    pub old_sale: SaleInfo,
    pub new_sale: SaleInfo,
    pub decision: SaleDecision,
    /// 决策沿用自历史记录
    pub reused: bool,
}

// ==========================================
// ChangeRecord
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeRecord {
    Added(PropertyRef),
    Removed(PropertyRef),
    ClassChanged(ClassChange),
    SaleChanged(SaleChange),
}

impl ChangeRecord {
    pub fn composite_key(&self) -> &str {
        match self {
            ChangeRecord::Added(r) | ChangeRecord::Removed(r) => &r.composite_key,
            ChangeRecord::ClassChanged(c) => &c.composite_key,
            ChangeRecord::SaleChanged(s) => &s.composite_key,
        }
    }
}

// ==========================================
// ComparisonReport - 对账报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub added: Vec<PropertyRef>,
    pub removed: Vec<PropertyRef>,
    pub class_changes: Vec<ClassChange>,
    pub sale_changes: Vec<SaleChange>,
    /// 两侧都存在且有任一变更的 key 数
    pub changed_count: usize,
    pub unchanged_count: usize,
}

impl ComparisonReport {
    pub fn pending_sale_changes(&self) -> impl Iterator<Item = &SaleChange> {
        self.sale_changes
            .iter()
            .filter(|c| c.decision == SaleDecision::Pending)
    }

    pub fn has_pending_decisions(&self) -> bool {
        self.pending_sale_changes().next().is_some()
    }

    pub fn sale_change(&self, key: &str) -> Option<&SaleChange> {
        self.sale_changes.iter().find(|c| c.composite_key == key)
    }

    pub fn change_records(&self) -> Vec<ChangeRecord> {
        let mut out = Vec::with_capacity(
            self.added.len()
                + self.removed.len()
                + self.class_changes.len()
                + self.sale_changes.len(),
        );
        out.extend(self.added.iter().cloned().map(ChangeRecord::Added));
        out.extend(self.removed.iter().cloned().map(ChangeRecord::Removed));
        out.extend(self.class_changes.iter().cloned().map(ChangeRecord::ClassChanged));
        out.extend(self.sale_changes.iter().cloned().map(ChangeRecord::SaleChanged));
        out
    }
}

// ==========================================
// SaleDecisionRecord - 决策审计
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleDecisionRecord {
    pub composite_key: String,
    pub decision: SaleDecision,
    pub old_sale: SaleInfo,
    pub new_sale: SaleInfo,
    pub decided_by: Option<String>,
    pub decided_at: DateTime<Utc>,
}
