// ==========================================
// CAMA 导入引擎 - 房产记录领域模型
// ==========================================
// 职责: 原始厂商行 / 规范化房产记录 / 保留字段集合
// 红线: 保留字段只由人工流程写入，解析器永不派生
// ==========================================

use crate::domain::code_table::CodeDefinitionTable;
use crate::domain::types::{SaleDecision, VendorKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// 保留字段名: 售价历史
pub const SALES_HISTORY_FIELD: &str = "sales_history";

// ==========================================
// ImportContext - 单次运行上下文
// ==========================================
// 运行开始时构造，运行结束即丢弃；替代模块级缓存
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub run_id: Uuid,
    pub job_id: String,
    pub year: i32,
    pub ccdd: String,
    pub started_at: DateTime<Utc>,
    /// 本次运行使用的代码表（用于代码描述查找）
    pub code_table: Option<Arc<CodeDefinitionTable>>,
}

impl ImportContext {
    pub fn new(job_id: impl Into<String>, year: i32, ccdd: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job_id: job_id.into(),
            year,
            ccdd: ccdd.into().trim().to_string(),
            started_at: Utc::now(),
            code_table: None,
        }
    }

    pub fn with_code_table(mut self, table: Arc<CodeDefinitionTable>) -> Self {
        self.code_table = Some(table);
        self
    }

    pub fn code_description(&self, code: &str) -> Option<&str> {
        self.code_table.as_ref().and_then(|t| t.description(code))
    }
}

// ==========================================
// HeaderIndex - 表头索引（同一文件内所有行共享）
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    /// 表头需已完成重名处理
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self { names, positions }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

// ==========================================
// RawVendorRecord - 原始厂商行
// ==========================================
// 有序映射: 表头名 → 字符串值
#[derive(Debug, Clone)]
pub struct RawVendorRecord {
    pub vendor: VendorKind,
    pub row_number: usize,
    headers: Arc<HeaderIndex>,
    values: Vec<String>,
}

impl RawVendorRecord {
    pub fn new(
        vendor: VendorKind,
        row_number: usize,
        headers: Arc<HeaderIndex>,
        values: Vec<String>,
    ) -> Self {
        Self {
            vendor,
            row_number,
            headers,
            values,
        }
    }

    /// 按表头取值（不存在返回 None，空串原样返回）
    pub fn get(&self, header: &str) -> Option<&str> {
        self.headers
            .position(header)
            .and_then(|i| self.values.get(i))
            .map(|s| s.as_str())
    }

    /// 按表头取非空值
    pub fn non_blank(&self, header: &str) -> Option<&str> {
        self.get(header).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .names()
            .iter()
            .map(|h| h.as_str())
            .zip(self.values.iter().map(|v| v.as_str()))
    }

    /// 审计用 JSON 对象
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::Value::Object(map)
    }
}

// ==========================================
// SaleInfo - 当前售价信息
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleInfo {
    pub date: Option<NaiveDate>,
    pub price: Option<f64>,
    pub book: Option<String>,
    pub page: Option<String>,
    pub nu: Option<String>,
}

impl SaleInfo {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.price.is_none()
            && self.book.is_none()
            && self.page.is_none()
            && self.nu.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyValues {
    pub mod_land: Option<f64>,
    pub cama_land: Option<f64>,
    pub mod_improvement: Option<f64>,
    pub cama_improvement: Option<f64>,
    pub mod_total: Option<f64>,
    pub cama_total: Option<f64>,
    pub base_cost: Option<f64>,
    pub det_items: Option<f64>,
    pub repl_cost: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionInfo {
    pub info_by: Option<String>,
    pub list_by: Option<String>,
    pub list_date: Option<NaiveDate>,
    pub measure_by: Option<String>,
    pub measure_date: Option<NaiveDate>,
    pub price_by: Option<String>,
    pub price_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub sfla: Option<f64>,
    pub year_built: Option<i32>,
    pub neighborhood: Option<String>,
    pub type_use: Option<String>,
    pub building_class: Option<String>,
    pub design_style: Option<String>,
    pub story_height: Option<f64>,
    pub lot_frontage: Option<f64>,
    pub lot_depth: Option<f64>,
    pub lot_acre: Option<f64>,
    pub lot_sf: Option<f64>,
    pub total_baths: Option<f64>,
}

// ==========================================
// PreviousSale / SalesHistory - 售价历史（只追加）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousSale {
    pub sale: SaleInfo,
    pub decision: SaleDecision,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesHistory {
    pub previous_sales: Vec<PreviousSale>,
    pub last_decision: Option<SaleDecision>,
    pub last_decided_at: Option<DateTime<Utc>>,
}

impl SalesHistory {
    /// 追加一条历史；空售价或与末条售价相同则不变（重复导入幂等）
    pub fn push(&mut self, sale: SaleInfo, decision: SaleDecision, at: DateTime<Utc>) -> bool {
        if sale.is_empty() {
            return false;
        }
        if self
            .previous_sales
            .last()
            .map(|p| p.sale == sale)
            .unwrap_or(false)
        {
            return false;
        }
        self.previous_sales.push(PreviousSale {
            sale,
            decision,
            recorded_at: at,
        });
        self.last_decision = Some(decision);
        self.last_decided_at = Some(at);
        true
    }
}

// ==========================================
// PreservedFieldSet - 人工维护字段（部分记录）
// ==========================================
// 值为 JSON；null 视为缺失
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreservedFieldSet {
    values: BTreeMap<String, serde_json::Value>,
}

impl PreservedFieldSet {
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.values.get(field).filter(|v| !v.is_null())
    }

    pub fn set(&mut self, field: impl Into<String>, value: serde_json::Value) {
        let field = field.into();
        if value.is_null() {
            self.values.remove(&field);
        } else {
            self.values.insert(field, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter().filter(|(_, v)| !v.is_null())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取售价历史
    ///
    /// # 返回
    /// - 字段缺失 → 空历史
    /// - 格式异常 → Err（不得以空历史覆盖已存内容）
    pub fn sales_history(&self) -> serde_json::Result<SalesHistory> {
        match self.get(SALES_HISTORY_FIELD) {
            Some(v) => serde_json::from_value(v.clone()),
            None => Ok(SalesHistory::default()),
        }
    }

    pub fn set_sales_history(&mut self, history: &SalesHistory) -> serde_json::Result<()> {
        let value = serde_json::to_value(history)?;
        self.set(SALES_HISTORY_FIELD, value);
        Ok(())
    }
}

// ==========================================
// CanonicalPropertyRecord - 规范化房产记录
// ==========================================
// 用途: 导入层生成，仓储层持久化，对账引擎比较
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPropertyRecord {
    // ===== 身份 =====
    pub job_id: String,
    pub composite_key: String,
    pub vendor: VendorKind,
    pub source_row: usize,
    pub block: Option<String>,
    pub lot: Option<String>,
    pub qualifier: Option<String>,
    pub card: Option<String>,
    pub location: Option<String>,

    // ===== 分类 =====
    pub m4_class: Option<String>,
    pub cama_class: Option<String>,
    pub facility: Option<String>,
    pub vcs: Option<String>,

    // ===== 业主 =====
    pub owner_name: Option<String>,
    pub owner_street: Option<String>,
    pub owner_csz: Option<String>,

    // ===== 业务明细 =====
    pub sale: SaleInfo,
    pub values: PropertyValues,
    pub inspection: InspectionInfo,
    pub asset: AssetInfo,

    // ===== 人工维护 =====
    #[serde(default)]
    pub preserved: PreservedFieldSet,

    // ===== 审计 =====
    pub raw: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale(price: f64) -> SaleInfo {
        SaleInfo {
            date: NaiveDate::from_ymd_opt(2020, 1, 1),
            price: Some(price),
            ..Default::default()
        }
    }

    #[test]
    fn test_raw_record_lookup_by_header() {
        let headers = Arc::new(HeaderIndex::new(vec![
            "Block".to_string(),
            "Lot".to_string(),
            "Qual".to_string(),
        ]));
        let raw = RawVendorRecord::new(
            VendorKind::Microsystems,
            2,
            headers,
            vec!["12".to_string(), "4".to_string(), "  ".to_string()],
        );

        assert_eq!(raw.get("Block"), Some("12"));
        assert_eq!(raw.get("Qual"), Some("  "));
        assert_eq!(raw.non_blank("Qual"), None);
        assert_eq!(raw.get("Missing"), None);
        assert_eq!(raw.to_json()["Lot"], "4");
    }

    #[test]
    fn test_sales_history_skips_duplicate_tail() {
        let mut history = SalesHistory::default();
        let now = Utc::now();
        assert!(history.push(sale(100_000.0), SaleDecision::UseNew, now));
        assert!(!history.push(sale(100_000.0), SaleDecision::UseNew, now));
        assert!(history.push(sale(120_000.0), SaleDecision::KeepBoth, now));
        assert_eq!(history.previous_sales.len(), 2);
        assert_eq!(history.last_decision, Some(SaleDecision::KeepBoth));
    }

    #[test]
    fn test_preserved_null_is_absent() {
        let mut set = PreservedFieldSet::default();
        set.set("validation_status", serde_json::json!("REVIEWED"));
        set.set("new_vcs", serde_json::Value::Null);
        assert_eq!(set.len(), 1);
        assert!(set.get("new_vcs").is_none());

        set.set("validation_status", serde_json::Value::Null);
        assert!(set.is_empty());
    }

    #[test]
    fn test_sales_history_json_round_trip_through_preserved() {
        let mut set = PreservedFieldSet::default();
        let mut history = SalesHistory::default();
        history.push(sale(1.0), SaleDecision::KeepOld, Utc::now());
        set.set_sales_history(&history).unwrap();
        assert_eq!(set.sales_history().unwrap(), history);
    }

    #[test]
    fn test_malformed_sales_history_is_an_error() {
        let mut set = PreservedFieldSet::default();
        assert!(set.sales_history().unwrap().previous_sales.is_empty());

        set.set(SALES_HISTORY_FIELD, serde_json::json!({"previous_sales": "corrupt"}));
        assert!(set.sales_history().is_err());
    }
}
