// ==========================================
// CAMA 导入引擎 - 代码定义表领域模型
// ==========================================
// 生命周期: 每次代码文件上传整体替换，之后只读
// ==========================================

use crate::domain::types::{InfoSourceCategory, VendorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 不匹配任何拆分规则的代码归入此分组
pub const DIRECT_GROUP: &str = "direct";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeDefinition {
    pub code: String,
    pub description: String,
    pub rate: Option<f64>,
    pub constant: Option<f64>,
    pub category: Option<String>,
    pub table: Option<String>,
    pub updated: Option<String>,
    pub prefix: Option<String>,
}

/// 信息来源代码（INFO BY）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoSourceCode {
    pub code: String,
    pub description: String,
    pub section: String,
    /// 描述无法归类时为 None
    pub category: Option<InfoSourceCategory>,
}

// ==========================================
// CodeDefinitionTable
// ==========================================
// sections: 分组（BRT 为节名，Microsystems 为前缀）→ 代码 → 定义
// flat_lookup: 与前缀无关的直接查找（完整代码与后缀均可命中）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeDefinitionTable {
    pub vendor: VendorKind,
    pub sections: BTreeMap<String, BTreeMap<String, CodeDefinition>>,
    pub categories: BTreeMap<String, String>,
    pub flat_lookup: BTreeMap<String, String>,
    pub info_sources: Vec<InfoSourceCode>,
    /// BRT 原始节数据（节名 → JSON 对象），供信息来源搜索与审计
    #[serde(default)]
    pub raw_sections: BTreeMap<String, serde_json::Value>,
    pub parsed_at: DateTime<Utc>,
}

impl CodeDefinitionTable {
    pub fn new(vendor: VendorKind) -> Self {
        Self {
            vendor,
            sections: BTreeMap::new(),
            categories: BTreeMap::new(),
            flat_lookup: BTreeMap::new(),
            info_sources: Vec::new(),
            raw_sections: BTreeMap::new(),
            parsed_at: Utc::now(),
        }
    }

    pub fn description(&self, code: &str) -> Option<&str> {
        self.flat_lookup.get(code.trim()).map(|s| s.as_str())
    }

    pub fn details(&self, section: &str, code: &str) -> Option<&CodeDefinition> {
        self.sections.get(section).and_then(|s| s.get(code))
    }

    /// 按类别名取全部代码定义
    pub fn codes_by_category(&self, category: &str) -> Vec<&CodeDefinition> {
        self.sections
            .values()
            .flat_map(|s| s.values())
            .filter(|d| d.category.as_deref() == Some(category))
            .collect()
    }

    pub fn raw_section(&self, name: &str) -> Option<&serde_json::Value> {
        self.raw_sections.get(name)
    }

    pub fn raw_sections(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.raw_sections.iter()
    }

    /// 同名节的多个 JSON 块合并到同一对象
    pub fn raw_sections_insert(&mut self, section: &str, key: &str, item: &serde_json::Value) {
        let entry = self
            .raw_sections
            .entry(section.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(map) = entry {
            map.insert(key.to_string(), item.clone());
        }
    }

    /// 指定类别的信息来源代码
    pub fn info_sources_in(&self, category: InfoSourceCategory) -> Vec<&str> {
        self.info_sources
            .iter()
            .filter(|s| s.category == Some(category))
            .map(|s| s.code.as_str())
            .collect()
    }

    pub fn definition_count(&self) -> usize {
        self.sections.values().map(|s| s.len()).sum()
    }
}
