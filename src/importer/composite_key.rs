// ==========================================
// CAMA 导入引擎 - Composite Key 生成
// ==========================================
// 格式: {year}{ccdd}-{block}-{lot}_{qualifier}-{card}-{location}
// 红线: 全系统唯一实现；导入、对账、合并都必须调用这里
// ==========================================

use crate::domain::property::{ImportContext, RawVendorRecord};
use crate::domain::types::VendorKind;

/// 缺失分量的占位符
pub const MISSING_COMPONENT: &str = "NONE";

/// 身份字段（已按厂商表头取出，未清洗）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFields {
    pub block: Option<String>,
    pub lot: Option<String>,
    pub qualifier: Option<String>,
    pub card: Option<String>,
    pub location: Option<String>,
}

/// 各厂商身份列名: (block, lot, qualifier, card, location)
pub fn identity_headers(vendor: VendorKind) -> [&'static str; 5] {
    match vendor {
        VendorKind::Microsystems => ["Block", "Lot", "Qual", "Bldg", "Location"],
        VendorKind::Brt => ["BLOCK", "LOT", "QUALIFIER", "CARD", "PROPERTY_LOCATION"],
    }
}

impl IdentityFields {
    pub fn from_raw(raw: &RawVendorRecord) -> Self {
        let [block, lot, qualifier, card, location] = identity_headers(raw.vendor);
        let take = |h: &str| raw.get(h).map(|s| s.to_string());
        Self {
            block: take(block),
            lot: take(lot),
            qualifier: take(qualifier),
            card: take(card),
            location: take(location),
        }
    }
}

fn component(value: Option<&str>) -> &str {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => MISSING_COMPONENT,
    }
}

/// 生成 composite key（纯函数）
///
/// # 参数
/// - year: 建档年份
/// - ccdd: 辖区代码
/// - block / lot / qualifier / card / location: 身份分量，TRIM 后为空即 NONE
///
/// # 示例
/// - (2025, "0301", "12", "4", "", "1", "100 Main St") → "20250301-12-4_NONE-1-100 Main St"
pub fn composite_key(
    year: i32,
    ccdd: &str,
    block: Option<&str>,
    lot: Option<&str>,
    qualifier: Option<&str>,
    card: Option<&str>,
    location: Option<&str>,
) -> String {
    format!(
        "{}{}-{}-{}_{}-{}-{}",
        year,
        ccdd.trim(),
        component(block),
        component(lot),
        component(qualifier),
        component(card),
        component(location),
    )
}

/// 由身份字段生成 key
pub fn key_for_identity(ctx: &ImportContext, id: &IdentityFields) -> String {
    composite_key(
        ctx.year,
        &ctx.ccdd,
        id.block.as_deref(),
        id.lot.as_deref(),
        id.qualifier.as_deref(),
        id.card.as_deref(),
        id.location.as_deref(),
    )
}

/// 由原始行生成 key
pub fn key_for_record(ctx: &ImportContext, raw: &RawVendorRecord) -> String {
    key_for_identity(ctx, &IdentityFields::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::property::HeaderIndex;
    use std::sync::Arc;

    #[test]
    fn test_example_key() {
        let key = composite_key(
            2025,
            "0301",
            Some("12"),
            Some("4"),
            Some(""),
            Some("1"),
            Some("100 Main St"),
        );
        assert_eq!(key, "20250301-12-4_NONE-1-100 Main St");
    }

    #[test]
    fn test_components_are_trimmed_and_missing_become_none() {
        let key = composite_key(2024, " 1505 ", Some(" 7 "), None, Some("  "), None, Some(" A "));
        assert_eq!(key, "20241505-7-NONE_NONE-NONE-A");
    }

    #[test]
    fn test_same_identity_from_both_vendors_yields_same_key() {
        let ctx = ImportContext::new("job-1", 2025, "0301");

        let ms = RawVendorRecord::new(
            VendorKind::Microsystems,
            2,
            Arc::new(HeaderIndex::new(
                ["Block", "Lot", "Qual", "Bldg", "Location"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )),
            ["12", "4", "", "1", "100 Main St"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        let brt = RawVendorRecord::new(
            VendorKind::Brt,
            2,
            Arc::new(HeaderIndex::new(
                ["PROPERTY_LOCATION", "CARD", "QUALIFIER", "LOT", "BLOCK"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )),
            ["100 Main St ", "1", " ", "4", "12"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );

        assert_eq!(key_for_record(&ctx, &ms), key_for_record(&ctx, &brt));
        assert_eq!(key_for_record(&ctx, &ms), "20250301-12-4_NONE-1-100 Main St");
    }
}
