// ==========================================
// CAMA 导入引擎 - 字段映射器实现
// ==========================================
// 职责: 厂商原始行 → CanonicalPropertyRecord（含派生字段计算）
// 红线: composite key 必须通过 composite_key 模块生成
// 红线: 保留字段永不由映射器写入
// ==========================================

use crate::domain::property::{
    AssetInfo, CanonicalPropertyRecord, ImportContext, InspectionInfo, PreservedFieldSet,
    PropertyValues, RawVendorRecord, SaleInfo,
};
use crate::domain::types::VendorKind;
use crate::importer::composite_key::{key_for_record, IdentityFields};
use crate::importer::data_cleaner::{round_to, DataCleanerImpl};
use crate::importer::importer_trait::{DataCleaner, FieldMapper};

/// 1 英亩 = 43560 平方英尺
pub const SQFT_PER_ACRE: f64 = 43_560.0;

/// BRT 土地单位栏位数（LANDUR_1..6 / LANDFF_1..6 / LANDAVGDEP_1..6）
const BRT_LAND_SLOTS: usize = 6;

/// Microsystems 临街 / 进深栏位数（Front Ft1..3 / Avg Depth1..3）
const MICROSYSTEMS_LAND_SLOTS: usize = 3;

#[derive(Default)]
pub struct FieldMapperImpl {
    cleaner: DataCleanerImpl,
}

impl FieldMapperImpl {
    pub fn new() -> Self {
        Self::default()
    }

    fn text(&self, raw: &RawVendorRecord, header: &str) -> Option<String> {
        self.cleaner.clean_text(raw.get(header))
    }

    fn num(&self, raw: &RawVendorRecord, header: &str) -> Option<f64> {
        self.cleaner.parse_numeric(raw.get(header))
    }

    /// 非零数值（0 与缺失同视）
    fn nonzero(&self, raw: &RawVendorRecord, header: &str) -> Option<f64> {
        self.num(raw, header).filter(|v| *v != 0.0)
    }

    fn date(&self, raw: &RawVendorRecord, header: &str) -> Option<chrono::NaiveDate> {
        self.cleaner.parse_date(raw.get(header))
    }

    /// 身份字段与审计字段（两家厂商一致）
    fn base_record(&self, raw: &RawVendorRecord, ctx: &ImportContext) -> CanonicalPropertyRecord {
        let id = IdentityFields::from_raw(raw);
        let clean = |v: Option<String>| self.cleaner.clean_text(v.as_deref());

        CanonicalPropertyRecord {
            job_id: ctx.job_id.clone(),
            composite_key: key_for_record(ctx, raw),
            vendor: raw.vendor,
            source_row: raw.row_number,
            block: clean(id.block),
            lot: clean(id.lot),
            qualifier: clean(id.qualifier),
            card: clean(id.card),
            location: clean(id.location),
            m4_class: None,
            cama_class: None,
            facility: None,
            vcs: None,
            owner_name: None,
            owner_street: None,
            owner_csz: None,
            sale: SaleInfo::default(),
            values: PropertyValues::default(),
            inspection: InspectionInfo::default(),
            asset: AssetInfo::default(),
            preserved: PreservedFieldSet::default(),
            raw: raw.to_json(),
        }
    }

    // ==========================================
    // Microsystems
    // ==========================================
    // 重名表头已按出现顺序改名: 第一列 → mod，第二列（"2" 后缀）→ cama
    fn map_microsystems(&self, raw: &RawVendorRecord, ctx: &ImportContext) -> CanonicalPropertyRecord {
        let mut record = self.base_record(raw, ctx);

        record.m4_class = self.text(raw, "Class");
        record.facility = self.text(raw, "Facility Name");
        record.vcs = self.text(raw, "VCS");

        record.owner_name = self.text(raw, "Owner Name");
        record.owner_street = self.text(raw, "Owner Street");
        record.owner_csz = self.text(raw, "Owner Csz");

        record.sale = SaleInfo {
            date: self.date(raw, "Sale Date"),
            price: self.num(raw, "Sale Price"),
            book: self.text(raw, "Sale Book"),
            page: self.text(raw, "Sale Page"),
            nu: self.text(raw, "Sale Nu"),
        };

        record.values = PropertyValues {
            mod_land: self.num(raw, "Land Value"),
            cama_land: self.num(raw, "Land Value2"),
            mod_improvement: self.num(raw, "Impr Value"),
            cama_improvement: self.num(raw, "Impr Value2"),
            mod_total: self.num(raw, "Totl Value"),
            cama_total: self.num(raw, "Totl Value2"),
            base_cost: self.num(raw, "Base Cost"),
            det_items: self.num(raw, "Det Items"),
            repl_cost: self.num(raw, "Cost New"),
        };

        record.inspection = InspectionInfo {
            info_by: self.text(raw, "Interior Finish3"),
            list_by: self.text(raw, "Insp By"),
            list_date: self.date(raw, "Insp Date"),
            measure_by: self.text(raw, "Measured By"),
            measure_date: self.date(raw, "Insp Date 1"),
            price_by: None,
            price_date: None,
        };

        let frontage: Vec<f64> = (1..=MICROSYSTEMS_LAND_SLOTS)
            .filter_map(|i| self.nonzero(raw, &format!("Front Ft{}", i)))
            .collect();
        let depths: Vec<f64> = (1..=MICROSYSTEMS_LAND_SLOTS)
            .filter_map(|i| self.nonzero(raw, &format!("Avg Depth{}", i)))
            .collect();

        record.asset = AssetInfo {
            sfla: self.num(raw, "Livable Area"),
            year_built: self.cleaner.parse_integer(raw.get("Year Built")),
            neighborhood: self.text(raw, "Neighborhood"),
            type_use: self.text(raw, "Type Use Code"),
            building_class: self.text(raw, "Bldg Qual Class Code"),
            design_style: self.text(raw, "Style Code"),
            story_height: self.cleaner.parse_story_height(raw.get("Story Height")),
            lot_frontage: sum_of(&frontage),
            lot_depth: average_of(&depths).map(|v| round_to(v, 2)),
            lot_acre: self.num(raw, "Lot Size In Acres").map(|v| round_to(v, 2)),
            lot_sf: self
                .cleaner
                .parse_integer(raw.get("Lot Size In Sf"))
                .map(f64::from),
            total_baths: self.microsystems_baths(raw),
        };

        record
    }

    /// 4 / 3 件套 = 1.0，2 件套 = 0.5
    fn microsystems_baths(&self, raw: &RawVendorRecord) -> Option<f64> {
        let weighted = [
            ("4 Fixture Bath", 1.0),
            ("3 Fixture Bath", 1.0),
            ("2 Fixture Bath", 0.5),
        ];
        let total: f64 = weighted
            .iter()
            .map(|(h, w)| self.num(raw, h).unwrap_or(0.0) * w)
            .sum();
        (total > 0.0).then_some(total)
    }

    // ==========================================
    // BRT
    // ==========================================
    fn map_brt(&self, raw: &RawVendorRecord, ctx: &ImportContext) -> CanonicalPropertyRecord {
        let mut record = self.base_record(raw, ctx);

        record.m4_class = self.text(raw, "PROPERTY_CLASS");
        record.cama_class = self.text(raw, "PROPCLASS");
        record.facility = self.text(raw, "EXEMPT_FACILITYNAME");
        record.vcs = self.text(raw, "VCS");

        record.owner_name = self.text(raw, "OWNER_OWNER");
        record.owner_street = self.text(raw, "OWNER_ADDRESS");
        record.owner_csz = brt_owner_csz(
            self.text(raw, "OWNER_CITYSTATE"),
            self.text(raw, "OWNER_ZIP"),
        );

        record.sale = SaleInfo {
            date: self.date(raw, "CURRENTSALE_DATE"),
            price: self.num(raw, "CURRENTSALE_PRICE"),
            book: self.text(raw, "CURRENTSALE_DEEDBOOK"),
            page: self.text(raw, "CURRENTSALE_DEEDPAGE"),
            nu: self.text(raw, "CURRENTSALE_NUC"),
        };

        record.values = PropertyValues {
            mod_land: self.num(raw, "VALUES_LANDTAXABLEVALUE"),
            cama_land: self.num(raw, "TOTALLANDVALUE"),
            mod_improvement: self.num(raw, "VALUES_IMPROVTAXABLEVALUE"),
            cama_improvement: self.num(raw, "TOTALIMPROVVALUE"),
            mod_total: self.num(raw, "VALUES_NETTAXABLEVALUE"),
            cama_total: self.num(raw, "TOTNETVALUE"),
            base_cost: self.num(raw, "BASEREPLCOST"),
            det_items: self.num(raw, "DETACHEDITEMS"),
            repl_cost: self.num(raw, "REPLCOSTNEW"),
        };

        record.inspection = InspectionInfo {
            info_by: self.text(raw, "INFOBY"),
            list_by: self.text(raw, "LISTBY"),
            list_date: self.date(raw, "LISTDT"),
            measure_by: self.text(raw, "MEASUREBY"),
            measure_date: self.date(raw, "MEASUREDT"),
            price_by: self.text(raw, "PRICEBY"),
            price_date: self.date(raw, "PRICEDT"),
        };

        let frontage: Vec<f64> = (1..=BRT_LAND_SLOTS)
            .filter_map(|i| self.nonzero(raw, &format!("LANDFF_{}", i)))
            .collect();
        let depths: Vec<f64> = (1..=BRT_LAND_SLOTS)
            .filter_map(|i| self.nonzero(raw, &format!("LANDAVGDEP_{}", i)))
            .collect();
        let lot_acre = self.brt_lot_acres(raw, ctx);

        record.asset = AssetInfo {
            sfla: self.num(raw, "SFLA_TOTAL"),
            year_built: self.cleaner.parse_integer(raw.get("YEARBUILT")),
            neighborhood: self.text(raw, "NBHD"),
            type_use: self.text(raw, "TYPEUSE"),
            building_class: self.text(raw, "BLDGCLASS"),
            design_style: self.text(raw, "DESIGN"),
            story_height: self.cleaner.parse_story_height(raw.get("STORYHGT")),
            lot_frontage: sum_of(&frontage),
            lot_depth: average_of(&depths).map(|v| round_to(v, 2)),
            lot_acre,
            lot_sf: lot_acre.map(|a| (a * SQFT_PER_ACRE).round()),
            total_baths: self.brt_baths(raw),
        };

        record
    }

    /// BATHTOT 中的 2 件套按半套计
    fn brt_baths(&self, raw: &RawVendorRecord) -> Option<f64> {
        let bath_tot = self.num(raw, "BATHTOT").unwrap_or(0.0);
        let two_fix = self.num(raw, "PLUMBING2FIX").unwrap_or(0.0);
        let total = bath_tot - two_fix + two_fix * 0.5;
        (total > 0.0).then_some(total)
    }

    /// 土地单位栏位汇总为英亩
    ///
    /// # 规则
    /// - 代码描述含 ACRE / AC → 英亩
    /// - 代码描述含 SITE → 平方英尺
    /// - 无描述时看代码本身: 含 AC → 英亩，含 SF → 平方英尺
    /// - 无英亩只有平方英尺时按 43560 折算
    /// - 保留 3 位小数，0 → None
    fn brt_lot_acres(&self, raw: &RawVendorRecord, ctx: &ImportContext) -> Option<f64> {
        let mut acres = 0.0;
        let mut sqft = 0.0;
        let mut found_acres = false;

        for i in 1..=BRT_LAND_SLOTS {
            let code = match raw.non_blank(&format!("LANDUR_{}", i)) {
                Some(c) => c,
                None => continue,
            };
            let value = match self.nonzero(raw, &format!("LANDURVALUE_{}", i)) {
                Some(v) => v,
                None => continue,
            };

            match ctx.code_description(code) {
                Some(desc) => {
                    let desc = desc.to_uppercase();
                    if desc.contains("ACRE") || desc.contains("AC") {
                        acres += value;
                        found_acres = true;
                    } else if desc.contains("SITE") {
                        sqft += value;
                    }
                }
                None => {
                    if code.contains("AC") {
                        acres += value;
                        found_acres = true;
                    } else if code.contains("SF") {
                        sqft += value;
                    }
                }
            }
        }

        if !found_acres && sqft > 0.0 {
            acres = sqft / SQFT_PER_ACRE;
        }

        (acres > 0.0).then(|| round_to(acres, 3))
    }
}

impl FieldMapper for FieldMapperImpl {
    fn map_to_canonical(&self, raw: &RawVendorRecord, ctx: &ImportContext) -> CanonicalPropertyRecord {
        match raw.vendor {
            VendorKind::Microsystems => self.map_microsystems(raw, ctx),
            VendorKind::Brt => self.map_brt(raw, ctx),
        }
    }
}

/// 城市与邮编以空格拼接；任一缺失时只取另一项
fn brt_owner_csz(city: Option<String>, zip: Option<String>) -> Option<String> {
    match (city, zip) {
        (Some(c), Some(z)) => Some(format!("{} {}", c, z)),
        (Some(c), None) => Some(c),
        (None, Some(z)) => Some(z),
        (None, None) => None,
    }
}

fn sum_of(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum())
}

fn average_of(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}
