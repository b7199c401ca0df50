// ==========================================
// CAMA 导入引擎 - 数据清洗实现
// ==========================================
// 规则: 空白 → None；金额去 `$` `,`；日期统一为 NaiveDate
// ==========================================

use crate::importer::importer_trait::DataCleaner;
use chrono::NaiveDate;

/// 支持的日期写法（按顺序尝试；两位年份须排在四位年份之前）
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%m-%d-%Y", "%Y/%m/%d"];

/// 四舍五入到指定小数位
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataCleanerImpl;

impl DataCleaner for DataCleanerImpl {
    fn clean_text(&self, value: Option<&str>) -> Option<String> {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    }

    fn parse_numeric(&self, value: Option<&str>) -> Option<f64> {
        let cleaned: String = value?
            .trim()
            .chars()
            .filter(|c| *c != '$' && *c != ',')
            .collect();
        if cleaned.is_empty() {
            return None;
        }
        cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    fn parse_integer(&self, value: Option<&str>) -> Option<i32> {
        let v = value?.trim();
        if v.is_empty() {
            return None;
        }
        v.parse::<i32>()
            .ok()
            .or_else(|| self.parse_numeric(Some(v)).map(|f| f.trunc() as i32))
    }

    fn parse_date(&self, value: Option<&str>) -> Option<NaiveDate> {
        let v = value?.trim();
        if v.is_empty() {
            return None;
        }
        // 带时间部分的只取日期
        let date_part = v.split(|c: char| c == ' ' || c == 'T').next().unwrap_or(v);

        // YYYYMMDD
        if date_part.len() == 8 && date_part.bytes().all(|b| b.is_ascii_digit()) {
            let y = date_part[0..4].parse().ok()?;
            let m = date_part[4..6].parse().ok()?;
            let d = date_part[6..8].parse().ok()?;
            return NaiveDate::from_ymd_opt(y, m, d);
        }

        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
    }

    fn parse_story_height(&self, value: Option<&str>) -> Option<f64> {
        let v = value?.trim();
        let end = v
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(i, c)| i + c.len_utf8())
            .last()?;
        v[..end].trim_end_matches('.').parse::<f64>().ok()
    }
}
