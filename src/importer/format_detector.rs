// ==========================================
// CAMA 导入引擎 - 文件格式识别
// ==========================================
// 规则:
// - .txt 且首行含 '|' → Microsystems（管道）
// - .csv → BRT，分隔符按表头判定
// - 其他扩展名: 表头 TAB 主导 → BRT(TAB)；含 BRT 标识列 → BRT(逗号)；
//   含 '|' 且有 Microsystems 标识列 → Microsystems
// ==========================================

use crate::domain::types::{Delimiter, VendorKind};
use crate::importer::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// TAB 主导判定的最小 TAB 数（严格大于）
pub const TAB_DOMINANCE_MIN_TABS: usize = 10;

const BRT_SIGNATURE: &[&str] = &["BLOCK", "LOT", "QUALIFIER"];
const MICROSYSTEMS_SIGNATURE: &[&str] = &["Block", "Lot", "Qual"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedFormat {
    pub vendor: VendorKind,
    pub delimiter: Delimiter,
}

/// 去除 UTF-8 BOM 并解码
pub fn decode_content(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// 首个非空行（去掉行尾 \r）
pub fn first_line(content: &str) -> Option<&str> {
    content
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .find(|l| !l.trim().is_empty())
}

/// 表头分隔符判定: TAB 数 > 10 且 > 2 × 逗号数 → TAB，否则逗号
pub fn detect_delimiter(header_line: &str) -> Delimiter {
    let tabs = header_line.matches('\t').count();
    let commas = header_line.matches(',').count();
    if tabs > TAB_DOMINANCE_MIN_TABS && tabs > commas * 2 {
        Delimiter::Tab
    } else {
        Delimiter::Comma
    }
}

fn has_signature(header_line: &str, delimiter: char, signature: &[&str]) -> bool {
    let cols: Vec<&str> = header_line
        .split(delimiter)
        .map(|c| c.trim().trim_matches('"'))
        .collect();
    signature.iter().all(|s| cols.contains(s))
}

/// 识别厂商格式
///
/// # 参数
/// - content: 已解码的文件内容
/// - file_name: 原始文件名（只看扩展名）
///
/// # 返回
/// - Ok(DetectedFormat)
/// - Err(UnsupportedFormat): 无法归入任何厂商
pub fn detect_format(content: &str, file_name: &str) -> ImportResult<DetectedFormat> {
    let header = first_line(content)
        .ok_or_else(|| ImportError::ParseError("文件为空，缺少表头".to_string()))?;

    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if ext == "txt" && header.contains('|') {
        return Ok(DetectedFormat {
            vendor: VendorKind::Microsystems,
            delimiter: Delimiter::Pipe,
        });
    }

    if ext == "csv" {
        return Ok(DetectedFormat {
            vendor: VendorKind::Brt,
            delimiter: detect_delimiter(header),
        });
    }

    if detect_delimiter(header) == Delimiter::Tab {
        return Ok(DetectedFormat {
            vendor: VendorKind::Brt,
            delimiter: Delimiter::Tab,
        });
    }

    if has_signature(header, ',', BRT_SIGNATURE) {
        return Ok(DetectedFormat {
            vendor: VendorKind::Brt,
            delimiter: Delimiter::Comma,
        });
    }

    if header.contains('|') && has_signature(header, '|', MICROSYSTEMS_SIGNATURE) {
        return Ok(DetectedFormat {
            vendor: VendorKind::Microsystems,
            delimiter: Delimiter::Pipe,
        });
    }

    Err(ImportError::UnsupportedFormat(format!(
        "{}（无法识别 Microsystems / BRT 表头）",
        file_name
    )))
}

/// 按字节识别（入口）
pub fn detect_format_bytes(bytes: &[u8], file_name: &str) -> ImportResult<(String, DetectedFormat)> {
    let content = decode_content(bytes);
    let format = detect_format(&content, file_name)?;
    Ok((content, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_txt_is_microsystems() {
        let f = detect_format("Block|Lot|Qual|Bldg|Location\n1|2||1|X\n", "job.txt").unwrap();
        assert_eq!(f.vendor, VendorKind::Microsystems);
        assert_eq!(f.delimiter, Delimiter::Pipe);
    }

    #[test]
    fn test_tab_dominance_with_15_tabs_2_commas() {
        let mut header: Vec<String> = (0..16).map(|i| format!("C{}", i)).collect();
        header[3] = "A,B".to_string();
        header[7] = "C,D".to_string();
        let line = header.join("\t");
        assert_eq!(line.matches('\t').count(), 15);
        assert_eq!(line.matches(',').count(), 2);
        assert_eq!(detect_delimiter(&line), Delimiter::Tab);

        let f = detect_format(&format!("{}\n", line), "export.dat").unwrap();
        assert_eq!(f.vendor, VendorKind::Brt);
        assert_eq!(f.delimiter, Delimiter::Tab);
    }

    #[test]
    fn test_few_tabs_fall_back_to_comma() {
        assert_eq!(detect_delimiter("A\tB\tC"), Delimiter::Comma);
        // 11 个 TAB 但逗号过多
        let line = format!("{}{}", "X\t".repeat(11), ",".repeat(6));
        assert_eq!(detect_delimiter(&line), Delimiter::Comma);
    }

    #[test]
    fn test_csv_extension_is_brt() {
        let f = detect_format("BLOCK,LOT,QUALIFIER\n1,2,\n", "DATA.CSV").unwrap();
        assert_eq!(f.vendor, VendorKind::Brt);
        assert_eq!(f.delimiter, Delimiter::Comma);
    }

    #[test]
    fn test_signature_fallback_and_unknown() {
        let f = detect_format("BLOCK,LOT,QUALIFIER,CARD\n", "upload.bin").unwrap();
        assert_eq!(f.vendor, VendorKind::Brt);

        assert!(matches!(
            detect_format("foo;bar\n1;2\n", "x.bin"),
            Err(ImportError::UnsupportedFormat(_))
        ));
        assert!(matches!(detect_format("\n\n", "x.txt"), Err(ImportError::ParseError(_))));
    }

    #[test]
    fn test_bom_is_stripped() {
        let bytes = b"\xEF\xBB\xBFBlock|Lot|Qual\n1|2|3\n";
        let (content, f) = detect_format_bytes(bytes, "a.txt").unwrap();
        assert!(content.starts_with("Block"));
        assert_eq!(f.vendor, VendorKind::Microsystems);
    }
}
