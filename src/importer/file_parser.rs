// ==========================================
// CAMA 导入引擎 - 源文件解析器
// ==========================================
// 支持: Microsystems (管道) / BRT (CSV / TAB, RFC4180 引号)
// 红线: 导入与对账必须使用同一解析函数，保证 composite key 对齐
// ==========================================

use crate::domain::property::{HeaderIndex, RawVendorRecord};
use crate::domain::types::Delimiter;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::format_detector::{detect_format_bytes, DetectedFormat};
use crate::importer::importer_trait::FileParser;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// 被跳过的行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowWarning {
    pub row: usize,
    pub expected: usize,
    pub actual: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub format: DetectedFormat,
    pub headers: Arc<HeaderIndex>,
    pub records: Vec<RawVendorRecord>,
    pub warnings: Vec<RowWarning>,
    /// 表头之后的非空数据行数
    pub total_rows: usize,
    /// 所有字段均为空的行（不计入 total_rows，不产生告警）
    pub blank_rows: usize,
}

/// 重名表头按出现顺序追加 2、3、…
///
/// # 示例
/// - [Location, Owner, Location] → [Location, Owner, Location2]
pub fn rename_duplicate_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|h| {
            let count = seen.entry(h.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                h
            } else {
                format!("{}{}", h, count)
            }
        })
        .collect()
}

fn reader_for(content: &str, delimiter: Delimiter) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .delimiter(delimiter.as_byte())
        .has_headers(false)
        .flexible(true)
        .quoting(delimiter.uses_quoting())
        .double_quote(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes())
}

/// 解析单行（表头探测、测试与诊断用）
pub fn parse_csv_line(line: &str, delimiter: Delimiter) -> ImportResult<Vec<String>> {
    let mut reader = reader_for(line, delimiter);
    let mut record = StringRecord::new();
    if reader.read_record(&mut record)? {
        Ok(record.iter().map(|s| s.to_string()).collect())
    } else {
        Ok(Vec::new())
    }
}

/// 解析源文件内容
///
/// # 参数
/// - content: 已解码内容
/// - format: 格式识别结果
///
/// # 返回
/// - Ok(ParseOutcome): 有效行 + 跳过行告警
/// - Err(ParseError): 缺少表头或数据行
/// - Err(NoValidRows): 全部数据行列数不匹配
pub fn parse_source(content: &str, format: DetectedFormat) -> ImportResult<ParseOutcome> {
    let mut reader = reader_for(content, format.delimiter);
    let mut rows = reader.records();

    let header_record = match rows.next() {
        Some(r) => r?,
        None => return Err(ImportError::ParseError("文件为空，缺少表头".to_string())),
    };
    let header_names: Vec<String> = header_record.iter().map(|h| h.to_string()).collect();
    let headers = Arc::new(HeaderIndex::new(rename_duplicate_headers(header_names)));
    let expected = headers.len();

    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut total_rows = 0;
    let mut blank_rows = 0;

    for result in rows {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                let row = e.position().map(|p| p.line() as usize).unwrap_or(0);
                warn!(row, error = %e, "行解析失败，已跳过");
                total_rows += 1;
                warnings.push(RowWarning {
                    row,
                    expected,
                    actual: 0,
                    message: e.to_string(),
                });
                continue;
            }
        };

        if record.iter().all(|v| v.is_empty()) {
            blank_rows += 1;
            continue;
        }
        total_rows += 1;

        let row = record.position().map(|p| p.line() as usize).unwrap_or(0);
        if record.len() != expected {
            warn!(row, expected, actual = record.len(), "列数与表头不一致，已跳过");
            warnings.push(RowWarning {
                row,
                expected,
                actual: record.len(),
                message: format!("列数 {} 与表头列数 {} 不一致", record.len(), expected),
            });
            continue;
        }

        records.push(RawVendorRecord::new(
            format.vendor,
            row,
            Arc::clone(&headers),
            record.iter().map(|s| s.to_string()).collect(),
        ));
    }

    if total_rows == 0 {
        return Err(ImportError::ParseError("文件只有表头，缺少数据行".to_string()));
    }
    if records.is_empty() {
        return Err(ImportError::NoValidRows {
            skipped: warnings.len(),
        });
    }

    debug!(
        vendor = %format.vendor,
        delimiter = %format.delimiter,
        columns = expected,
        valid = records.len(),
        skipped = warnings.len(),
        blank_rows,
        "源文件解析完成"
    );

    Ok(ParseOutcome {
        format,
        headers,
        records,
        warnings,
        total_rows,
        blank_rows,
    })
}

/// 读取源文件字节
pub fn read_source_file(path: &Path) -> ImportResult<Vec<u8>> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }
    Ok(std::fs::read(path)?)
}

// ==========================================
// VendorFileParser - FileParser 实现
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct VendorFileParser;

impl FileParser for VendorFileParser {
    fn parse_bytes(&self, bytes: &[u8], file_name: &str) -> ImportResult<ParseOutcome> {
        let (content, format) = detect_format_bytes(bytes, file_name)?;
        parse_source(&content, format)
    }
}
