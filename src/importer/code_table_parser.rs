// ==========================================
// CAMA 导入引擎 - 代码定义文件解析器
// ==========================================
// 支持两种文法（按内容识别，厂商标签仅作提示）:
// - 节名行 + 花括号配平的 JSON 块（BRT）
// - 管道行 CODE|DESCRIPTION|RATE|CONSTANT|CATEGORY|TABLE|UPDATED（Microsystems）
// 红线: 解析结果整体替换，不与旧表合并
// ==========================================

use crate::domain::code_table::{CodeDefinition, CodeDefinitionTable, InfoSourceCode, DIRECT_GROUP};
use crate::domain::types::{InfoSourceCategory, VendorKind};
use crate::importer::error::{ImportError, ImportResult};
use serde_json::Value;
use tracing::{debug, info, warn};

/// 信息来源递归搜索的最大深度
pub const INFO_SOURCE_MAX_DEPTH: usize = 8;

/// Microsystems 信息来源（INFO BY）代码前缀
pub const MICROSYSTEMS_INFO_PREFIX: &str = "140";

/// Microsystems 暖通代码前缀（1 位前缀 + 2 位后缀）
const HVAC_PREFIX: &str = "8";

/// BRT 信息来源所在位置: Residential["30"].MAP
const BRT_INFO_SECTION: &str = "Residential";
const BRT_INFO_KEY: &str = "30";

/// 递归搜索时识别信息来源描述的关键字
const INFO_SOURCE_KEYWORDS: &[&str] = &["OWNER", "REFUSED", "AGENT", "ESTIMATED"];

/// 解析代码文件
///
/// # 参数
/// - content: 文件内容
/// - vendor_hint: 上传时声明的厂商（内容无法判定文法时使用）
///
/// # 返回
/// - Ok(CodeDefinitionTable): 至少包含一条定义
/// - Err(CodeFileParseError): 文法无法识别或无任何定义
pub fn parse_code_file(
    content: &str,
    vendor_hint: Option<VendorKind>,
) -> ImportResult<CodeDefinitionTable> {
    let grammar = detect_code_grammar(content, vendor_hint).ok_or_else(|| {
        ImportError::CodeFileParseError("无法识别代码文件文法".to_string())
    })?;

    if let Some(hint) = vendor_hint {
        if hint != grammar {
            warn!(hint = %hint, detected = %grammar, "代码文件文法与声明厂商不一致，按内容解析");
        }
    }

    let table = match grammar {
        VendorKind::Brt => parse_brt_code_file(content),
        VendorKind::Microsystems => parse_microsystems_code_file(content),
    };

    if table.definition_count() == 0 {
        return Err(ImportError::CodeFileParseError(
            "代码文件中没有任何代码定义".to_string(),
        ));
    }

    info!(
        vendor = %table.vendor,
        sections = table.sections.len(),
        definitions = table.definition_count(),
        info_sources = table.info_sources.len(),
        "代码文件解析完成"
    );
    Ok(table)
}

/// 按内容识别文法: 出现以 `{` 开头的行 → JSON 块；出现 5 段以上的管道行 → 管道
pub fn detect_code_grammar(content: &str, vendor_hint: Option<VendorKind>) -> Option<VendorKind> {
    let lines: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    if lines.iter().any(|l| l.starts_with('{')) {
        return Some(VendorKind::Brt);
    }
    if lines.iter().any(|l| l.split('|').count() >= 5) {
        return Some(VendorKind::Microsystems);
    }
    vendor_hint
}

/// 按关键字对信息来源描述归类
pub fn classify_info_source(description: &str) -> Option<InfoSourceCategory> {
    let desc = description.to_uppercase();
    let has = |words: &[&str]| words.iter().any(|w| desc.contains(w));

    if has(&["OWNER", "SPOUSE", "TENANT", "AGENT"]) {
        Some(InfoSourceCategory::Entry)
    } else if has(&["REFUSED"]) {
        Some(InfoSourceCategory::Refusal)
    } else if has(&["ESTIMATED", "VACANT"]) {
        Some(InfoSourceCategory::Estimation)
    } else if has(&["DOOR"]) {
        Some(InfoSourceCategory::Invalid)
    } else if has(&["PRICED", "CONVERSION", "NARRATIVE", "ENCODED"]) {
        Some(InfoSourceCategory::Priced)
    } else {
        None
    }
}

// ==========================================
// BRT: 节名 + JSON 块
// ==========================================

/// 解析 JSON 块文法
///
/// # 规则
/// - 块外、不以 `{` 或 `"` 开头的行是节名
/// - 块内逐行累积，直到 `{` 与 `}` 数量相等
/// - 无法解析的块记录告警并跳过
pub fn parse_brt_code_file(content: &str) -> CodeDefinitionTable {
    let mut table = CodeDefinitionTable::new(VendorKind::Brt);
    let mut section: Option<String> = None;
    let mut buffer = String::new();
    let mut depth_open = 0usize;
    let mut depth_close = 0usize;
    let mut in_block = false;

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !in_block && !line.starts_with('{') && !line.starts_with('"') {
            section = Some(line.to_string());
            continue;
        }
        if !in_block && !line.starts_with('{') {
            continue;
        }

        in_block = true;
        buffer.push_str(line);
        depth_open += line.matches('{').count();
        depth_close += line.matches('}').count();

        if depth_open == depth_close && depth_open > 0 {
            if let Some(name) = &section {
                merge_brt_block(&mut table, name, &buffer);
            }
            buffer.clear();
            depth_open = 0;
            depth_close = 0;
            in_block = false;
        }
    }

    if in_block {
        warn!(section = ?section, "代码文件末尾存在未闭合的 JSON 块，已忽略");
    }

    collect_brt_info_sources(&mut table);
    table
}

fn data_value(item: &Value) -> Option<&str> {
    item.get("DATA")
        .and_then(|d| d.get("VALUE"))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}

fn brt_definition(code: &str, description: &str, section: &str) -> CodeDefinition {
    CodeDefinition {
        code: code.to_string(),
        description: description.to_string(),
        rate: None,
        constant: None,
        category: Some(section.to_string()),
        table: None,
        updated: None,
        prefix: None,
    }
}

fn merge_brt_block(table: &mut CodeDefinitionTable, section: &str, json: &str) {
    let block: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            warn!(section, error = %e, "JSON 块解析失败，已跳过");
            return;
        }
    };
    let entries = match block.as_object() {
        Some(m) => m,
        None => {
            warn!(section, "JSON 块不是对象，已跳过");
            return;
        }
    };

    let mut added = 0usize;
    for (key, item) in entries {
        table.raw_sections_insert(section, key, item);

        let description = match data_value(item) {
            Some(d) => d,
            None => continue,
        };

        if section == "VCS" {
            // VCS 以代码值为键
            table
                .sections
                .entry(section.to_string())
                .or_default()
                .insert(description.to_string(), brt_definition(description, description, section));
            table
                .flat_lookup
                .insert(format!("{}_{}", section, description), description.to_string());
            added += 1;
            added += merge_unit_rate_codes(table, section, description, item);
        } else {
            table
                .sections
                .entry(section.to_string())
                .or_default()
                .insert(key.clone(), brt_definition(key, description, section));
            table
                .flat_lookup
                .insert(format!("{}_{}", section, key), description.to_string());
            table.flat_lookup.insert(key.clone(), description.to_string());
            added += 1;
        }
    }

    debug!(section, added, "JSON 块已合并");
}

/// VCS 下的单位费率代码: MAP["8"] 的 DATA.VALUE 为 "URC" 时，
/// MAP["8"].MAP[k].MAP["1"].DATA.VALUE 为代码 k 的描述
fn merge_unit_rate_codes(
    table: &mut CodeDefinitionTable,
    section: &str,
    vcs: &str,
    item: &Value,
) -> usize {
    let urc = match item.get("MAP").and_then(|m| m.get("8")) {
        Some(u) if data_value(u) == Some("URC") => u,
        _ => return 0,
    };
    let codes = match urc.get("MAP").and_then(Value::as_object) {
        Some(c) => c,
        None => return 0,
    };

    let group = format!("{}_URC", section);
    let mut added = 0;
    for (code, entry) in codes {
        let description = match entry.get("MAP").and_then(|m| m.get("1")).and_then(data_value) {
            Some(d) => d,
            None => continue,
        };
        table
            .sections
            .entry(group.clone())
            .or_default()
            .insert(format!("{}_{}", vcs, code), brt_definition(code, description, &group));
        table
            .flat_lookup
            .insert(format!("{}_{}_{}", group, vcs, code), description.to_string());
        table.flat_lookup.insert(code.clone(), description.to_string());
        added += 1;
    }
    added
}

/// 信息来源: 优先读取 Residential["30"].MAP，未找到时在全部节中做限深搜索
fn collect_brt_info_sources(table: &mut CodeDefinitionTable) {
    let mut found = Vec::new();

    if let Some(map) = table
        .raw_section(BRT_INFO_SECTION)
        .and_then(|s| s.get(BRT_INFO_KEY))
        .and_then(|i| i.get("MAP"))
        .and_then(Value::as_object)
    {
        let section = format!("{}[{}]", BRT_INFO_SECTION, BRT_INFO_KEY);
        for (key, item) in map {
            if let Some(description) = data_value(item) {
                found.push(InfoSourceCode {
                    code: item_code(key, item),
                    description: description.to_string(),
                    section: section.clone(),
                    category: classify_info_source(description),
                });
            }
        }
    }

    if found.is_empty() {
        for (name, section) in table.raw_sections() {
            let mut visitor = InfoSourceVisitor::new(name);
            visitor.visit(section, 0);
            found.extend(visitor.into_codes());
        }
    }

    found.dedup_by(|a, b| a.code == b.code && a.section == b.section);
    table.info_sources = found;
}

/// 代码取值顺序: item.KEY → DATA.KEY → 映射键
fn item_code(key: &str, item: &Value) -> String {
    item.get("KEY")
        .or_else(|| item.get("DATA").and_then(|d| d.get("KEY")))
        .and_then(|k| match k {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| key.to_string())
}

// ==========================================
// InfoSourceVisitor - 限深递归下降
// ==========================================
// 终止条件: 深度超过 INFO_SOURCE_MAX_DEPTH，或节点不是对象
struct InfoSourceVisitor<'a> {
    section: &'a str,
    codes: Vec<InfoSourceCode>,
}

impl<'a> InfoSourceVisitor<'a> {
    fn new(section: &'a str) -> Self {
        Self {
            section,
            codes: Vec::new(),
        }
    }

    fn visit(&mut self, node: &Value, depth: usize) {
        if depth > INFO_SOURCE_MAX_DEPTH {
            return;
        }
        let entries = match node.as_object() {
            Some(m) => m,
            None => return,
        };

        for (key, item) in entries {
            if let Some(description) = data_value(item) {
                if INFO_SOURCE_KEYWORDS.iter().any(|k| description.contains(k)) {
                    self.codes.push(InfoSourceCode {
                        code: item_code(key, item),
                        description: description.to_string(),
                        section: self.section.to_string(),
                        category: classify_info_source(description),
                    });
                }
            }
            if let Some(children) = item.get("MAP") {
                self.visit(children, depth + 1);
            }
        }
    }

    fn into_codes(self) -> Vec<InfoSourceCode> {
        self.codes
    }
}

// ==========================================
// Microsystems: 管道行
// ==========================================

/// 拆分 Microsystems 代码
///
/// # 规则
/// - `8` 开头: 前缀 "8"，后缀为其后 2 个字符（"8ED16  0399" → ("8", "ED")）
/// - 其他: 3 位数字前缀；140 取其后单字符，其余取连续大写字母，
///   无大写字母时取到首个空白为止（"520CL  9999" → ("520", "CL")）
/// - 不匹配任何规则返回 None（归入 direct 分组）
pub fn split_microsystems_code(code: &str) -> Option<(String, String)> {
    let code = code.trim();

    if let Some(rest) = code.strip_prefix(HVAC_PREFIX) {
        let suffix: String = rest.chars().take(2).collect();
        let suffix = suffix.trim();
        if suffix.is_empty() {
            return None;
        }
        return Some((HVAC_PREFIX.to_string(), suffix.to_string()));
    }

    let prefix = code.get(..3)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let rest = &code[3..];

    let suffix: String = if prefix == MICROSYSTEMS_INFO_PREFIX {
        rest.chars().take(1).filter(|c| !c.is_whitespace()).collect()
    } else {
        let letters: String = rest.chars().take_while(|c| c.is_ascii_uppercase()).collect();
        if letters.is_empty() {
            rest.split_whitespace().next().unwrap_or("").to_string()
        } else {
            letters
        }
    };

    if suffix.is_empty() {
        None
    } else {
        Some((prefix.to_string(), suffix))
    }
}

fn optional(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(|v| v.to_string())
}

/// 解析管道文法
///
/// # 规则
/// - 少于 5 段、代码或描述为空的行跳过
/// - flat_lookup 同时登记完整代码与后缀
/// - 前缀 140 的代码登记为信息来源
pub fn parse_microsystems_code_file(content: &str) -> CodeDefinitionTable {
    let mut table = CodeDefinitionTable::new(VendorKind::Microsystems);
    let mut skipped = 0usize;

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        if parts.len() < 5 || parts[0].is_empty() || parts[1].is_empty() {
            skipped += 1;
            continue;
        }

        let full_code = parts[0];
        let description = parts[1];
        let category = optional(parts.get(4).copied());
        let split = split_microsystems_code(full_code);

        let definition = CodeDefinition {
            code: full_code.to_string(),
            description: description.to_string(),
            rate: parts[2].replace(',', "").parse::<f64>().ok(),
            constant: parts[3].replace(',', "").parse::<f64>().ok(),
            category: category.clone(),
            table: optional(parts.get(5).copied()),
            updated: optional(parts.get(6).copied()),
            prefix: split.as_ref().map(|(p, _)| p.clone()),
        };

        table
            .flat_lookup
            .insert(full_code.to_string(), description.to_string());

        match split {
            Some((prefix, suffix)) => {
                table.flat_lookup.insert(suffix.clone(), description.to_string());
                if let Some(cat) = category {
                    table.categories.insert(prefix.clone(), cat);
                }
                if prefix == MICROSYSTEMS_INFO_PREFIX {
                    table.info_sources.push(InfoSourceCode {
                        code: suffix.clone(),
                        description: description.to_string(),
                        section: prefix.clone(),
                        category: classify_info_source(description),
                    });
                }
                table
                    .sections
                    .entry(prefix)
                    .or_default()
                    .insert(suffix, definition);
            }
            None => {
                table
                    .sections
                    .entry(DIRECT_GROUP.to_string())
                    .or_default()
                    .insert(full_code.to_string(), definition);
            }
        }
    }

    if skipped > 0 {
        debug!(skipped, "代码文件中的无效行已跳过");
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRT_CODES: &str = r#"Residential
{"30":{"KEY":"30","DATA":{"VALUE":"INFO BY"},"MAP":{
"1":{"KEY":"01","DATA":{"VALUE":"OWNER"}},
"2":{"KEY":"02","DATA":{"VALUE":"REFUSED INT"}},
"3":{"KEY":"03","DATA":{"VALUE":"AT DOOR"}}}},
"31":{"DATA":{"VALUE":"COLONIAL"}}}
VCS
{"1":{"DATA":{"VALUE":"A1"},"MAP":{"8":{"DATA":{"VALUE":"URC"},"MAP":{
"01":{"MAP":{"1":{"DATA":{"VALUE":"PRIME ACRE"}}}},
"02":{"MAP":{"1":{"DATA":{"VALUE":"SITE VALUE"}}}}}}}}}
"#;

    #[test]
    fn test_brt_sections_and_flat_lookup() {
        let table = parse_code_file(BRT_CODES, Some(VendorKind::Brt)).unwrap();
        assert_eq!(table.vendor, VendorKind::Brt);
        assert_eq!(table.description("31"), Some("COLONIAL"));
        assert_eq!(table.description("Residential_31"), Some("COLONIAL"));
        assert_eq!(table.description("01"), Some("PRIME ACRE"));
        assert_eq!(table.description("VCS_URC_A1_02"), Some("SITE VALUE"));
        assert!(table.details("VCS", "A1").is_some());
    }

    #[test]
    fn test_brt_info_sources_from_residential_30() {
        let table = parse_code_file(BRT_CODES, None).unwrap();
        let codes: Vec<(&str, Option<InfoSourceCategory>)> = table
            .info_sources
            .iter()
            .map(|s| (s.code.as_str(), s.category))
            .collect();
        assert_eq!(
            codes,
            vec![
                ("01", Some(InfoSourceCategory::Entry)),
                ("02", Some(InfoSourceCategory::Refusal)),
                ("03", Some(InfoSourceCategory::Invalid)),
            ]
        );
    }

    #[test]
    fn test_brt_multiline_block_and_bad_block() {
        let content = "Depth_Factors\n{\"10\":\n{\"DATA\":{\"VALUE\":\"DEPTH 100\"}}\n}\nBroken\n{\"x\": }\n";
        let table = parse_code_file(content, Some(VendorKind::Brt)).unwrap();
        assert_eq!(table.description("10"), Some("DEPTH 100"));
        assert!(table.sections.get("Broken").is_none());
    }

    #[test]
    fn test_visitor_finds_nested_info_sources_within_depth() {
        let content = r#"Other
{"5":{"DATA":{"VALUE":"MISC"},"MAP":{"7":{"DATA":{"VALUE":"X"},"MAP":{"9":{"KEY":"E","DATA":{"VALUE":"ESTIMATED"}}}}}}}
"#;
        let table = parse_code_file(content, None).unwrap();
        assert_eq!(table.info_sources.len(), 1);
        assert_eq!(table.info_sources[0].code, "E");
        assert_eq!(
            table.info_sources[0].category,
            Some(InfoSourceCategory::Estimation)
        );
    }

    #[test]
    fn test_visitor_stops_past_max_depth() {
        let mut node = serde_json::json!({"k": {"KEY": "Z", "DATA": {"VALUE": "OWNER"}}});
        for _ in 0..=INFO_SOURCE_MAX_DEPTH {
            node = serde_json::json!({"n": {"DATA": {"VALUE": "LEVEL"}, "MAP": node}});
        }
        let mut visitor = InfoSourceVisitor::new("deep");
        visitor.visit(&node, 0);
        assert!(visitor.into_codes().is_empty());
    }

    #[test]
    fn test_split_microsystems_code() {
        assert_eq!(
            split_microsystems_code("8ED16  0399"),
            Some(("8".to_string(), "ED".to_string()))
        );
        assert_eq!(
            split_microsystems_code("520CL  9999"),
            Some(("520".to_string(), "CL".to_string()))
        );
        assert_eq!(
            split_microsystems_code("140R   9999"),
            Some(("140".to_string(), "R".to_string()))
        );
        assert_eq!(
            split_microsystems_code("21012  9999"),
            Some(("210".to_string(), "12".to_string()))
        );
        assert_eq!(split_microsystems_code("AB"), None);
        assert_eq!(split_microsystems_code("XYZQ"), None);
    }

    #[test]
    fn test_microsystems_pipe_grammar() {
        let content = "\
8FA16  0399|FORCED HOT AIR|4700|0|HEAT|E|06/24/02|
520CL  9999|COLONIAL|0|0|DESIGN|E|06/24/02|
140A   9999|AGENT|0|0|INFO BY|E|06/24/02|
140R   9999|REFUSED|0|0|INFO BY|E|06/24/02|
ZZ|DIRECT CODE|0|0|MISC
short|row
|NO CODE|0|0|X
";
        let table = parse_code_file(content, Some(VendorKind::Microsystems)).unwrap();
        assert_eq!(table.vendor, VendorKind::Microsystems);
        assert_eq!(table.description("FA"), Some("FORCED HOT AIR"));
        assert_eq!(table.description("8FA16  0399"), Some("FORCED HOT AIR"));
        assert_eq!(table.description("CL"), Some("COLONIAL"));
        assert_eq!(table.categories.get("520").map(String::as_str), Some("DESIGN"));
        assert_eq!(table.details("8", "FA").and_then(|d| d.rate), Some(4700.0));
        assert!(table.details(DIRECT_GROUP, "ZZ").is_some());
        assert_eq!(table.definition_count(), 5);
        assert_eq!(table.info_sources_in(InfoSourceCategory::Entry), vec!["A"]);
        assert_eq!(table.info_sources_in(InfoSourceCategory::Refusal), vec!["R"]);
    }

    #[test]
    fn test_grammar_detected_from_content_not_hint() {
        let content = "520CL  9999|COLONIAL|0|0|DESIGN|E|06/24/02|\n";
        let table = parse_code_file(content, Some(VendorKind::Brt)).unwrap();
        assert_eq!(table.vendor, VendorKind::Microsystems);
    }

    #[test]
    fn test_empty_code_file_is_error() {
        assert!(matches!(
            parse_code_file("", None),
            Err(ImportError::CodeFileParseError(_))
        ));
        assert!(matches!(
            parse_code_file("Residential\n{\"1\":{}}\n", None),
            Err(ImportError::CodeFileParseError(_))
        ));
    }
}
