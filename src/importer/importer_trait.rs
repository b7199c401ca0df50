// ==========================================
// CAMA 导入引擎 - 导入接口定义
// ==========================================
// 职责: 定义导入管道各阶段接口（不包含实现）
// ==========================================

use crate::domain::code_table::CodeDefinitionTable;
use crate::domain::property::{CanonicalPropertyRecord, ImportContext, RawVendorRecord};
use crate::domain::reconciliation::SaleDecisionRecord;
use crate::domain::types::{SaleDecision, VendorKind};
use crate::importer::conflict_handler::DedupeOutcome;
use crate::importer::error::ImportResult;
use crate::importer::file_parser::ParseOutcome;
use crate::importer::property_importer_impl::{ImportRunSummary, UpdatePlan};
use async_trait::async_trait;
use chrono::NaiveDate;

// ==========================================
// PropertyImporter Trait
// ==========================================
// 用途: 厂商文件导入主接口
// 实现者: PropertyImporterImpl
#[async_trait]
pub trait PropertyImporter: Send + Sync {
    /// 首次导入（无保留字段合并、无对账）
    ///
    /// # 导入流程
    /// 1. 格式识别与解析
    /// 2. 字段映射 + composite key
    /// 3. key 冲突检测（后写覆盖，冲突上报）
    /// 4. 分批持久化
    async fn import_initial(
        &self,
        ctx: &ImportContext,
        file_name: &str,
        bytes: &[u8],
    ) -> ImportResult<ImportRunSummary>;

    /// 更新导入预检：生成对账报告，不写入任何数据
    async fn prepare_update(
        &self,
        ctx: &ImportContext,
        file_name: &str,
        bytes: &[u8],
    ) -> ImportResult<UpdatePlan>;

    /// 更新导入（存在待决售价变更时拒绝提交）
    ///
    /// # 导入流程
    /// 1. 对账（解析结果同时用于后续写入）
    /// 2. 待决检查
    /// 3. 保留字段合并
    /// 4. 应用售价决策
    /// 5. 删除已移除房产
    /// 6. 分批 upsert
    async fn import_update(
        &self,
        ctx: &ImportContext,
        file_name: &str,
        bytes: &[u8],
    ) -> ImportResult<ImportRunSummary>;

    /// 代码文件导入（整体替换该 job 的代码表）
    async fn import_code_file(
        &self,
        job_id: &str,
        content: &str,
        vendor_hint: Option<VendorKind>,
    ) -> ImportResult<CodeDefinitionTable>;

    /// 记录人工售价决策（只追加）
    async fn record_sale_decisions(
        &self,
        ctx: &ImportContext,
        plan: &UpdatePlan,
        choices: &[(String, SaleDecision)],
        decided_by: Option<&str>,
    ) -> ImportResult<Vec<SaleDecisionRecord>>;
}

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 字节流 → 原始行（阶段 0）
// 实现者: VendorFileParser
pub trait FileParser: Send + Sync {
    fn parse_bytes(&self, bytes: &[u8], file_name: &str) -> ImportResult<ParseOutcome>;
}

// ==========================================
// FieldMapper Trait
// ==========================================
// 用途: 原始行 → 规范化记录（阶段 1）
// 实现者: FieldMapperImpl
pub trait FieldMapper: Send + Sync {
    /// 映射单行；字段缺失或无法解析时置空，不报错
    fn map_to_canonical(
        &self,
        raw: &RawVendorRecord,
        ctx: &ImportContext,
    ) -> CanonicalPropertyRecord;
}

// ==========================================
// DataCleaner Trait
// ==========================================
// 用途: 值级清洗（空白 → None，金额 / 日期标准化）
// 实现者: DataCleanerImpl
pub trait DataCleaner: Send + Sync {
    /// TRIM，空白 → None
    fn clean_text(&self, value: Option<&str>) -> Option<String>;

    /// 去掉 `$` 与 `,` 后解析
    fn parse_numeric(&self, value: Option<&str>) -> Option<f64>;

    /// 整数（接受 "1990.0" 这类写法）
    fn parse_integer(&self, value: Option<&str>) -> Option<i32>;

    /// 日期 → NaiveDate（序列化为 YYYY-MM-DD）
    fn parse_date(&self, value: Option<&str>) -> Option<NaiveDate>;

    /// 楼层高度取前导数字部分（"2A" → 2，"1.5S" → 1.5）
    fn parse_story_height(&self, value: Option<&str>) -> Option<f64>;
}

// ==========================================
// ConflictHandler Trait
// ==========================================
// 用途: 同一文件内 composite key 冲突（阶段 2）
// 实现者: ConflictHandlerImpl
pub trait ConflictHandler: Send + Sync {
    fn resolve_key_collisions(&self, records: Vec<CanonicalPropertyRecord>) -> DedupeOutcome;
}
