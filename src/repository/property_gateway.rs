// ==========================================
// CAMA 导入引擎 - 持久化网关 Trait
// ==========================================
// 职责: 核心与远端存储之间唯一的窄接口（不包含实现）
// 红线: 网关不含业务规则，只做数据读写
// ==========================================

use crate::domain::code_table::CodeDefinitionTable;
use crate::domain::property::{CanonicalPropertyRecord, PreservedFieldSet};
use crate::domain::reconciliation::SaleDecisionRecord;
use crate::repository::error::PersistenceResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// bulk_upsert 返回统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertStats {
    /// 写入（新增或覆盖）的记录数
    pub inserted_count: usize,
    /// 存储中已有保留字段、且本次写入后仍保留的记录数
    pub preserved_count: usize,
    pub total_processed: usize,
    pub execution_time_ms: u64,
}

// ==========================================
// PersistenceGateway Trait
// ==========================================
// 实现者: SqlitePropertyGateway（rusqlite 适配器）
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    // ===== 规范接口 =====

    /// 批量 upsert（按 job_id + composite_key）
    ///
    /// # 参数
    /// - records: 规范化记录（同一批作为一次原子请求）
    /// - preserved_fields: 保留字段名；记录中缺失的保留字段不得覆盖存储值
    ///
    /// # 返回
    /// - Ok(UpsertStats)
    /// - Err: Transient / Timeout / Permanent
    async fn bulk_upsert(
        &self,
        records: &[CanonicalPropertyRecord],
        preserved_fields: &[String],
    ) -> PersistenceResult<UpsertStats>;

    /// 分页读取快照（最近上传优先）
    async fn fetch_page(
        &self,
        job_id: &str,
        offset: usize,
        limit: usize,
    ) -> PersistenceResult<Vec<CanonicalPropertyRecord>>;

    /// 读取指定 key 的指定保留字段（仅返回有值的 key）
    async fn fetch_preserved_fields(
        &self,
        job_id: &str,
        keys: &[String],
        field_names: &[String],
    ) -> PersistenceResult<HashMap<String, PreservedFieldSet>>;

    // ===== 回滚支持 =====

    /// 读取完整原始记录（含保留字段），用于事务记录
    async fn fetch_by_keys(
        &self,
        job_id: &str,
        keys: &[String],
    ) -> PersistenceResult<Vec<CanonicalPropertyRecord>>;

    /// 删除记录及其保留字段，返回删除行数
    async fn delete_records(&self, job_id: &str, keys: &[String]) -> PersistenceResult<usize>;

    /// 用原始状态整体覆盖（含保留字段）
    async fn restore_records(&self, records: &[CanonicalPropertyRecord])
        -> PersistenceResult<usize>;

    // ===== 代码表 =====

    async fn replace_code_table(
        &self,
        job_id: &str,
        table: &CodeDefinitionTable,
    ) -> PersistenceResult<()>;

    async fn fetch_code_table(&self, job_id: &str)
        -> PersistenceResult<Option<CodeDefinitionTable>>;

    // ===== 售价决策（只追加）=====

    async fn append_sale_decisions(
        &self,
        job_id: &str,
        decisions: &[SaleDecisionRecord],
    ) -> PersistenceResult<usize>;

    /// 每个 key 的最新决策
    async fn fetch_sale_decisions(
        &self,
        job_id: &str,
    ) -> PersistenceResult<HashMap<String, SaleDecisionRecord>>;
}
