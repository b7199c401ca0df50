// ==========================================
// CAMA 导入引擎 - 房产数据导入器实现
// ==========================================
// 职责: 整合导入流程，从字节流到持久化
// 流程(首次): 解析 → 映射 → key 冲突 → 分批 upsert
// 流程(更新): 对账 → 待决检查 → 保留字段合并 → 售价决策 → 删除 → 分批 upsert
// 红线: 存在 pending 售价变更时不写入任何数据
// ==========================================

use crate::config::{ImportConfig, ImportConfigReader};
use crate::domain::batch::BatchRunSummary;
use crate::domain::code_table::CodeDefinitionTable;
use crate::domain::property::{CanonicalPropertyRecord, ImportContext};
use crate::domain::reconciliation::{ComparisonReport, SaleDecisionRecord};
use crate::domain::types::{SaleDecision, VendorKind};
use crate::engine::batch::{
    BatchProcessor, BatchWriter, BreakerConfig, CircuitBreaker, DeleteWriter, ProcessOptions,
    ProgressCallback, UpsertWriter,
};
use crate::engine::reconciliation::{apply_decisions, record_decisions, ReconciliationEngine};
use crate::importer::code_table_parser::parse_code_file;
use crate::importer::conflict_handler::{ConflictHandlerImpl, KeyCollision};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapperImpl;
use crate::importer::field_preservation::FieldPreservationMerger;
use crate::importer::file_parser::{RowWarning, VendorFileParser};
use crate::importer::importer_trait::{ConflictHandler, FieldMapper, FileParser, PropertyImporter};
use crate::repository::error::PersistenceError;
use crate::repository::property_gateway::PersistenceGateway;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// 运行结果
// ==========================================

/// 单次导入运行汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRunSummary {
    pub run_id: Uuid,
    pub job_id: String,
    pub vendor: VendorKind,
    /// 表头之后的非空数据行
    pub total_rows: usize,
    /// 成功解析并映射的行（去重前）
    pub valid_rows: usize,
    pub warnings: Vec<RowWarning>,
    /// 全空白行数
    pub blank_rows: usize,
    pub key_collisions: Vec<KeyCollision>,
    pub deleted_count: usize,
    pub upsert: BatchRunSummary,
    pub delete: Option<BatchRunSummary>,
    /// 合并了保留字段的记录数
    pub preserved_merged: usize,
    /// 应用了售价决策的记录数
    pub decisions_applied: usize,
    pub elapsed_ms: u64,
}

/// 更新导入预检结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub job_id: String,
    pub file_name: String,
    pub report: ComparisonReport,
    pub key_collisions: Vec<KeyCollision>,
    /// 新文件去重后的记录数
    pub record_count: usize,
    pub snapshot_size: usize,
}

impl UpdatePlan {
    pub fn pending_count(&self) -> usize {
        self.report.pending_sale_changes().count()
    }

    pub fn can_commit(&self) -> bool {
        self.pending_count() == 0
    }
}

// ==========================================
// PropertyImporterImpl
// ==========================================
pub struct PropertyImporterImpl<C>
where
    C: ImportConfigReader,
{
    // 持久化网关（批处理写入方共享）
    gateway: Arc<dyn PersistenceGateway>,

    // 配置读取器（每次运行开始时读取一次）
    config: C,

    // 对账引擎（持有解析 / 映射 / 冲突组件，首次与更新导入共用）
    reconciliation: ReconciliationEngine,

    // 熔断器跨运行共享，首次运行时按配置创建
    breaker: OnceLock<Arc<CircuitBreaker>>,

    progress: Option<ProgressCallback>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<C> PropertyImporterImpl<C>
where
    C: ImportConfigReader,
{
    /// 创建导入器
    ///
    /// # 参数
    /// - gateway: 持久化网关
    /// - config: 配置读取器
    /// - file_parser / field_mapper / conflict_handler: 导入组件
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        config: C,
        file_parser: Box<dyn FileParser>,
        field_mapper: Box<dyn FieldMapper>,
        conflict_handler: Box<dyn ConflictHandler>,
    ) -> Self {
        Self {
            gateway,
            config,
            reconciliation: ReconciliationEngine::with_components(
                file_parser,
                field_mapper,
                conflict_handler,
            ),
            breaker: OnceLock::new(),
            progress: None,
            cancel: None,
        }
    }

    /// 使用默认组件
    pub fn with_defaults(gateway: Arc<dyn PersistenceGateway>, config: C) -> Self {
        Self::new(
            gateway,
            config,
            Box::new(VendorFileParser),
            Box::new(FieldMapperImpl::new()),
            Box::new(ConflictHandlerImpl),
        )
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// 外部注入熔断器（多个导入器共享同一下游时使用）
    ///
    /// 已有熔断器时保留原实例，新实例被丢弃
    pub fn with_breaker(self, breaker: Arc<CircuitBreaker>) -> Self {
        if self.breaker.set(breaker).is_err() {
            warn!("熔断器已设置，忽略重复注入");
        }
        self
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.get()
    }

    fn processor(&self, config: &ImportConfig) -> BatchProcessor {
        let breaker = self
            .breaker
            .get_or_init(|| Arc::new(CircuitBreaker::new(BreakerConfig::from(config))));
        BatchProcessor::new(Arc::clone(breaker))
    }

    fn process_options(&self, config: &ImportConfig) -> ProcessOptions {
        let mut options = ProcessOptions::from(config);
        options.progress = self.progress.clone();
        options.cancel = self.cancel.clone();
        options
    }

    /// 上下文未携带代码表时从存储加载
    async fn resolve_context(
        &self,
        ctx: &ImportContext,
        config: &ImportConfig,
    ) -> ImportResult<ImportContext> {
        if ctx.code_table.is_some() {
            return Ok(ctx.clone());
        }
        let fetched = tokio::time::timeout(
            config.api_timeout(),
            self.gateway.fetch_code_table(&ctx.job_id),
        )
        .await
        .map_err(|_| PersistenceError::timeout("fetch_code_table", config.api_timeout_ms))??;
        match fetched {
            Some(table) => {
                debug!(job_id = %ctx.job_id, definitions = table.definition_count(), "已加载代码表");
                Ok(ctx.clone().with_code_table(Arc::new(table)))
            }
            None => Ok(ctx.clone()),
        }
    }

    async fn upsert_records(
        &self,
        config: &ImportConfig,
        job_id: &str,
        records: Vec<CanonicalPropertyRecord>,
    ) -> ImportResult<BatchRunSummary> {
        let writer: Arc<dyn BatchWriter<CanonicalPropertyRecord>> = Arc::new(UpsertWriter::new(
            Arc::clone(&self.gateway),
            job_id,
            config.preserved_fields.clone(),
        ));
        let summary = self
            .processor(config)
            .process(records, writer, &self.process_options(config))
            .await?;
        Ok(summary)
    }

    async fn delete_records(
        &self,
        config: &ImportConfig,
        job_id: &str,
        keys: Vec<String>,
    ) -> ImportResult<BatchRunSummary> {
        let writer: Arc<dyn BatchWriter<String>> =
            Arc::new(DeleteWriter::new(Arc::clone(&self.gateway), job_id));
        let summary = self
            .processor(config)
            .process(keys, writer, &self.process_options(config))
            .await?;
        Ok(summary)
    }
}

#[async_trait::async_trait]
impl<C> PropertyImporter for PropertyImporterImpl<C>
where
    C: ImportConfigReader + Send + Sync,
{
    #[instrument(skip(self, ctx, bytes), fields(job_id = %ctx.job_id, run_id = %ctx.run_id))]
    async fn import_initial(
        &self,
        ctx: &ImportContext,
        file_name: &str,
        bytes: &[u8],
    ) -> ImportResult<ImportRunSummary> {
        let start = Instant::now();
        info!(file_name, size = bytes.len(), "开始首次导入");

        let config = ImportConfig::load(&self.config).await?;
        let ctx = self.resolve_context(ctx, &config).await?;

        // === 步骤 1: 解析 / 映射 / 冲突 ===
        let parsed = self.reconciliation.parse_file(&ctx, file_name, bytes)?;

        // === 步骤 2: 分批写入 ===
        let upsert = self
            .upsert_records(&config, &ctx.job_id, parsed.records)
            .await?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            processed = upsert.processed_count,
            failed = upsert.failed_count,
            cancelled = upsert.cancelled,
            elapsed_ms,
            "首次导入完成"
        );

        Ok(ImportRunSummary {
            run_id: ctx.run_id,
            job_id: ctx.job_id.clone(),
            vendor: parsed.vendor,
            total_rows: parsed.total_rows,
            valid_rows: parsed.valid_rows,
            warnings: parsed.warnings,
            blank_rows: parsed.blank_rows,
            key_collisions: parsed.collisions,
            deleted_count: 0,
            upsert,
            delete: None,
            preserved_merged: 0,
            decisions_applied: 0,
            elapsed_ms,
        })
    }

    #[instrument(skip(self, ctx, bytes), fields(job_id = %ctx.job_id))]
    async fn prepare_update(
        &self,
        ctx: &ImportContext,
        file_name: &str,
        bytes: &[u8],
    ) -> ImportResult<UpdatePlan> {
        let config = ImportConfig::load(&self.config).await?;
        let ctx = self.resolve_context(ctx, &config).await?;

        let outcome = self
            .reconciliation
            .reconcile(self.gateway.as_ref(), &ctx, file_name, bytes, &config)
            .await?;

        Ok(UpdatePlan {
            job_id: ctx.job_id.clone(),
            file_name: file_name.to_string(),
            record_count: outcome.source.records.len(),
            report: outcome.report,
            key_collisions: outcome.source.collisions,
            snapshot_size: outcome.snapshot_size,
        })
    }

    #[instrument(skip(self, ctx, bytes), fields(job_id = %ctx.job_id, run_id = %ctx.run_id))]
    async fn import_update(
        &self,
        ctx: &ImportContext,
        file_name: &str,
        bytes: &[u8],
    ) -> ImportResult<ImportRunSummary> {
        let start = Instant::now();
        info!(file_name, size = bytes.len(), "开始更新导入");

        let config = ImportConfig::load(&self.config).await?;
        let ctx = self.resolve_context(ctx, &config).await?;

        // === 步骤 1: 对账 ===
        let outcome = self
            .reconciliation
            .reconcile(self.gateway.as_ref(), &ctx, file_name, bytes, &config)
            .await?;
        let report = outcome.report;
        // 对账与写入使用同一批记录
        let mut parsed = outcome.source;

        // === 步骤 2: 待决检查 ===
        let pending = report.pending_sale_changes().count();
        if pending > 0 {
            warn!(pending, "存在待决售价变更，拒绝提交");
            return Err(ImportError::PendingSaleDecisions { count: pending });
        }

        // === 步骤 3: 保留字段合并 ===
        let preserved_merged = FieldPreservationMerger::fetch_and_merge(
            self.gateway.as_ref(),
            &ctx.job_id,
            &mut parsed.records,
            &config.preserved_fields,
            config.api_timeout(),
        )
        .await?;

        // === 步骤 4: 售价决策 ===
        let decisions_applied = apply_decisions(&mut parsed.records, &report, Utc::now())?;

        // === 步骤 5: 删除已移除房产 ===
        let removed: Vec<String> = report
            .removed
            .iter()
            .map(|r| r.composite_key.clone())
            .collect();
        let delete = if removed.is_empty() {
            None
        } else {
            info!(count = removed.len(), "删除已移除房产");
            Some(self.delete_records(&config, &ctx.job_id, removed).await?)
        };
        let deleted_count = delete.as_ref().map(|s| s.processed_count).unwrap_or(0);

        // 删除被取消时不再写入
        if delete.as_ref().map(|s| s.cancelled).unwrap_or(false) {
            warn!("删除阶段已取消，跳过写入");
            let elapsed_ms = start.elapsed().as_millis() as u64;
            return Ok(ImportRunSummary {
                run_id: ctx.run_id,
                job_id: ctx.job_id.clone(),
                vendor: parsed.vendor,
                total_rows: parsed.total_rows,
                valid_rows: parsed.valid_rows,
                warnings: parsed.warnings,
                blank_rows: parsed.blank_rows,
                key_collisions: parsed.collisions,
                deleted_count,
                upsert: BatchRunSummary {
                    total_items: parsed.records.len(),
                    cancelled: true,
                    ..Default::default()
                },
                delete,
                preserved_merged,
                decisions_applied,
                elapsed_ms,
            });
        }

        // === 步骤 6: 分批写入 ===
        let upsert = self
            .upsert_records(&config, &ctx.job_id, parsed.records)
            .await?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            processed = upsert.processed_count,
            deleted_count,
            preserved_merged,
            decisions_applied,
            elapsed_ms,
            "更新导入完成"
        );

        Ok(ImportRunSummary {
            run_id: ctx.run_id,
            job_id: ctx.job_id.clone(),
            vendor: parsed.vendor,
            total_rows: parsed.total_rows,
            valid_rows: parsed.valid_rows,
            warnings: parsed.warnings,
            blank_rows: parsed.blank_rows,
            key_collisions: parsed.collisions,
            deleted_count,
            upsert,
            delete,
            preserved_merged,
            decisions_applied,
            elapsed_ms,
        })
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn import_code_file(
        &self,
        job_id: &str,
        content: &str,
        vendor_hint: Option<VendorKind>,
    ) -> ImportResult<CodeDefinitionTable> {
        let table = parse_code_file(content, vendor_hint)?;
        self.gateway.replace_code_table(job_id, &table).await?;
        info!(
            job_id,
            vendor = %table.vendor,
            definitions = table.definition_count(),
            "代码表已替换"
        );
        Ok(table)
    }

    #[instrument(skip(self, ctx, plan, choices), fields(job_id = %ctx.job_id, choices = choices.len()))]
    async fn record_sale_decisions(
        &self,
        ctx: &ImportContext,
        plan: &UpdatePlan,
        choices: &[(String, SaleDecision)],
        decided_by: Option<&str>,
    ) -> ImportResult<Vec<SaleDecisionRecord>> {
        let mut report = plan.report.clone();
        record_decisions(
            self.gateway.as_ref(),
            &ctx.job_id,
            &mut report,
            choices,
            decided_by,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory_gateway::InMemoryGateway;

    const CSV: &[u8] = b"BLOCK,LOT,QUALIFIER,CARD,PROPERTY_LOCATION\n1,1,,1,10 MAIN ST\n";

    fn importer(gateway: Arc<InMemoryGateway>) -> PropertyImporterImpl<ImportConfig> {
        PropertyImporterImpl::with_defaults(gateway, ImportConfig::default())
    }

    #[test]
    fn test_second_breaker_injection_keeps_first() {
        let first = Arc::new(CircuitBreaker::default());
        let second = Arc::new(CircuitBreaker::default());

        let importer = importer(Arc::new(InMemoryGateway::new()))
            .with_breaker(Arc::clone(&first))
            .with_breaker(second);

        let kept = importer.breaker().expect("breaker should be set");
        assert!(Arc::ptr_eq(kept, &first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_table_fetch_honours_api_timeout() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.stall("fetch_code_table");
        let importer = importer(Arc::clone(&gateway));

        let err = importer
            .import_initial(&ImportContext::new("job-1", 2025, "0301"), "export.csv", CSV)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ImportError::Persistence(PersistenceError::Timeout { ref operation, .. })
                if operation == "fetch_code_table"
        ));
        assert!(gateway.fetch_page("job-1", 0, 10).await.unwrap().is_empty());
    }
}
