// ==========================================
// CAMA 导入引擎 - 对账引擎
// ==========================================
// 职责: 解析新文件，加载历史快照与决策，生成 ComparisonReport
// 红线: 与导入使用同一解析 / 映射 / key 函数，否则 key 无法对齐
// 红线: 对账不写入任何数据
// ==========================================

use crate::config::ImportConfig;
use crate::domain::property::{CanonicalPropertyRecord, ImportContext};
use crate::domain::reconciliation::ComparisonReport;
use crate::engine::reconciliation::comparator::compare;
use crate::engine::reconciliation::snapshot_loader::{load_snapshot, SnapshotPaging};
use crate::domain::types::VendorKind;
use crate::importer::conflict_handler::{ConflictHandlerImpl, KeyCollision};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapperImpl;
use crate::importer::file_parser::{RowWarning, VendorFileParser};
use crate::importer::importer_trait::{ConflictHandler, FieldMapper, FileParser};
use crate::repository::property_gateway::PersistenceGateway;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

impl From<&ImportConfig> for SnapshotPaging {
    fn from(config: &ImportConfig) -> Self {
        Self {
            page_size: config.snapshot_page_size,
            page_delay: config.snapshot_page_delay(),
            api_timeout: config.api_timeout(),
        }
    }
}

/// 新文件解析 + 映射 + 去重后的结果
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub vendor: VendorKind,
    /// 表头之后的非空数据行
    pub total_rows: usize,
    /// 成功解析并映射的行（去重前）
    pub valid_rows: usize,
    pub warnings: Vec<RowWarning>,
    pub blank_rows: usize,
    pub records: Vec<CanonicalPropertyRecord>,
    pub collisions: Vec<KeyCollision>,
}

/// 对账结果（报告 + 新文件解析结果）
#[derive(Debug, Clone)]
pub struct ReconciliationOutcome {
    pub report: ComparisonReport,
    pub source: ParsedSource,
    pub snapshot_size: usize,
    pub elapsed_ms: u64,
}

// ==========================================
// ReconciliationEngine
// ==========================================
// 持有导入管道的解析 / 映射 / 冲突组件；导入器经由本引擎解析，
// 对账与写入看到的是同一批记录
pub struct ReconciliationEngine {
    parser: Box<dyn FileParser>,
    mapper: Box<dyn FieldMapper>,
    conflicts: Box<dyn ConflictHandler>,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::with_components(
            Box::new(VendorFileParser),
            Box::new(FieldMapperImpl::new()),
            Box::new(ConflictHandlerImpl),
        )
    }
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_components(
        parser: Box<dyn FileParser>,
        mapper: Box<dyn FieldMapper>,
        conflicts: Box<dyn ConflictHandler>,
    ) -> Self {
        Self {
            parser,
            mapper,
            conflicts,
        }
    }

    /// 解析 → 映射 → key 冲突
    ///
    /// # 错误
    /// - NoValidRows: 没有任何可用数据行
    pub fn parse_file(
        &self,
        ctx: &ImportContext,
        file_name: &str,
        bytes: &[u8],
    ) -> ImportResult<ParsedSource> {
        let parsed = self.parser.parse_bytes(bytes, file_name).map_err(|e| {
            error!(file_name, error = %e, "文件解析失败");
            e
        })?;
        if parsed.records.is_empty() {
            return Err(ImportError::NoValidRows {
                skipped: parsed.warnings.len(),
            });
        }

        let vendor = parsed.format.vendor;
        let valid_rows = parsed.records.len();
        let mapped: Vec<CanonicalPropertyRecord> = parsed
            .records
            .iter()
            .map(|raw| self.mapper.map_to_canonical(raw, ctx))
            .collect();

        let outcome = self.conflicts.resolve_key_collisions(mapped);
        if !outcome.collisions.is_empty() {
            warn!(collisions = outcome.collisions.len(), "源文件存在 composite key 冲突");
        }

        info!(
            file_name,
            vendor = %vendor,
            total_rows = parsed.total_rows,
            valid_rows,
            skipped = parsed.warnings.len(),
            blank_rows = parsed.blank_rows,
            unique_keys = outcome.records.len(),
            "文件解析映射完成"
        );

        Ok(ParsedSource {
            vendor,
            total_rows: parsed.total_rows,
            valid_rows,
            warnings: parsed.warnings,
            blank_rows: parsed.blank_rows,
            records: outcome.records,
            collisions: outcome.collisions,
        })
    }

    /// 执行对账
    ///
    /// # 参数
    /// - gateway: 持久化网关（只读）
    /// - ctx: 导入上下文（job_id / year / ccdd）
    /// - file_name, bytes: 新上传的源文件
    /// - config: 分页与超时参数
    #[instrument(skip(self, gateway, ctx, bytes, config), fields(job_id = %ctx.job_id))]
    pub async fn reconcile(
        &self,
        gateway: &dyn PersistenceGateway,
        ctx: &ImportContext,
        file_name: &str,
        bytes: &[u8],
        config: &ImportConfig,
    ) -> ImportResult<ReconciliationOutcome> {
        let start = Instant::now();

        let source = self.parse_file(ctx, file_name, bytes)?;
        let snapshot = load_snapshot(gateway, &ctx.job_id, SnapshotPaging::from(config)).await?;

        let prior = tokio::time::timeout(
            config.api_timeout(),
            gateway.fetch_sale_decisions(&ctx.job_id),
        )
        .await
        .map_err(|_| {
            crate::repository::error::PersistenceError::timeout(
                "fetch_sale_decisions",
                config.api_timeout_ms,
            )
        })??;

        let report = compare(&snapshot, &source.records, &prior);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            file_name,
            added = report.added.len(),
            removed = report.removed.len(),
            changed = report.changed_count,
            unchanged = report.unchanged_count,
            sale_changes = report.sale_changes.len(),
            pending = report.pending_sale_changes().count(),
            elapsed_ms,
            "对账完成"
        );

        Ok(ReconciliationOutcome {
            report,
            source,
            snapshot_size: snapshot.len(),
            elapsed_ms,
        })
    }
}
