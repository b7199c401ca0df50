// ==========================================
// CAMA 导入引擎 - 导入策略参数
// ==========================================
// 职责: 单次运行的策略快照（运行开始时读取一次）
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::importer::error::ImportResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认保留字段
pub const DEFAULT_PRESERVED_FIELDS: &[&str] = &[
    "project_start_date",
    "is_assigned_property",
    "validation_status",
    "location_analysis",
    "new_vcs",
    "values_norm_time",
    "values_norm_size",
    "sales_history",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub batch_timeout_ms: u64,
    pub api_timeout_ms: u64,
    pub rollback_timeout_ms: u64,
    pub max_concurrency: usize,
    pub inter_batch_delay_ms: u64,
    pub enable_rollback: bool,
    pub breaker_failure_threshold: u32,
    pub breaker_timeout_threshold: u32,
    pub breaker_recovery_ms: u64,
    pub snapshot_page_size: usize,
    pub snapshot_page_delay_ms: u64,
    pub preserved_fields: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            batch_timeout_ms: 45_000,
            api_timeout_ms: 15_000,
            rollback_timeout_ms: 10_000,
            max_concurrency: 1,
            inter_batch_delay_ms: 0,
            enable_rollback: true,
            breaker_failure_threshold: 3,
            breaker_timeout_threshold: 2,
            breaker_recovery_ms: 90_000,
            snapshot_page_size: 1_000,
            snapshot_page_delay_ms: 100,
            preserved_fields: DEFAULT_PRESERVED_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ImportConfig {
    /// 从任意配置源读取完整快照
    pub async fn load<R: ImportConfigReader + ?Sized>(reader: &R) -> ImportResult<Self> {
        Ok(Self {
            batch_size: reader.get_batch_size().await?,
            max_retries: reader.get_max_retries().await?,
            retry_base_delay_ms: reader.get_retry_base_delay_ms().await?,
            max_retry_delay_ms: reader.get_max_retry_delay_ms().await?,
            batch_timeout_ms: reader.get_batch_timeout_ms().await?,
            api_timeout_ms: reader.get_api_timeout_ms().await?,
            rollback_timeout_ms: reader.get_rollback_timeout_ms().await?,
            max_concurrency: reader.get_max_concurrency().await?,
            inter_batch_delay_ms: reader.get_inter_batch_delay_ms().await?,
            enable_rollback: reader.get_enable_rollback().await?,
            breaker_failure_threshold: reader.get_breaker_failure_threshold().await?,
            breaker_timeout_threshold: reader.get_breaker_timeout_threshold().await?,
            breaker_recovery_ms: reader.get_breaker_recovery_ms().await?,
            snapshot_page_size: reader.get_snapshot_page_size().await?,
            snapshot_page_delay_ms: reader.get_snapshot_page_delay_ms().await?,
            preserved_fields: reader.get_preserved_fields().await?,
        })
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn snapshot_page_delay(&self) -> Duration {
        Duration::from_millis(self.snapshot_page_delay_ms)
    }
}

// 内存配置源（测试与嵌入场景）
#[async_trait]
impl ImportConfigReader for ImportConfig {
    async fn get_batch_size(&self) -> ImportResult<usize> {
        Ok(self.batch_size)
    }

    async fn get_max_retries(&self) -> ImportResult<u32> {
        Ok(self.max_retries)
    }

    async fn get_retry_base_delay_ms(&self) -> ImportResult<u64> {
        Ok(self.retry_base_delay_ms)
    }

    async fn get_max_retry_delay_ms(&self) -> ImportResult<u64> {
        Ok(self.max_retry_delay_ms)
    }

    async fn get_batch_timeout_ms(&self) -> ImportResult<u64> {
        Ok(self.batch_timeout_ms)
    }

    async fn get_api_timeout_ms(&self) -> ImportResult<u64> {
        Ok(self.api_timeout_ms)
    }

    async fn get_rollback_timeout_ms(&self) -> ImportResult<u64> {
        Ok(self.rollback_timeout_ms)
    }

    async fn get_max_concurrency(&self) -> ImportResult<usize> {
        Ok(self.max_concurrency)
    }

    async fn get_inter_batch_delay_ms(&self) -> ImportResult<u64> {
        Ok(self.inter_batch_delay_ms)
    }

    async fn get_enable_rollback(&self) -> ImportResult<bool> {
        Ok(self.enable_rollback)
    }

    async fn get_breaker_failure_threshold(&self) -> ImportResult<u32> {
        Ok(self.breaker_failure_threshold)
    }

    async fn get_breaker_timeout_threshold(&self) -> ImportResult<u32> {
        Ok(self.breaker_timeout_threshold)
    }

    async fn get_breaker_recovery_ms(&self) -> ImportResult<u64> {
        Ok(self.breaker_recovery_ms)
    }

    async fn get_snapshot_page_size(&self) -> ImportResult<usize> {
        Ok(self.snapshot_page_size)
    }

    async fn get_snapshot_page_delay_ms(&self) -> ImportResult<u64> {
        Ok(self.snapshot_page_delay_ms)
    }

    async fn get_preserved_fields(&self) -> ImportResult<Vec<String>> {
        Ok(self.preserved_fields.clone())
    }
}
