// ==========================================
// CAMA 导入引擎 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入 / 批处理 / 对账所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::importer::error::ImportResult;
use async_trait::async_trait;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入运行开始时一次性读取策略参数
// 实现者: ConfigManager（从 config_kv 表读取）、ImportConfig（内存值）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 批处理 =====

    /// 每批记录数
    ///
    /// # 默认值
    /// - 50
    async fn get_batch_size(&self) -> ImportResult<usize>;

    /// 每批最多尝试次数
    ///
    /// # 默认值
    /// - 3
    async fn get_max_retries(&self) -> ImportResult<u32>;

    /// 退避基数（毫秒）
    ///
    /// # 默认值
    /// - 1000
    async fn get_retry_base_delay_ms(&self) -> ImportResult<u64>;

    /// 退避上限（毫秒）
    ///
    /// # 默认值
    /// - 30000
    async fn get_max_retry_delay_ms(&self) -> ImportResult<u64>;

    /// 单批持久化硬超时（毫秒）
    ///
    /// # 默认值
    /// - 45000
    async fn get_batch_timeout_ms(&self) -> ImportResult<u64>;

    /// 轻量网关调用超时（毫秒），用于分页与保留字段读取
    ///
    /// # 默认值
    /// - 15000
    async fn get_api_timeout_ms(&self) -> ImportResult<u64>;

    /// 回滚超时（毫秒），回滚不重试
    ///
    /// # 默认值
    /// - 10000
    async fn get_rollback_timeout_ms(&self) -> ImportResult<u64>;

    /// 并发窗口；1 表示顺序执行
    ///
    /// # 默认值
    /// - 1
    async fn get_max_concurrency(&self) -> ImportResult<usize>;

    /// 批次间隔（毫秒）
    ///
    /// # 默认值
    /// - 0
    async fn get_inter_batch_delay_ms(&self) -> ImportResult<u64>;

    /// 是否启用事务回滚
    ///
    /// # 默认值
    /// - true
    async fn get_enable_rollback(&self) -> ImportResult<bool>;

    // ===== 熔断器 =====

    /// # 默认值
    /// - 3
    async fn get_breaker_failure_threshold(&self) -> ImportResult<u32>;

    /// # 默认值
    /// - 2
    async fn get_breaker_timeout_threshold(&self) -> ImportResult<u32>;

    /// OPEN → HALF_OPEN 的恢复窗口（毫秒）
    ///
    /// # 默认值
    /// - 90000
    async fn get_breaker_recovery_ms(&self) -> ImportResult<u64>;

    // ===== 对账快照 =====

    /// # 默认值
    /// - 1000
    async fn get_snapshot_page_size(&self) -> ImportResult<usize>;

    /// # 默认值
    /// - 100
    async fn get_snapshot_page_delay_ms(&self) -> ImportResult<u64>;

    // ===== 保留字段 =====

    /// 保留字段名列表
    ///
    /// # 默认值
    /// - project_start_date, is_assigned_property, validation_status,
    ///   location_analysis, new_vcs, values_norm_time, values_norm_size,
    ///   sales_history
    async fn get_preserved_fields(&self) -> ImportResult<Vec<String>>;
}
