// ==========================================
// CAMA 导入引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config::{ImportConfig, DEFAULT_PRESERVED_FIELDS};
use crate::config::import_config_trait::ImportConfigReader;
use crate::db::{init_schema, open_sqlite_connection};
use crate::importer::error::{ImportError, ImportResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
    defaults: ImportConfig,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_sqlite_connection(db_path).map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        })?;
        init_schema(&conn).map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            defaults: ImportConfig::default(),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            defaults: ImportConfig::default(),
        }
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: format!("锁获取失败: {}", e),
        })?;

        conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ImportResult<()> {
        let conn = self.conn.lock().map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: format!("锁获取失败: {}", e),
        })?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value],
        )
        .map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// 读取并解析配置值，缺失时返回默认值
    fn get_parsed<T>(&self, key: &str, default: T) -> ImportResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|e| ImportError::ConfigValueError {
                    key: key.to_string(),
                    value: raw.clone(),
                    message: e.to_string(),
                }),
        }
    }

    /// 获取所有 global 配置的快照（JSON）
    pub fn get_config_snapshot(&self) -> ImportResult<String> {
        let conn = self.conn.lock().map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: format!("锁获取失败: {}", e),
        })?;

        let read_err = |e: rusqlite::Error| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        };

        let mut stmt = conn
            .prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(read_err)?
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(read_err)?;

        serde_json::to_string(&rows).map_err(|e| ImportError::InternalError(e.to_string()))
    }
}

// ==========================================
// ImportConfigReader 实现
// ==========================================
#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_batch_size(&self) -> ImportResult<usize> {
        let v = self.get_parsed(config_keys::BATCH_SIZE, self.defaults.batch_size)?;
        if v == 0 {
            return Err(ImportError::ConfigValueError {
                key: config_keys::BATCH_SIZE.to_string(),
                value: v.to_string(),
                message: "批大小必须大于 0".to_string(),
            });
        }
        Ok(v)
    }

    async fn get_max_retries(&self) -> ImportResult<u32> {
        Ok(self
            .get_parsed(config_keys::MAX_RETRIES, self.defaults.max_retries)?
            .max(1))
    }

    async fn get_retry_base_delay_ms(&self) -> ImportResult<u64> {
        self.get_parsed(config_keys::RETRY_BASE_DELAY_MS, self.defaults.retry_base_delay_ms)
    }

    async fn get_max_retry_delay_ms(&self) -> ImportResult<u64> {
        self.get_parsed(config_keys::MAX_RETRY_DELAY_MS, self.defaults.max_retry_delay_ms)
    }

    async fn get_batch_timeout_ms(&self) -> ImportResult<u64> {
        self.get_parsed(config_keys::BATCH_TIMEOUT_MS, self.defaults.batch_timeout_ms)
    }

    async fn get_api_timeout_ms(&self) -> ImportResult<u64> {
        self.get_parsed(config_keys::API_TIMEOUT_MS, self.defaults.api_timeout_ms)
    }

    async fn get_rollback_timeout_ms(&self) -> ImportResult<u64> {
        self.get_parsed(config_keys::ROLLBACK_TIMEOUT_MS, self.defaults.rollback_timeout_ms)
    }

    async fn get_max_concurrency(&self) -> ImportResult<usize> {
        Ok(self
            .get_parsed(config_keys::MAX_CONCURRENCY, self.defaults.max_concurrency)?
            .max(1))
    }

    async fn get_inter_batch_delay_ms(&self) -> ImportResult<u64> {
        self.get_parsed(config_keys::INTER_BATCH_DELAY_MS, self.defaults.inter_batch_delay_ms)
    }

    async fn get_enable_rollback(&self) -> ImportResult<bool> {
        match self.get_config_value(config_keys::ENABLE_ROLLBACK)? {
            None => Ok(self.defaults.enable_rollback),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(ImportError::ConfigValueError {
                    key: config_keys::ENABLE_ROLLBACK.to_string(),
                    value: raw,
                    message: "期望布尔值".to_string(),
                }),
            },
        }
    }

    async fn get_breaker_failure_threshold(&self) -> ImportResult<u32> {
        Ok(self
            .get_parsed(
                config_keys::BREAKER_FAILURE_THRESHOLD,
                self.defaults.breaker_failure_threshold,
            )?
            .max(1))
    }

    async fn get_breaker_timeout_threshold(&self) -> ImportResult<u32> {
        Ok(self
            .get_parsed(
                config_keys::BREAKER_TIMEOUT_THRESHOLD,
                self.defaults.breaker_timeout_threshold,
            )?
            .max(1))
    }

    async fn get_breaker_recovery_ms(&self) -> ImportResult<u64> {
        self.get_parsed(config_keys::BREAKER_RECOVERY_MS, self.defaults.breaker_recovery_ms)
    }

    async fn get_snapshot_page_size(&self) -> ImportResult<usize> {
        Ok(self
            .get_parsed(config_keys::SNAPSHOT_PAGE_SIZE, self.defaults.snapshot_page_size)?
            .max(1))
    }

    async fn get_snapshot_page_delay_ms(&self) -> ImportResult<u64> {
        self.get_parsed(
            config_keys::SNAPSHOT_PAGE_DELAY_MS,
            self.defaults.snapshot_page_delay_ms,
        )
    }

    async fn get_preserved_fields(&self) -> ImportResult<Vec<String>> {
        let raw = match self.get_config_value(config_keys::PRESERVED_FIELDS)? {
            Some(v) => v,
            None => {
                return Ok(DEFAULT_PRESERVED_FIELDS
                    .iter()
                    .map(|s| s.to_string())
                    .collect())
            }
        };

        let fields: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| ImportError::ConfigValueError {
                key: config_keys::PRESERVED_FIELDS.to_string(),
                value: raw.clone(),
                message: e.to_string(),
            })?;
        Ok(fields
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect())
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 批处理
    pub const BATCH_SIZE: &str = "import/batch_size";
    pub const MAX_RETRIES: &str = "import/max_retries";
    pub const RETRY_BASE_DELAY_MS: &str = "import/retry_base_delay_ms";
    pub const MAX_RETRY_DELAY_MS: &str = "import/max_retry_delay_ms";
    pub const BATCH_TIMEOUT_MS: &str = "import/batch_timeout_ms";
    pub const API_TIMEOUT_MS: &str = "import/api_timeout_ms";
    pub const ROLLBACK_TIMEOUT_MS: &str = "import/rollback_timeout_ms";
    pub const MAX_CONCURRENCY: &str = "import/max_concurrency";
    pub const INTER_BATCH_DELAY_MS: &str = "import/inter_batch_delay_ms";
    pub const ENABLE_ROLLBACK: &str = "import/enable_rollback";

    // 熔断器
    pub const BREAKER_FAILURE_THRESHOLD: &str = "breaker/failure_threshold";
    pub const BREAKER_TIMEOUT_THRESHOLD: &str = "breaker/consecutive_timeout_threshold";
    pub const BREAKER_RECOVERY_MS: &str = "breaker/recovery_timeout_ms";

    // 对账快照
    pub const SNAPSHOT_PAGE_SIZE: &str = "snapshot/page_size";
    pub const SNAPSHOT_PAGE_DELAY_MS: &str = "snapshot/inter_page_delay_ms";

    // 保留字段（JSON 数组）
    pub const PRESERVED_FIELDS: &str = "import/preserved_fields";
}
