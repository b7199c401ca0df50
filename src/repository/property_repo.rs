// ==========================================
// CAMA 导入引擎 - SQLite 持久化网关实现
// ==========================================
// 职责: PersistenceGateway 的本地适配器（使用 rusqlite）
// 存储: property_records（记录 JSON）+ property_preserved_fields（逐字段）
// 红线: 适配器不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::code_table::CodeDefinitionTable;
use crate::domain::property::{CanonicalPropertyRecord, PreservedFieldSet};
use crate::domain::reconciliation::SaleDecisionRecord;
use crate::domain::types::SaleDecision;
use crate::repository::error::{PersistenceError, PersistenceResult};
use crate::repository::property_gateway::{PersistenceGateway, UpsertStats};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::debug;

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ==========================================
// SqlitePropertyGateway
// ==========================================
pub struct SqlitePropertyGateway {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePropertyGateway {
    /// 创建新的网关实例（自动初始化 schema）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> PersistenceResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建（与 ConfigManager 共享连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> PersistenceResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| PersistenceError::Lock(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
            init_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    fn lock(&self) -> PersistenceResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PersistenceError::Lock(format!("锁获取失败: {}", e)))
    }

    /// 记录 JSON（不含保留字段，保留字段逐字段存储）
    fn encode_record(record: &CanonicalPropertyRecord) -> PersistenceResult<String> {
        let mut value = serde_json::to_value(record)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("preserved");
        }
        Ok(serde_json::to_string(&value)?)
    }

    fn decode_record(json: &str) -> PersistenceResult<CanonicalPropertyRecord> {
        Ok(serde_json::from_str(json)?)
    }

    /// 仅在内容变化时更新 uploaded_at，保证重复 upsert 不改变存储状态
    fn upsert_record_tx(
        tx: &Transaction,
        record: &CanonicalPropertyRecord,
        uploaded_at: &str,
    ) -> PersistenceResult<()> {
        let json = Self::encode_record(record)?;
        tx.execute(
            r#"
            INSERT INTO property_records (job_id, composite_key, vendor, record_json, uploaded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(job_id, composite_key) DO UPDATE SET
                vendor = excluded.vendor,
                record_json = excluded.record_json,
                uploaded_at = excluded.uploaded_at
            WHERE property_records.record_json IS NOT excluded.record_json
            "#,
            params![
                record.job_id,
                record.composite_key,
                record.vendor.as_str(),
                json,
                uploaded_at
            ],
        )?;
        Ok(())
    }

    fn upsert_preserved_tx(
        tx: &Transaction,
        job_id: &str,
        key: &str,
        field: &str,
        value: &serde_json::Value,
        updated_at: &str,
    ) -> PersistenceResult<()> {
        tx.execute(
            r#"
            INSERT INTO property_preserved_fields (job_id, composite_key, field_name, value_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(job_id, composite_key, field_name) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at
            WHERE property_preserved_fields.value_json IS NOT excluded.value_json
            "#,
            params![job_id, key, field, serde_json::to_string(value)?, updated_at],
        )?;
        Ok(())
    }

    fn stored_preserved_names(
        conn: &Connection,
        job_id: &str,
        key: &str,
    ) -> PersistenceResult<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT field_name FROM property_preserved_fields WHERE job_id = ?1 AND composite_key = ?2",
        )?;
        let names = stmt
            .query_map(params![job_id, key], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// 读取保留字段；field_filter 为 None 时读取全部
    fn load_preserved(
        conn: &Connection,
        job_id: &str,
        keys: &[String],
        field_filter: Option<&HashSet<&str>>,
    ) -> PersistenceResult<HashMap<String, PreservedFieldSet>> {
        let mut stmt = conn.prepare_cached(
            "SELECT field_name, value_json FROM property_preserved_fields WHERE job_id = ?1 AND composite_key = ?2",
        )?;

        let mut out = HashMap::new();
        for key in keys {
            let rows = stmt
                .query_map(params![job_id, key], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut set = PreservedFieldSet::default();
            for (name, value_json) in rows {
                if let Some(filter) = field_filter {
                    if !filter.contains(name.as_str()) {
                        continue;
                    }
                }
                set.set(name, serde_json::from_str(&value_json)?);
            }
            if !set.is_empty() {
                out.insert(key.clone(), set);
            }
        }
        Ok(out)
    }

    fn attach_preserved(
        conn: &Connection,
        job_id: &str,
        records: &mut [CanonicalPropertyRecord],
    ) -> PersistenceResult<()> {
        let keys: Vec<String> = records.iter().map(|r| r.composite_key.clone()).collect();
        let mut preserved = Self::load_preserved(conn, job_id, &keys, None)?;
        for record in records.iter_mut() {
            record.preserved = preserved.remove(&record.composite_key).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqlitePropertyGateway {
    async fn bulk_upsert(
        &self,
        records: &[CanonicalPropertyRecord],
        preserved_fields: &[String],
    ) -> PersistenceResult<UpsertStats> {
        let started = Instant::now();
        let allowed: HashSet<&str> = preserved_fields.iter().map(|s| s.as_str()).collect();
        let uploaded_at = now_text();

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut preserved_count = 0;
        for record in records {
            let had_preserved = Self::stored_preserved_names(&tx, &record.job_id, &record.composite_key)?
                .iter()
                .any(|n| allowed.contains(n.as_str()));
            if had_preserved {
                preserved_count += 1;
            }

            Self::upsert_record_tx(&tx, record, &uploaded_at)?;

            // 记录中缺失的保留字段不写，存储值保持不变
            for (field, value) in record.preserved.iter() {
                if allowed.contains(field.as_str()) {
                    Self::upsert_preserved_tx(
                        &tx,
                        &record.job_id,
                        &record.composite_key,
                        field,
                        value,
                        &uploaded_at,
                    )?;
                }
            }
        }

        tx.commit()?;

        let stats = UpsertStats {
            inserted_count: records.len(),
            preserved_count,
            total_processed: records.len(),
            execution_time_ms: started.elapsed().as_millis() as u64,
        };
        debug!(
            inserted = stats.inserted_count,
            preserved = stats.preserved_count,
            elapsed_ms = stats.execution_time_ms,
            "bulk_upsert 完成"
        );
        Ok(stats)
    }

    async fn fetch_page(
        &self,
        job_id: &str,
        offset: usize,
        limit: usize,
    ) -> PersistenceResult<Vec<CanonicalPropertyRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT record_json FROM property_records
            WHERE job_id = ?1
            ORDER BY uploaded_at DESC, rowid DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![job_id, limit as i64, offset as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = rows
            .iter()
            .map(|json| Self::decode_record(json))
            .collect::<PersistenceResult<Vec<_>>>()?;
        Self::attach_preserved(&conn, job_id, &mut records)?;
        Ok(records)
    }

    async fn fetch_preserved_fields(
        &self,
        job_id: &str,
        keys: &[String],
        field_names: &[String],
    ) -> PersistenceResult<HashMap<String, PreservedFieldSet>> {
        let filter: HashSet<&str> = field_names.iter().map(|s| s.as_str()).collect();
        let conn = self.lock()?;
        Self::load_preserved(&conn, job_id, keys, Some(&filter))
    }

    async fn fetch_by_keys(
        &self,
        job_id: &str,
        keys: &[String],
    ) -> PersistenceResult<Vec<CanonicalPropertyRecord>> {
        let conn = self.lock()?;
        let mut records = Vec::new();
        {
            let mut stmt = conn.prepare_cached(
                "SELECT record_json FROM property_records WHERE job_id = ?1 AND composite_key = ?2",
            )?;
            for key in keys {
                let json: Option<String> = stmt
                    .query_row(params![job_id, key], |row| row.get(0))
                    .optional()?;
                if let Some(json) = json {
                    records.push(Self::decode_record(&json)?);
                }
            }
        }
        Self::attach_preserved(&conn, job_id, &mut records)?;
        Ok(records)
    }

    async fn delete_records(&self, job_id: &str, keys: &[String]) -> PersistenceResult<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut deleted = 0;
        for key in keys {
            tx.execute(
                "DELETE FROM property_preserved_fields WHERE job_id = ?1 AND composite_key = ?2",
                params![job_id, key],
            )?;
            deleted += tx.execute(
                "DELETE FROM property_records WHERE job_id = ?1 AND composite_key = ?2",
                params![job_id, key],
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    async fn restore_records(
        &self,
        records: &[CanonicalPropertyRecord],
    ) -> PersistenceResult<usize> {
        let now = now_text();
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for record in records {
            Self::upsert_record_tx(&tx, record, &now)?;
            tx.execute(
                "DELETE FROM property_preserved_fields WHERE job_id = ?1 AND composite_key = ?2",
                params![record.job_id, record.composite_key],
            )?;
            for (field, value) in record.preserved.iter() {
                Self::upsert_preserved_tx(
                    &tx,
                    &record.job_id,
                    &record.composite_key,
                    field,
                    value,
                    &now,
                )?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    async fn replace_code_table(
        &self,
        job_id: &str,
        table: &CodeDefinitionTable,
    ) -> PersistenceResult<()> {
        let json = serde_json::to_string(table)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO code_tables (job_id, vendor, table_json, uploaded_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![job_id, table.vendor.as_str(), json, now_text()],
        )?;
        Ok(())
    }

    async fn fetch_code_table(
        &self,
        job_id: &str,
    ) -> PersistenceResult<Option<CodeDefinitionTable>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT table_json FROM code_tables WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn append_sale_decisions(
        &self,
        job_id: &str,
        decisions: &[SaleDecisionRecord],
    ) -> PersistenceResult<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for d in decisions {
            tx.execute(
                r#"
                INSERT INTO sale_decisions (
                    job_id, composite_key, decision, old_sale_json, new_sale_json,
                    decided_by, decided_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    job_id,
                    d.composite_key,
                    d.decision.as_str(),
                    serde_json::to_string(&d.old_sale)?,
                    serde_json::to_string(&d.new_sale)?,
                    d.decided_by,
                    d.decided_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;
        }
        tx.commit()?;
        Ok(decisions.len())
    }

    async fn fetch_sale_decisions(
        &self,
        job_id: &str,
    ) -> PersistenceResult<HashMap<String, SaleDecisionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT composite_key, decision, old_sale_json, new_sale_json, decided_by, decided_at
            FROM sale_decisions WHERE job_id = ?1 ORDER BY id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // 按 id 升序覆盖，保留每个 key 的最新决策
        let mut latest = HashMap::new();
        for (key, decision, old_json, new_json, decided_by, decided_at) in rows {
            let decision: SaleDecision = decision
                .parse()
                .map_err(PersistenceError::Serialization)?;
            let decided_at = DateTime::parse_from_rfc3339(&decided_at)
                .map_err(|e| PersistenceError::Serialization(e.to_string()))?
                .with_timezone(&Utc);
            latest.insert(
                key.clone(),
                SaleDecisionRecord {
                    composite_key: key,
                    decision,
                    old_sale: serde_json::from_str(&old_json)?,
                    new_sale: serde_json::from_str(&new_json)?,
                    decided_by,
                    decided_at,
                },
            );
        }
        Ok(latest)
    }
}
