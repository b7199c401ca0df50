// ==========================================
// CAMA 导入引擎 - 保留字段合并
// ==========================================
// 职责: 读取存储中的人工维护字段并覆盖到新解析记录上
// 规则: 保留字段非 null 即生效，不论新解析结果为何
// 红线: 只处理显式列出的保留字段
// ==========================================

use crate::domain::property::{CanonicalPropertyRecord, PreservedFieldSet};
use crate::repository::error::{PersistenceError, PersistenceResult};
use crate::repository::property_gateway::PersistenceGateway;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// 单次读取的 key 数量上限
pub const PRESERVED_FETCH_CHUNK: usize = 500;

pub struct FieldPreservationMerger;

impl FieldPreservationMerger {
    /// 读取并合并保留字段
    ///
    /// # 参数
    /// - gateway: 持久化网关
    /// - job_id: 作业 ID
    /// - records: 即将写入的新记录（就地合并）
    /// - fields: 保留字段名
    /// - api_timeout: 单次读取超时
    ///
    /// # 返回
    /// - Ok(n): 合并了至少一个字段的记录数（首次导入为 0）
    pub async fn fetch_and_merge(
        gateway: &dyn PersistenceGateway,
        job_id: &str,
        records: &mut [CanonicalPropertyRecord],
        fields: &[String],
        api_timeout: Duration,
    ) -> PersistenceResult<usize> {
        if records.is_empty() || fields.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = records.iter().map(|r| r.composite_key.clone()).collect();
        let mut stored: HashMap<String, PreservedFieldSet> = HashMap::new();

        for chunk in keys.chunks(PRESERVED_FETCH_CHUNK) {
            let fetched = tokio::time::timeout(
                api_timeout,
                gateway.fetch_preserved_fields(job_id, chunk, fields),
            )
            .await
            .map_err(|_| {
                PersistenceError::timeout("fetch_preserved_fields", api_timeout.as_millis() as u64)
            })??;
            stored.extend(fetched);
        }

        debug!(job_id, keys = keys.len(), found = stored.len(), "保留字段读取完成");

        let merged = Self::overlay(records, &stored, fields);
        info!(job_id, merged, "保留字段合并完成");
        Ok(merged)
    }

    /// 覆盖保留字段（纯函数部分）
    ///
    /// # 返回
    /// - 合并了至少一个字段的记录数
    pub fn overlay(
        records: &mut [CanonicalPropertyRecord],
        stored: &HashMap<String, PreservedFieldSet>,
        fields: &[String],
    ) -> usize {
        let mut merged = 0;

        for record in records.iter_mut() {
            let set = match stored.get(&record.composite_key) {
                Some(s) => s,
                None => continue,
            };

            let mut touched = false;
            for (field, value) in set.iter() {
                if fields.iter().any(|f| f == field) {
                    record.preserved.set(field.clone(), value.clone());
                    touched = true;
                }
            }
            if touched {
                merged += 1;
            }
        }

        merged
    }
}
