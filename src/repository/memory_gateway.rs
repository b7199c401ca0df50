// ==========================================
// 内存网关（单元测试用）
// ==========================================
// 用途: 记录调用参数；指定操作可挂起以触发调用方超时
// ==========================================

use crate::domain::code_table::CodeDefinitionTable;
use crate::domain::property::{CanonicalPropertyRecord, PreservedFieldSet};
use crate::domain::reconciliation::SaleDecisionRecord;
use crate::repository::error::PersistenceResult;
use crate::repository::property_gateway::{PersistenceGateway, UpsertStats};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct InMemoryGateway {
    records: Mutex<BTreeMap<(String, String), CanonicalPropertyRecord>>,
    code_tables: Mutex<HashMap<String, CodeDefinitionTable>>,
    decisions: Mutex<Vec<(String, SaleDecisionRecord)>>,
    /// 每次 fetch_preserved_fields 收到的 key 数
    preserved_requests: Mutex<Vec<usize>>,
    stalled: Mutex<HashSet<&'static str>>,
}

impl InMemoryGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed(&self, records: Vec<CanonicalPropertyRecord>) {
        let mut map = self.records.lock().unwrap();
        for r in records {
            map.insert((r.job_id.clone(), r.composite_key.clone()), r);
        }
    }

    /// 指定操作挂起一小时
    pub(crate) fn stall(&self, operation: &'static str) {
        self.stalled.lock().unwrap().insert(operation);
    }

    pub(crate) fn preserved_requests(&self) -> Vec<usize> {
        self.preserved_requests.lock().unwrap().clone()
    }

    async fn maybe_stall(&self, operation: &'static str) {
        let stalled = self.stalled.lock().unwrap().contains(operation);
        if stalled {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
    }

    fn job_records(&self, job_id: &str) -> Vec<CanonicalPropertyRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn bulk_upsert(
        &self,
        records: &[CanonicalPropertyRecord],
        _preserved_fields: &[String],
    ) -> PersistenceResult<UpsertStats> {
        self.maybe_stall("bulk_upsert").await;
        self.seed(records.to_vec());
        Ok(UpsertStats {
            inserted_count: records.len(),
            total_processed: records.len(),
            ..Default::default()
        })
    }

    async fn fetch_page(
        &self,
        job_id: &str,
        offset: usize,
        limit: usize,
    ) -> PersistenceResult<Vec<CanonicalPropertyRecord>> {
        self.maybe_stall("fetch_page").await;
        Ok(self
            .job_records(job_id)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn fetch_preserved_fields(
        &self,
        job_id: &str,
        keys: &[String],
        field_names: &[String],
    ) -> PersistenceResult<HashMap<String, PreservedFieldSet>> {
        self.preserved_requests.lock().unwrap().push(keys.len());
        self.maybe_stall("fetch_preserved_fields").await;

        let map = self.records.lock().unwrap();
        let mut out = HashMap::new();
        for key in keys {
            let Some(record) = map.get(&(job_id.to_string(), key.clone())) else {
                continue;
            };
            let mut set = PreservedFieldSet::default();
            for (field, value) in record.preserved.iter() {
                if field_names.contains(field) {
                    set.set(field.clone(), value.clone());
                }
            }
            if !set.is_empty() {
                out.insert(key.clone(), set);
            }
        }
        Ok(out)
    }

    async fn fetch_by_keys(
        &self,
        job_id: &str,
        keys: &[String],
    ) -> PersistenceResult<Vec<CanonicalPropertyRecord>> {
        let map = self.records.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|k| map.get(&(job_id.to_string(), k.clone())).cloned())
            .collect())
    }

    async fn delete_records(&self, job_id: &str, keys: &[String]) -> PersistenceResult<usize> {
        let mut map = self.records.lock().unwrap();
        Ok(keys
            .iter()
            .filter(|k| map.remove(&(job_id.to_string(), (*k).clone())).is_some())
            .count())
    }

    async fn restore_records(&self, records: &[CanonicalPropertyRecord]) -> PersistenceResult<usize> {
        self.seed(records.to_vec());
        Ok(records.len())
    }

    async fn replace_code_table(
        &self,
        job_id: &str,
        table: &CodeDefinitionTable,
    ) -> PersistenceResult<()> {
        self.code_tables
            .lock()
            .unwrap()
            .insert(job_id.to_string(), table.clone());
        Ok(())
    }

    async fn fetch_code_table(&self, job_id: &str) -> PersistenceResult<Option<CodeDefinitionTable>> {
        self.maybe_stall("fetch_code_table").await;
        Ok(self.code_tables.lock().unwrap().get(job_id).cloned())
    }

    async fn append_sale_decisions(
        &self,
        job_id: &str,
        decisions: &[SaleDecisionRecord],
    ) -> PersistenceResult<usize> {
        let mut log = self.decisions.lock().unwrap();
        log.extend(decisions.iter().map(|d| (job_id.to_string(), d.clone())));
        Ok(decisions.len())
    }

    async fn fetch_sale_decisions(
        &self,
        job_id: &str,
    ) -> PersistenceResult<HashMap<String, SaleDecisionRecord>> {
        let log = self.decisions.lock().unwrap();
        Ok(log
            .iter()
            .filter(|(job, _)| job == job_id)
            .map(|(_, d)| (d.composite_key.clone(), d.clone()))
            .collect())
    }
}
