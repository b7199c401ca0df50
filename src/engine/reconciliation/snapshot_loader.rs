// ==========================================
// CAMA 导入引擎 - 历史快照分页加载
// ==========================================
// 规则: 固定页大小顺序读取，页间等待，短页即结束
// 规则: 同一 key 出现多次时保留第一次（最近上传）
// ==========================================

use crate::domain::property::CanonicalPropertyRecord;
use crate::repository::error::{PersistenceError, PersistenceResult};
use crate::repository::property_gateway::PersistenceGateway;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPaging {
    pub page_size: usize,
    pub page_delay: Duration,
    /// 单页读取超时
    pub api_timeout: Duration,
}

/// 加载 job 的全部已存记录，按 composite key 索引
pub async fn load_snapshot(
    gateway: &dyn PersistenceGateway,
    job_id: &str,
    paging: SnapshotPaging,
) -> PersistenceResult<HashMap<String, CanonicalPropertyRecord>> {
    let page_size = paging.page_size.max(1);
    let mut snapshot: HashMap<String, CanonicalPropertyRecord> = HashMap::new();
    let mut offset = 0usize;
    let mut pages = 0usize;

    loop {
        let page = tokio::time::timeout(
            paging.api_timeout,
            gateway.fetch_page(job_id, offset, page_size),
        )
        .await
        .map_err(|_| PersistenceError::timeout("fetch_page", paging.api_timeout.as_millis() as u64))??;

        let len = page.len();
        pages += 1;
        for record in page {
            snapshot
                .entry(record.composite_key.clone())
                .or_insert(record);
        }
        debug!(job_id, offset, len, "快照分页已加载");

        if len < page_size {
            break;
        }
        offset += len;
        if !paging.page_delay.is_zero() {
            tokio::time::sleep(paging.page_delay).await;
        }
    }

    info!(job_id, pages, records = snapshot.len(), "历史快照加载完成");
    Ok(snapshot)
}
