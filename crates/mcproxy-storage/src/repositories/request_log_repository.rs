//! SQLite implementation of RequestLogRepository.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use mcproxy_core::{RequestLogRepository, RequestRecord};
use rusqlite::params;
use tokio::sync::Mutex;

use super::parse_datetime;
use crate::Database;

/// SQLite-backed request observability sink.
pub struct SqliteRequestLogRepository {
    db: Arc<Mutex<Database>>,
}

impl SqliteRequestLogRepository {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RequestLogRepository for SqliteRequestLogRepository {
    async fn append(&self, record: &RequestRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO request_logs (
                organization_id, instance_id, method, tool_name, duration_ms,
                request_bytes, response_bytes, cache_hit, error_code, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.organization_id,
                record.instance_id,
                record.method,
                record.tool_name,
                record.duration_ms as i64,
                record.request_bytes as i64,
                record.response_bytes as i64,
                record.cache_hit,
                record.error_code,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn list_recent(&self, instance_id: &str, limit: usize) -> Result<Vec<RequestRecord>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let mut stmt = conn.prepare(
            "SELECT organization_id, instance_id, method, tool_name, duration_ms,
                    request_bytes, response_bytes, cache_hit, error_code, created_at
             FROM request_logs
             WHERE instance_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )?;

        let records = stmt
            .query_map(params![instance_id, limit as i64], |row| {
                Ok(RequestRecord {
                    organization_id: row.get(0)?,
                    instance_id: row.get(1)?,
                    method: row.get(2)?,
                    tool_name: row.get(3)?,
                    duration_ms: row.get::<_, i64>(4)?.max(0) as u64,
                    request_bytes: row.get::<_, i64>(5)?.max(0) as u64,
                    response_bytes: row.get::<_, i64>(6)?.max(0) as u64,
                    cache_hit: row.get(7)?,
                    error_code: row.get(8)?,
                    created_at: parse_datetime(&row.get::<_, String>(9)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }
}
