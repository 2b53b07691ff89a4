//! SQLite implementation of InstanceRepository and MembershipRepository.
//!
//! Backends are stored with their registration index (`position`) and their
//! owned tool list in `backend_tools`. Credential blobs are encrypted.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use mcproxy_core::{
    InstanceRepository, MembershipRepository, ServerConfig, ServerInstance, ToolBinding,
    TransportDescriptor,
};
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use super::parse_datetime;
use crate::{Database, FieldEncryptor};

/// SQLite-backed instance and backend configuration store.
pub struct SqliteInstanceRepository {
    db: Arc<Mutex<Database>>,
    encryptor: Arc<FieldEncryptor>,
}

impl SqliteInstanceRepository {
    pub fn new(db: Arc<Mutex<Database>>, encryptor: Arc<FieldEncryptor>) -> Self {
        Self { db, encryptor }
    }

    /// Register `user_id` as a member of `organization_id`, creating the
    /// organization row if needed.
    pub async fn add_member(&self, organization_id: &str, user_id: &str, role: &str) -> Result<()> {
        let db = self.db.lock().await;
        let now = Utc::now().to_rfc3339();

        db.transaction(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO organizations (id, name, created_at) VALUES (?1, ?1, ?2)",
                params![organization_id, now],
            )?;
            conn.execute(
                "INSERT INTO organization_members (organization_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(organization_id, user_id) DO UPDATE SET role = excluded.role",
                params![organization_id, user_id, role, now],
            )?;
            Ok(())
        })
    }
}

#[async_trait]
impl InstanceRepository for SqliteInstanceRepository {
    async fn get(&self, instance_id: &str) -> Result<Option<ServerInstance>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let instance = conn
            .query_row(
                "SELECT id, organization_id, owner_id, name, oauth_enabled, created_at, updated_at
                 FROM server_instances WHERE id = ?",
                params![instance_id],
                |row| {
                    Ok(ServerInstance {
                        id: row.get(0)?,
                        organization_id: row.get(1)?,
                        owner_id: row.get(2)?,
                        name: row.get(3)?,
                        oauth_enabled: row.get(4)?,
                        created_at: parse_datetime(&row.get::<_, String>(5)?),
                        updated_at: parse_datetime(&row.get::<_, String>(6)?),
                    })
                },
            )
            .optional()?;

        Ok(instance)
    }

    async fn list_backends(&self, instance_id: &str) -> Result<Vec<ServerConfig>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let mut stmt = conn.prepare(
            "SELECT id, name, transport_json, credentials_enc, requires_oauth
             FROM backend_servers
             WHERE instance_id = ?
             ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![instance_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tool_stmt = conn.prepare(
            "SELECT name, enabled FROM backend_tools
             WHERE instance_id = ? AND backend_id = ?
             ORDER BY position ASC",
        )?;

        let mut backends = Vec::with_capacity(rows.len());
        for (id, name, transport_json, credentials_enc, requires_oauth) in rows {
            let transport: TransportDescriptor = serde_json::from_str(&transport_json)
                .with_context(|| format!("Invalid transport for backend '{}'", id))?;
            let credentials = self
                .encryptor
                .decrypt_opt(credentials_enc.as_deref())
                .with_context(|| format!("Failed to decrypt credentials for backend '{}'", id))?;

            let tools = tool_stmt
                .query_map(params![instance_id, id], |row| {
                    Ok(ToolBinding {
                        name: row.get(0)?,
                        enabled: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            backends.push(ServerConfig {
                id,
                name,
                tools,
                transport,
                credentials,
                requires_oauth,
            });
        }

        Ok(backends)
    }

    async fn save(&self, instance: &ServerInstance) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute(
            "INSERT INTO server_instances (id, organization_id, owner_id, name, oauth_enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                organization_id = excluded.organization_id,
                owner_id = excluded.owner_id,
                name = excluded.name,
                oauth_enabled = excluded.oauth_enabled,
                updated_at = excluded.updated_at",
            params![
                instance.id,
                instance.organization_id,
                instance.owner_id,
                instance.name,
                instance.oauth_enabled,
                instance.created_at.to_rfc3339(),
                instance.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    async fn save_backend(
        &self,
        instance_id: &str,
        position: u32,
        backend: &ServerConfig,
    ) -> Result<()> {
        let transport_json = serde_json::to_string(&backend.transport)?;
        let credentials_enc = self.encryptor.encrypt_opt(backend.credentials.as_deref())?;
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().await;
        db.transaction(|conn| {
            conn.execute(
                "INSERT INTO backend_servers (
                    id, instance_id, name, position, transport_json, credentials_enc,
                    requires_oauth, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(instance_id, id) DO UPDATE SET
                    name = excluded.name,
                    position = excluded.position,
                    transport_json = excluded.transport_json,
                    credentials_enc = excluded.credentials_enc,
                    requires_oauth = excluded.requires_oauth,
                    updated_at = excluded.updated_at",
                params![
                    backend.id,
                    instance_id,
                    backend.name,
                    position,
                    transport_json,
                    credentials_enc,
                    backend.requires_oauth,
                    now,
                ],
            )?;

            conn.execute(
                "DELETE FROM backend_tools WHERE instance_id = ? AND backend_id = ?",
                params![instance_id, backend.id],
            )?;
            for (index, tool) in backend.tools.iter().enumerate() {
                conn.execute(
                    "INSERT INTO backend_tools (instance_id, backend_id, name, position, enabled)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![instance_id, backend.id, tool.name, index as i64, tool.enabled],
                )?;
            }
            Ok(())
        })
    }

    async fn delete_backend(&self, instance_id: &str, backend_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute(
            "DELETE FROM backend_servers WHERE instance_id = ? AND id = ?",
            params![instance_id, backend_id],
        )?;

        Ok(())
    }
}

#[async_trait]
impl MembershipRepository for SqliteInstanceRepository {
    async fn is_member(&self, user_id: &str, organization_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let found = conn
            .query_row(
                "SELECT 1 FROM organization_members WHERE organization_id = ? AND user_id = ?",
                params![organization_id, user_id],
                |_| Ok(()),
            )
            .optional()?;

        Ok(found.is_some())
    }
}
