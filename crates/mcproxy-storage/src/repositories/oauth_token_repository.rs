//! SQLite implementation of OAuthTokenRepository.
//!
//! Access and refresh tokens are encrypted. Inserting a token supersedes the
//! previously active token for the same (backend, user) in one transaction.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use mcproxy_core::{OAuthTokenRecord, OAuthTokenRepository, TokenKey, TokenStatus};
use rusqlite::{params, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::parse_datetime;
use crate::{Database, FieldEncryptor};

const SELECT_COLUMNS: &str = "SELECT id, backend_id, user_id, client_id, access_token_enc,
        refresh_token_enc, token_type, scope, expires_at, status, created_at
     FROM oauth_tokens";

/// Token row before decryption
struct EncryptedTokenRow {
    id: String,
    backend_id: String,
    user_id: String,
    client_id: String,
    access_token_enc: String,
    refresh_token_enc: Option<String>,
    token_type: String,
    scope: Option<String>,
    expires_at: Option<String>,
    status: String,
    created_at: String,
}

impl EncryptedTokenRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            backend_id: row.get(1)?,
            user_id: row.get(2)?,
            client_id: row.get(3)?,
            access_token_enc: row.get(4)?,
            refresh_token_enc: row.get(5)?,
            token_type: row.get(6)?,
            scope: row.get(7)?,
            expires_at: row.get(8)?,
            status: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

/// SQLite-backed token store.
pub struct SqliteOAuthTokenRepository {
    db: Arc<Mutex<Database>>,
    encryptor: Arc<FieldEncryptor>,
}

impl SqliteOAuthTokenRepository {
    pub fn new(db: Arc<Mutex<Database>>, encryptor: Arc<FieldEncryptor>) -> Self {
        Self { db, encryptor }
    }

    fn decrypt_row(&self, row: EncryptedTokenRow) -> Result<OAuthTokenRecord> {
        let status = TokenStatus::parse(&row.status).unwrap_or_else(|| {
            warn!("[OAuthTokenRepo] Unknown token status '{}', treating as revoked", row.status);
            TokenStatus::Revoked
        });

        Ok(OAuthTokenRecord {
            id: Uuid::parse_str(&row.id)?,
            key: TokenKey::new(row.backend_id, row.user_id),
            client_id: row.client_id,
            access_token: self.encryptor.decrypt(&row.access_token_enc)?,
            refresh_token: self.encryptor.decrypt_opt(row.refresh_token_enc.as_deref())?,
            token_type: row.token_type,
            scope: row.scope,
            expires_at: row.expires_at.as_deref().map(parse_datetime),
            status,
            created_at: parse_datetime(&row.created_at),
        })
    }
}

#[async_trait]
impl OAuthTokenRepository for SqliteOAuthTokenRepository {
    async fn get(&self, id: &Uuid) -> Result<Option<OAuthTokenRecord>> {
        let row = {
            let db = self.db.lock().await;
            db.connection()
                .query_row(
                    &format!("{} WHERE id = ?", SELECT_COLUMNS),
                    params![id.to_string()],
                    EncryptedTokenRow::from_row,
                )
                .optional()?
        };

        row.map(|r| self.decrypt_row(r)).transpose()
    }

    async fn find_active(&self, key: &TokenKey) -> Result<Option<OAuthTokenRecord>> {
        let row = {
            let db = self.db.lock().await;
            db.connection()
                .query_row(
                    &format!(
                        "{} WHERE backend_id = ? AND user_id = ? AND status = 'active'
                         ORDER BY created_at DESC LIMIT 1",
                        SELECT_COLUMNS
                    ),
                    params![key.backend_id, key.user_id],
                    EncryptedTokenRow::from_row,
                )
                .optional()?
        };

        row.map(|r| self.decrypt_row(r)).transpose()
    }

    async fn insert_superseding(&self, token: &OAuthTokenRecord) -> Result<()> {
        let access_enc = self.encryptor.encrypt(&token.access_token)?;
        let refresh_enc = self.encryptor.encrypt_opt(token.refresh_token.as_deref())?;

        let db = self.db.lock().await;
        let superseded = db.transaction(|conn| {
            let superseded = conn.execute(
                "UPDATE oauth_tokens SET status = 'superseded'
                 WHERE backend_id = ? AND user_id = ? AND status = 'active' AND id != ?",
                params![token.key.backend_id, token.key.user_id, token.id.to_string()],
            )?;
            conn.execute(
                "INSERT INTO oauth_tokens (
                    id, backend_id, user_id, client_id, access_token_enc, refresh_token_enc,
                    token_type, scope, expires_at, status, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    token.id.to_string(),
                    token.key.backend_id,
                    token.key.user_id,
                    token.client_id,
                    access_enc,
                    refresh_enc,
                    token.token_type,
                    token.scope,
                    token.expires_at.map(|t| t.to_rfc3339()),
                    token.status.as_str(),
                    token.created_at.to_rfc3339(),
                ],
            )?;
            Ok(superseded)
        })?;

        debug!(
            backend_id = %token.key.backend_id,
            user_id = %token.key.user_id,
            superseded,
            "[OAuthTokenRepo] Stored token"
        );
        Ok(())
    }

    async fn mark_revoked(&self, id: &Uuid) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "UPDATE oauth_tokens SET status = 'revoked' WHERE id = ?",
            params![id.to_string()],
        )?;
        Ok(())
    }
}
