//! SQLite implementation of OAuthSessionRepository.
//!
//! Status transitions are a compare-and-set on `status = 'pending'`, so the
//! second of two concurrent callbacks for the same state observes `false`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use mcproxy_core::{OAuthSession, OAuthSessionRepository, SessionStatus};
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{parse_datetime, parse_string_list};
use crate::{Database, FieldEncryptor};

/// SQLite-backed authorization session store.
pub struct SqliteOAuthSessionRepository {
    db: Arc<Mutex<Database>>,
    encryptor: Arc<FieldEncryptor>,
}

impl SqliteOAuthSessionRepository {
    pub fn new(db: Arc<Mutex<Database>>, encryptor: Arc<FieldEncryptor>) -> Self {
        Self { db, encryptor }
    }
}

#[async_trait]
impl OAuthSessionRepository for SqliteOAuthSessionRepository {
    async fn create(&self, session: &OAuthSession) -> Result<()> {
        let verifier_enc = self.encryptor.encrypt(&session.code_verifier)?;
        let scopes = serde_json::to_string(&session.scopes)?;
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO oauth_sessions (
                id, user_id, backend_id, state, code_verifier_enc, code_challenge, redirect_uri,
                scopes_json, status, expires_at, error_code, error_description, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                session.id.to_string(),
                session.user_id,
                session.backend_id,
                session.state,
                verifier_enc,
                session.code_challenge,
                session.redirect_uri,
                scopes,
                session.status.as_str(),
                session.expires_at.to_rfc3339(),
                session.error_code,
                session.error_description,
                session.created_at.to_rfc3339(),
                now,
            ],
        )?;

        Ok(())
    }

    async fn find_by_state(&self, state: &str) -> Result<Option<OAuthSession>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let row = conn
            .query_row(
                "SELECT id, user_id, backend_id, state, code_verifier_enc, code_challenge,
                        redirect_uri, scopes_json, status, expires_at, error_code,
                        error_description, created_at
                 FROM oauth_sessions WHERE state = ?",
                params![state],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, Option<String>>(11)?,
                        row.get::<_, String>(12)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            id,
            user_id,
            backend_id,
            state,
            verifier_enc,
            code_challenge,
            redirect_uri,
            scopes_json,
            status,
            expires_at,
            error_code,
            error_description,
            created_at,
        )) = row
        else {
            return Ok(None);
        };

        let status = SessionStatus::parse(&status).unwrap_or_else(|| {
            warn!("[OAuthSessionRepo] Unknown session status '{}', treating as error", status);
            SessionStatus::Error
        });

        Ok(Some(OAuthSession {
            id: Uuid::parse_str(&id)?,
            user_id,
            backend_id,
            state,
            code_verifier: self.encryptor.decrypt(&verifier_enc)?,
            code_challenge,
            redirect_uri,
            scopes: parse_string_list(&scopes_json),
            status,
            expires_at: parse_datetime(&expires_at),
            error_code,
            error_description,
            created_at: parse_datetime(&created_at),
        }))
    }

    async fn transition(
        &self,
        id: &Uuid,
        status: SessionStatus,
        error_code: Option<&str>,
        error_description: Option<&str>,
    ) -> Result<bool> {
        if !SessionStatus::Pending.can_transition_to(status) {
            anyhow::bail!("Invalid session transition to '{}'", status.as_str());
        }

        let db = self.db.lock().await;
        let changed = db.connection().execute(
            "UPDATE oauth_sessions
             SET status = ?1, error_code = ?2, error_description = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'pending'",
            params![
                status.as_str(),
                error_code,
                error_description,
                Utc::now().to_rfc3339(),
                id.to_string(),
            ],
        )?;

        Ok(changed == 1)
    }
}
