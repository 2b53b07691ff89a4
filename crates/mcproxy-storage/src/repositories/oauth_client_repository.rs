//! SQLite implementation of OAuthClientRepository.
//!
//! One DCR registration per backend. Client secrets are encrypted.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use mcproxy_core::{OAuthClient, OAuthClientRepository};
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use super::{parse_datetime, parse_string_list};
use crate::{Database, FieldEncryptor};

/// SQLite-backed outbound OAuth client store.
pub struct SqliteOAuthClientRepository {
    db: Arc<Mutex<Database>>,
    encryptor: Arc<FieldEncryptor>,
}

impl SqliteOAuthClientRepository {
    pub fn new(db: Arc<Mutex<Database>>, encryptor: Arc<FieldEncryptor>) -> Self {
        Self { db, encryptor }
    }
}

#[async_trait]
impl OAuthClientRepository for SqliteOAuthClientRepository {
    async fn get(&self, backend_id: &str) -> Result<Option<OAuthClient>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let row = conn
            .query_row(
                "SELECT backend_id, client_id, client_secret_enc, issuer, authorization_endpoint,
                        token_endpoint, registration_endpoint, revocation_endpoint,
                        grant_types_json, response_types_json, scopes_json, redirect_uris_json,
                        created_at, updated_at
                 FROM oauth_clients WHERE backend_id = ?",
                params![backend_id],
                |row| {
                    Ok((
                        OAuthClient {
                            backend_id: row.get(0)?,
                            client_id: row.get(1)?,
                            client_secret: None,
                            issuer: row.get(3)?,
                            authorization_endpoint: row.get(4)?,
                            token_endpoint: row.get(5)?,
                            registration_endpoint: row.get(6)?,
                            revocation_endpoint: row.get(7)?,
                            grant_types: parse_string_list(&row.get::<_, String>(8)?),
                            response_types: parse_string_list(&row.get::<_, String>(9)?),
                            scopes: parse_string_list(&row.get::<_, String>(10)?),
                            redirect_uris: parse_string_list(&row.get::<_, String>(11)?),
                            created_at: parse_datetime(&row.get::<_, String>(12)?),
                            updated_at: parse_datetime(&row.get::<_, String>(13)?),
                        },
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((mut client, secret_enc)) => {
                client.client_secret = self.encryptor.decrypt_opt(secret_enc.as_deref())?;
                Ok(Some(client))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, client: &OAuthClient) -> Result<()> {
        let secret_enc = self.encryptor.encrypt_opt(client.client_secret.as_deref())?;
        let grant_types = serde_json::to_string(&client.grant_types)?;
        let response_types = serde_json::to_string(&client.response_types)?;
        let scopes = serde_json::to_string(&client.scopes)?;
        let redirect_uris = serde_json::to_string(&client.redirect_uris)?;

        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute(
            "INSERT INTO oauth_clients (
                backend_id, client_id, client_secret_enc, issuer, authorization_endpoint,
                token_endpoint, registration_endpoint, revocation_endpoint,
                grant_types_json, response_types_json, scopes_json, redirect_uris_json,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(backend_id) DO UPDATE SET
                client_id = excluded.client_id,
                client_secret_enc = excluded.client_secret_enc,
                issuer = excluded.issuer,
                authorization_endpoint = excluded.authorization_endpoint,
                token_endpoint = excluded.token_endpoint,
                registration_endpoint = excluded.registration_endpoint,
                revocation_endpoint = excluded.revocation_endpoint,
                grant_types_json = excluded.grant_types_json,
                response_types_json = excluded.response_types_json,
                scopes_json = excluded.scopes_json,
                redirect_uris_json = excluded.redirect_uris_json,
                updated_at = excluded.updated_at",
            params![
                client.backend_id,
                client.client_id,
                secret_enc,
                client.issuer,
                client.authorization_endpoint,
                client.token_endpoint,
                client.registration_endpoint,
                client.revocation_endpoint,
                grant_types,
                response_types,
                scopes,
                redirect_uris,
                client.created_at.to_rfc3339(),
                client.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    async fn delete(&self, backend_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "DELETE FROM oauth_clients WHERE backend_id = ?",
            params![backend_id],
        )?;
        Ok(())
    }
}
