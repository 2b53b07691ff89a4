//! McProxy Storage Layer
//!
//! SQLite database with field-level encryption for sensitive data.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Gateway                         │
//! ├──────────────────────────────────────────────────────┤
//! │        Repository Traits (mcproxy-core)              │
//! │  (InstanceRepository, OAuthTokenRepository, etc.)    │
//! ├──────────────────────────────────────────────────────┤
//! │            SQLite Implementations                    │
//! │ (SqliteInstanceRepository, SqliteOAuthTokenRepo...)  │
//! ├──────────────────────────────────────────────────────┤
//! │         FieldEncryptor (AES-256-GCM)                 │
//! │  (credential blobs, client secrets, tokens)          │
//! ├──────────────────────────────────────────────────────┤
//! │                   Database                           │
//! │                   (SQLite)                           │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use mcproxy_storage::{Database, FieldEncryptor, SqliteInstanceRepository};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! let db = Arc::new(Mutex::new(Database::open(&path)?));
//! let encryptor = Arc::new(FieldEncryptor::from_hex(&master_key_hex)?);
//! let instances = SqliteInstanceRepository::new(db.clone(), encryptor.clone());
//! ```

pub mod crypto;
mod database;
mod repositories;

pub use crypto::{generate_master_key, parse_master_key, FieldEncryptor, KEY_SIZE};
pub use database::Database;
pub use repositories::*;

/// Default database file name.
pub const DATABASE_FILE: &str = "mcproxy.db";

/// Get the default database path for the current platform.
pub fn default_database_path() -> Option<std::path::PathBuf> {
    dirs::data_local_dir().map(|p| p.join("mcproxy").join(DATABASE_FILE))
}
