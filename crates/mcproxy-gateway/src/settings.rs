//! Gateway settings
//!
//! Read from `MCPROXY_*` environment variables (after `.env` is loaded).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use mcproxy_core::RetryPolicy;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MCPROXY_";

/// Default gateway port
pub const DEFAULT_PORT: u16 = 45818;

/// Gateway settings
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Authorization server advertised in the well-known documents
    pub issuer_url: Option<String>,
    /// Externally reachable base URL (OAuth redirect URIs are derived from it)
    pub public_url: String,
    /// Protected resource identifier; defaults to `{public_url}/mcp`
    pub resource_url: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub config_cache_ttl: Duration,
    pub tools_cache_ttl: Duration,
    pub oauth_session_ttl: Duration,
    /// Scopes requested from backend authorization servers
    pub oauth_scopes: Vec<String>,
    pub pool_max_idle: usize,
    /// Enable CORS for browser access
    pub enable_cors: bool,
    pub database_path: Option<PathBuf>,
    /// Hex-encoded 32-byte master key for field encryption
    pub master_key: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            issuer_url: None,
            public_url: format!("http://localhost:{}", DEFAULT_PORT),
            resource_url: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
            config_cache_ttl: Duration::from_secs(30),
            tools_cache_ttl: Duration::from_secs(300),
            oauth_session_ttl: Duration::from_secs(600),
            oauth_scopes: Vec::new(),
            pool_max_idle: 64,
            enable_cors: true,
            database_path: None,
            master_key: None,
            log_dir: None,
        }
    }
}

impl GatewaySettings {
    /// Load settings from the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self> {
        // Missing .env is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup (names include the prefix).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| -> Option<String> {
            lookup(&format!("{}{}", ENV_PREFIX, key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Self::default();
        let port = parse_or(&var, "PORT", defaults.port)?;
        let retry_attempts = parse_or(&var, "RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        let retry_delay_ms = parse_or(
            &var,
            "RETRY_DELAY_MS",
            defaults.retry.delay.as_millis() as u64,
        )?;

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port,
            issuer_url: var("ISSUER_URL").map(trim_slash),
            public_url: var("PUBLIC_URL")
                .map(trim_slash)
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            resource_url: var("RESOURCE_URL").map(trim_slash),
            request_timeout: secs_or(&var, "REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            connect_timeout: secs_or(&var, "CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            retry: RetryPolicy::new(retry_attempts, Duration::from_millis(retry_delay_ms)),
            config_cache_ttl: secs_or(&var, "CONFIG_CACHE_TTL_SECS", defaults.config_cache_ttl)?,
            tools_cache_ttl: secs_or(&var, "TOOLS_CACHE_TTL_SECS", defaults.tools_cache_ttl)?,
            oauth_session_ttl: secs_or(
                &var,
                "OAUTH_SESSION_TTL_SECS",
                defaults.oauth_session_ttl,
            )?,
            oauth_scopes: var("OAUTH_SCOPES")
                .map(|s| {
                    s.split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            pool_max_idle: parse_or(&var, "POOL_MAX_IDLE", defaults.pool_max_idle)?,
            enable_cors: parse_bool_or(&var, "ENABLE_CORS", defaults.enable_cors)?,
            database_path: var("DATABASE_PATH").map(PathBuf::from),
            master_key: var("MASTER_KEY"),
            log_dir: var("LOG_DIR").map(PathBuf::from),
        })
    }

    /// Get the socket address
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Resource identifier for the whole gateway, or for one instance
    pub fn resource_for(&self, instance_id: Option<&str>) -> String {
        let base = self
            .resource_url
            .clone()
            .unwrap_or_else(|| format!("{}/mcp", self.public_url));
        match instance_id {
            Some(id) => format!("{}/{}", base, id),
            None => base,
        }
    }
}

fn trim_slash(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.parse::<T>().map_err(|e| {
            anyhow::anyhow!("Invalid value for {}{}: '{}' ({})", ENV_PREFIX, key, raw, e)
        }),
        None => Ok(default),
    }
}

fn secs_or<F>(var: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, key, default.as_secs()).map(Duration::from_secs)
}

fn parse_bool_or<F>(var: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => anyhow::bail!("Invalid value for {}{}: '{}'", ENV_PREFIX, key, v),
    }
}
