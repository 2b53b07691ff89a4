//! Content hash of resolved backend configuration
//!
//! SHA-256 over a canonical JSON projection. Maps in the domain types are
//! `BTreeMap`s, so serialization order is stable. `Authorization` headers
//! (injected tokens) are excluded so that a token refresh does not invalidate
//! cached tool lists. Credential blobs are included.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use mcproxy_core::{ServerConfig, ToolBinding, TransportDescriptor};

#[derive(Serialize)]
struct HashedBackend<'a> {
    id: &'a str,
    name: &'a str,
    tools: &'a [ToolBinding],
    transport: HashedTransport<'a>,
    credentials: Option<&'a str>,
    requires_oauth: bool,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HashedTransport<'a> {
    Stdio {
        command: &'a str,
        args: &'a [String],
        env: &'a BTreeMap<String, String>,
    },
    Http {
        url: &'a str,
        headers: BTreeMap<&'a str, &'a str>,
    },
}

impl<'a> From<&'a ServerConfig> for HashedBackend<'a> {
    fn from(config: &'a ServerConfig) -> Self {
        let transport = match &config.transport {
            TransportDescriptor::Stdio { command, args, env } => HashedTransport::Stdio {
                command,
                args,
                env,
            },
            TransportDescriptor::Http { url, headers } => HashedTransport::Http {
                url,
                headers: headers
                    .iter()
                    .filter(|(k, _)| !k.eq_ignore_ascii_case("authorization"))
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect(),
            },
        };

        Self {
            id: &config.id,
            name: &config.name,
            tools: &config.tools,
            transport,
            credentials: config.credentials.as_deref(),
            requires_oauth: config.requires_oauth,
        }
    }
}

fn digest<T: Serialize>(value: &T) -> String {
    // Serializing these borrowed structs cannot fail (string keys only)
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Hash of an instance's ordered backend list
pub fn content_hash(backends: &[ServerConfig]) -> String {
    let projection: Vec<HashedBackend<'_>> = backends.iter().map(HashedBackend::from).collect();
    digest(&projection)
}

/// Hash of a single backend, used to detect stale pooled connections
pub fn backend_fingerprint(config: &ServerConfig) -> String {
    digest(&HashedBackend::from(config))
}
