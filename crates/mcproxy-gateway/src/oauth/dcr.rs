//! DCR Client
//!
//! Protocol client for:
//! - RFC 9728 protected resource metadata
//! - RFC 8414 authorization server metadata (with OIDC discovery fallback)
//! - RFC 7591 dynamic client registration
//! - `WWW-Authenticate` challenge parsing
//!
//! No persistence happens here.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::OAuthError;

/// RFC 9728 protected resource metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

/// RFC 8414 authorization server metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

impl AuthServerMetadata {
    /// Check if PKCE S256 is advertised (an empty list is taken as unknown)
    pub fn supports_pkce(&self) -> bool {
        self.code_challenge_methods_supported.is_empty()
            || self.code_challenge_methods_supported.iter().any(|m| m == "S256")
    }
}

/// RFC 7591 client metadata sent at registration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientRegistrationRequest {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ClientRegistrationRequest {
    /// Public client using authorization code + refresh with PKCE
    pub fn public_client(client_name: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            redirect_uris: vec![redirect_uri.into()],
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            scope: None,
        }
    }
}

/// RFC 7591 registration response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id_issued_at: Option<i64>,
    #[serde(default)]
    pub client_secret_expires_at: Option<i64>,
}

/// `{error, error_description}` body returned by OAuth endpoints
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// A parsed `WWW-Authenticate` challenge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WwwAuthenticateChallenge {
    pub scheme: String,
    /// Auth-params with lowercased names
    pub params: BTreeMap<String, String>,
}

impl WwwAuthenticateChallenge {
    pub fn is_bearer(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("bearer")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }

    pub fn as_uri(&self) -> Option<&str> {
        self.param("as_uri")
    }

    pub fn resource_metadata(&self) -> Option<&str> {
        self.param("resource_metadata")
    }

    pub fn error(&self) -> Option<&str> {
        self.param("error")
    }

    pub fn error_description(&self) -> Option<&str> {
        self.param("error_description")
    }

    pub fn scope(&self) -> Option<&str> {
        self.param("scope")
    }

    /// Space-delimited `scope` split into scopes
    pub fn scopes(&self) -> Vec<String> {
        self.scope()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Parse the first challenge of a `WWW-Authenticate` header value
pub fn parse_www_authenticate(header: &str) -> Result<WwwAuthenticateChallenge, OAuthError> {
    let input = header.trim();
    let (scheme, mut rest) = match input.find(|c: char| c.is_ascii_whitespace()) {
        Some(i) => (&input[..i], input[i..].trim_start()),
        None => (input, ""),
    };

    if scheme.is_empty() || scheme.contains('=') || scheme.contains(',') {
        return Err(OAuthError::InvalidRequest(
            "Malformed WWW-Authenticate header".to_string(),
        ));
    }

    let mut params = BTreeMap::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_ascii_whitespace());
        if rest.is_empty() {
            break;
        }

        let key_end = rest
            .find(|c: char| c == '=' || c == ',' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let key = &rest[..key_end];
        let after_key = rest[key_end..].trim_start();

        // A bare token (token68 or the next challenge's scheme) ends this challenge
        let Some(after_eq) = after_key.strip_prefix('=') else {
            break;
        };
        let after_eq = after_eq.trim_start();

        let (value, remaining) = match after_eq.strip_prefix('"') {
            Some(quoted) => parse_quoted(quoted)?,
            None => {
                let end = after_eq
                    .find(|c: char| c == ',' || c.is_ascii_whitespace())
                    .unwrap_or(after_eq.len());
                (after_eq[..end].to_string(), &after_eq[end..])
            }
        };

        if !key.is_empty() {
            params.insert(key.to_ascii_lowercase(), value);
        }
        rest = remaining;
    }

    Ok(WwwAuthenticateChallenge {
        scheme: scheme.to_string(),
        params,
    })
}

// Input starts just after the opening quote
fn parse_quoted(input: &str) -> Result<(String, &str), OAuthError> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            '"' => return Ok((value, &input[i + 1..])),
            other => value.push(other),
        }
    }
    Err(OAuthError::InvalidRequest(
        "Unterminated quoted string in WWW-Authenticate header".to_string(),
    ))
}

/// Well-known URLs for `resource`: path-aware first, then the root document
fn well_known_candidates(resource: &str, suffix: &str) -> Result<Vec<String>, OAuthError> {
    let url = Url::parse(resource)
        .map_err(|e| OAuthError::InvalidRequest(format!("Invalid URL '{}': {}", resource, e)))?;
    let origin = url.origin().ascii_serialization();
    let path = url.path().trim_end_matches('/');

    let mut candidates = Vec::new();
    if !path.is_empty() {
        candidates.push(format!("{}/.well-known/{}{}", origin, suffix, path));
    }
    candidates.push(format!("{}/.well-known/{}", origin, suffix));
    Ok(candidates)
}

/// Protocol client for discovery and registration
#[derive(Debug, Clone, Default)]
pub struct DcrClient {
    http: reqwest::Client,
}

impl DcrClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// GET a JSON document. `Ok(None)` means the document is absent.
    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, OAuthError> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::TemporarilyUnavailable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OAuthError::TemporarilyUnavailable(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }
        if !status.is_success() {
            debug!(url = %url, status = %status, "[DcrClient] Document absent");
            return Ok(None);
        }

        match response.json::<T>().await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) => {
                warn!(url = %url, "[DcrClient] Ignoring malformed metadata: {}", e);
                Ok(None)
            }
        }
    }

    /// RFC 9728 discovery for a resource URL
    pub async fn discover_protected_resource(
        &self,
        resource_url: &str,
    ) -> Result<Option<ProtectedResourceMetadata>, OAuthError> {
        for candidate in well_known_candidates(resource_url, "oauth-protected-resource")? {
            debug!(url = %candidate, "[DcrClient] Trying protected resource metadata");
            if let Some(doc) = self.fetch_json::<ProtectedResourceMetadata>(&candidate).await? {
                info!(
                    url = %candidate,
                    servers = doc.authorization_servers.len(),
                    "[DcrClient] Found protected resource metadata"
                );
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    /// Fetch a protected resource metadata document from an explicit URL
    pub async fn fetch_protected_resource_metadata(
        &self,
        metadata_url: &str,
    ) -> Result<ProtectedResourceMetadata, OAuthError> {
        self.fetch_json(metadata_url).await?.ok_or_else(|| {
            OAuthError::InvalidRequest(format!(
                "No protected resource metadata at {}",
                metadata_url
            ))
        })
    }

    /// RFC 8414 discovery, falling back to OpenID Connect discovery
    pub async fn discover_auth_server(
        &self,
        issuer: &str,
    ) -> Result<AuthServerMetadata, OAuthError> {
        let mut candidates = well_known_candidates(issuer, "oauth-authorization-server")?;
        candidates.push(format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        ));
        for oidc in well_known_candidates(issuer, "openid-configuration")? {
            if !candidates.contains(&oidc) {
                candidates.push(oidc);
            }
        }

        let mut transient = None;
        for candidate in &candidates {
            debug!(url = %candidate, "[DcrClient] Trying authorization server metadata");
            match self.fetch_json::<AuthServerMetadata>(candidate).await {
                Ok(Some(metadata)) => {
                    if !metadata.supports_pkce() {
                        warn!(
                            issuer = %metadata.issuer,
                            "[DcrClient] Server does not advertise S256 PKCE"
                        );
                    }
                    info!(url = %candidate, "[DcrClient] Discovered authorization server");
                    return Ok(metadata);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(url = %candidate, "[DcrClient] {}", e);
                    transient = Some(e);
                }
            }
        }

        Err(transient.unwrap_or_else(|| {
            OAuthError::ServerError(format!(
                "No authorization server metadata found for {}",
                issuer
            ))
        }))
    }

    /// RFC 7591 registration
    pub async fn register_client(
        &self,
        registration_endpoint: &str,
        request: &ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, OAuthError> {
        info!(
            endpoint = %registration_endpoint,
            client_name = %request.client_name,
            "[DcrClient] Registering client"
        );

        let response = self
            .http
            .post(registration_endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                OAuthError::TemporarilyUnavailable(format!("{}: {}", registration_endpoint, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => OAuthError::provider(err.error, err.error_description),
                Err(_) if status.is_server_error() => OAuthError::TemporarilyUnavailable(
                    format!("Registration failed: HTTP {}", status),
                ),
                Err(_) => OAuthError::provider(
                    "invalid_client_metadata",
                    Some(format!("Registration failed: HTTP {}", status)),
                ),
            });
        }

        response.json().await.map_err(|e| {
            OAuthError::ServerError(format!("Malformed registration response: {}", e))
        })
    }
}
