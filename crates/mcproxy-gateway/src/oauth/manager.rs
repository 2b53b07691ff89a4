//! OAuth Manager
//!
//! Drives authentication to one protected backend:
//! discovery -> registration -> PKCE + state -> authorization URL -> callback
//! -> code exchange. Sessions only ever leave `pending`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mcproxy_core::{
    OAuthClient, OAuthClientRepository, OAuthSession, OAuthSessionRepository, RetryPolicy,
    SessionStatus, TokenKey,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::dcr::{
    parse_www_authenticate, AuthServerMetadata, ClientRegistrationRequest, DcrClient,
    WwwAuthenticateChallenge,
};
use super::pkce::{generate_state, PkceChallenge};
use super::{OAuthError, TokenManager};

/// OAuth Manager settings
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    /// Externally reachable gateway URL (redirect URIs are derived from it)
    pub public_url: String,
    pub session_ttl: Duration,
    /// Scopes requested when a challenge names none
    pub scopes: Vec<String>,
    pub client_name: String,
    pub refresh_retry: RetryPolicy,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:45818".to_string(),
            session_ttl: Duration::from_secs(600),
            scopes: Vec::new(),
            client_name: "McProxy Gateway".to_string(),
            refresh_retry: RetryPolicy::default(),
        }
    }
}

/// Result of [`OAuthManager::authenticate`]
#[derive(Clone, PartialEq)]
pub enum AuthenticateOutcome {
    /// A usable token already exists
    Authenticated {
        access_token: String,
        expires_at: Option<DateTime<Utc>>,
    },
    /// The user must visit `authorization_url`
    AuthorizationRequired {
        authorization_url: String,
        session_id: Uuid,
        state: String,
        requires_user_interaction: bool,
    },
}

impl AuthenticateOutcome {
    pub fn authorization_url(&self) -> Option<&str> {
        match self {
            AuthenticateOutcome::AuthorizationRequired {
                authorization_url, ..
            } => Some(authorization_url),
            AuthenticateOutcome::Authenticated { .. } => None,
        }
    }
}

impl std::fmt::Debug for AuthenticateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthenticateOutcome::Authenticated { expires_at, .. } => f
                .debug_struct("Authenticated")
                .field("expires_at", expires_at)
                .finish_non_exhaustive(),
            AuthenticateOutcome::AuthorizationRequired {
                authorization_url,
                session_id,
                requires_user_interaction,
                ..
            } => f
                .debug_struct("AuthorizationRequired")
                .field("authorization_url", authorization_url)
                .field("session_id", session_id)
                .field("requires_user_interaction", requires_user_interaction)
                .finish_non_exhaustive(),
        }
    }
}

/// Query parameters of the authorization redirect
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// A completed authorization
#[derive(Clone)]
pub struct CallbackOutcome {
    pub session_id: Uuid,
    pub backend_id: String,
    pub user_id: String,
    pub token_id: Uuid,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CallbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackOutcome")
            .field("session_id", &self.session_id)
            .field("backend_id", &self.backend_id)
            .field("token_id", &self.token_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Where to send the user, and for which resource
struct IssuerLookup {
    issuer: String,
    resource: Option<String>,
}

/// Removes a state from the in-flight set when dropped
struct InFlight<'a> {
    map: &'a DashMap<String, ()>,
    state: String,
}

impl<'a> InFlight<'a> {
    fn try_acquire(map: &'a DashMap<String, ()>, state: &str) -> Option<Self> {
        match map.entry(state.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    map,
                    state: state.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.state);
    }
}

fn short(state: &str) -> String {
    state.chars().take(8).collect()
}

pub struct OAuthManager {
    dcr: DcrClient,
    clients: Arc<dyn OAuthClientRepository>,
    sessions: Arc<dyn OAuthSessionRepository>,
    token_manager: Arc<TokenManager>,
    settings: OAuthSettings,
    in_flight: DashMap<String, ()>,
}

impl OAuthManager {
    pub fn new(
        dcr: DcrClient,
        clients: Arc<dyn OAuthClientRepository>,
        sessions: Arc<dyn OAuthSessionRepository>,
        token_manager: Arc<TokenManager>,
        settings: OAuthSettings,
    ) -> Self {
        Self {
            dcr,
            clients,
            sessions,
            token_manager,
            settings,
            in_flight: DashMap::new(),
        }
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.token_manager
    }

    /// Redirect URI registered for `backend_id`
    pub fn redirect_uri(&self, backend_id: &str) -> String {
        format!(
            "{}/oauth/callback/{}",
            self.settings.public_url.trim_end_matches('/'),
            backend_id
        )
    }

    /// Return a usable token or start an authorization
    pub async fn authenticate(
        &self,
        backend_id: &str,
        user_id: &str,
        backend_url: &str,
        challenge: Option<&WwwAuthenticateChallenge>,
    ) -> Result<AuthenticateOutcome, OAuthError> {
        let key = TokenKey::new(backend_id, user_id);
        if let Some(token) = self.token_manager.get_valid_record(&key).await? {
            debug!(backend_id = %backend_id, "[OAuth] Using stored token");
            return Ok(AuthenticateOutcome::Authenticated {
                access_token: token.access_token,
                expires_at: token.expires_at,
            });
        }

        self.begin_authorization(backend_id, user_id, backend_url, challenge)
            .await
    }

    /// React to a `WWW-Authenticate` header returned by a backend.
    ///
    /// Only `Bearer` is supported; anything else fails before any network call.
    pub async fn handle_www_authenticate_challenge(
        &self,
        header: &str,
        backend_id: &str,
        user_id: &str,
        backend_url: &str,
    ) -> Result<AuthenticateOutcome, OAuthError> {
        let challenge = parse_www_authenticate(header)?;
        if !challenge.is_bearer() {
            return Err(OAuthError::UnsupportedScheme(challenge.scheme));
        }

        // The backend rejected whatever we sent, so a stored token is only
        // useful if it can be refreshed
        let key = TokenKey::new(backend_id, user_id);
        if challenge.error() == Some("invalid_token") {
            if let Some(record) = self.token_manager.find_refreshable(&key).await? {
                match self.refresh(&record.id).await {
                    Ok(refreshed) => {
                        return Ok(AuthenticateOutcome::Authenticated {
                            access_token: refreshed.access_token,
                            expires_at: refreshed.expires_at,
                        })
                    }
                    Err(e) => warn!(
                        backend_id = %backend_id,
                        "[OAuth] Refresh after challenge failed: {}",
                        e
                    ),
                }
            }
            return self
                .begin_authorization(backend_id, user_id, backend_url, Some(&challenge))
                .await;
        }

        self.authenticate(backend_id, user_id, backend_url, Some(&challenge))
            .await
    }

    async fn begin_authorization(
        &self,
        backend_id: &str,
        user_id: &str,
        backend_url: &str,
        challenge: Option<&WwwAuthenticateChallenge>,
    ) -> Result<AuthenticateOutcome, OAuthError> {
        if let Some(challenge) = challenge {
            if !challenge.is_bearer() {
                return Err(OAuthError::UnsupportedScheme(challenge.scheme.clone()));
            }
        }

        let lookup = self.resolve_issuer(backend_url, challenge).await?;
        info!(backend_id = %backend_id, issuer = %lookup.issuer, "[OAuth] Starting authorization");

        let metadata = self.dcr.discover_auth_server(&lookup.issuer).await?;
        let redirect_uri = self.redirect_uri(backend_id);

        let scopes = match challenge.map(|c| c.scopes()) {
            Some(scopes) if !scopes.is_empty() => scopes,
            _ => self.settings.scopes.clone(),
        };

        let client = self
            .ensure_client(backend_id, &metadata, &redirect_uri, &scopes)
            .await?;

        let pkce = PkceChallenge::generate();
        let state = generate_state();
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.settings.session_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));

        let session = OAuthSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            backend_id: backend_id.to_string(),
            state: state.clone(),
            code_verifier: pkce.verifier.clone(),
            code_challenge: pkce.challenge.clone(),
            redirect_uri: redirect_uri.clone(),
            scopes: scopes.clone(),
            status: SessionStatus::Pending,
            expires_at: now + ttl,
            error_code: None,
            error_description: None,
            created_at: now,
        };
        self.sessions.create(&session).await?;

        let resource = lookup.resource.as_deref().unwrap_or(backend_url);
        let authorization_url = build_authorization_url(
            &client.authorization_endpoint,
            &client.client_id,
            &redirect_uri,
            &scopes,
            &state,
            &pkce,
            resource,
        )?;

        info!(
            backend_id = %backend_id,
            state = %short(&state),
            "[OAuth] Authorization URL issued"
        );

        Ok(AuthenticateOutcome::AuthorizationRequired {
            authorization_url,
            session_id: session.id,
            state,
            requires_user_interaction: true,
        })
    }

    async fn resolve_issuer(
        &self,
        backend_url: &str,
        challenge: Option<&WwwAuthenticateChallenge>,
    ) -> Result<IssuerLookup, OAuthError> {
        if let Some(challenge) = challenge {
            if let Some(as_uri) = challenge.as_uri() {
                debug!(issuer = %as_uri, "[OAuth] Issuer from challenge as_uri");
                return Ok(IssuerLookup {
                    issuer: as_uri.to_string(),
                    resource: None,
                });
            }
            if let Some(metadata_url) = challenge.resource_metadata() {
                let prm = self
                    .dcr
                    .fetch_protected_resource_metadata(metadata_url)
                    .await?;
                if let Some(issuer) = prm.authorization_servers.first() {
                    debug!(issuer = %issuer, "[OAuth] Issuer from challenge resource_metadata");
                    return Ok(IssuerLookup {
                        issuer: issuer.clone(),
                        resource: Some(prm.resource.clone()),
                    });
                }
                warn!(
                    url = %metadata_url,
                    "[OAuth] Resource metadata lists no authorization servers"
                );
            }
        }

        if let Some(prm) = self.dcr.discover_protected_resource(backend_url).await? {
            if let Some(issuer) = prm.authorization_servers.first() {
                debug!(issuer = %issuer, "[OAuth] Issuer from protected resource discovery");
                return Ok(IssuerLookup {
                    issuer: issuer.clone(),
                    resource: Some(prm.resource.clone()),
                });
            }
        }

        let url = Url::parse(backend_url).map_err(|e| {
            OAuthError::InvalidRequest(format!("Invalid backend URL '{}': {}", backend_url, e))
        })?;
        let origin = url.origin().ascii_serialization();
        debug!(issuer = %origin, "[OAuth] Falling back to backend origin as issuer");
        Ok(IssuerLookup {
            issuer: origin,
            resource: None,
        })
    }

    /// Stored registration for `backend_id`, registering one if absent
    async fn ensure_client(
        &self,
        backend_id: &str,
        metadata: &AuthServerMetadata,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<OAuthClient, OAuthError> {
        if let Some(client) = self.clients.get(backend_id).await? {
            if !client.matches_redirect_uri(redirect_uri) {
                warn!(
                    backend_id = %backend_id,
                    "[OAuth] Stored registration does not list the current redirect URI"
                );
            }
            return Ok(client);
        }

        let registration_endpoint = metadata.registration_endpoint.as_deref().ok_or_else(|| {
            OAuthError::ServerError(format!(
                "Authorization server {} does not support dynamic client registration",
                metadata.issuer
            ))
        })?;

        let mut request =
            ClientRegistrationRequest::public_client(&self.settings.client_name, redirect_uri);
        if !scopes.is_empty() {
            request.scope = Some(scopes.join(" "));
        }
        let response = self
            .dcr
            .register_client(registration_endpoint, &request)
            .await?;

        let now = Utc::now();
        let client = OAuthClient {
            backend_id: backend_id.to_string(),
            client_id: response.client_id,
            client_secret: response.client_secret,
            issuer: metadata.issuer.clone(),
            authorization_endpoint: metadata.authorization_endpoint.clone(),
            token_endpoint: metadata.token_endpoint.clone(),
            registration_endpoint: metadata.registration_endpoint.clone(),
            revocation_endpoint: metadata.revocation_endpoint.clone(),
            grant_types: if response.grant_types.is_empty() {
                request.grant_types.clone()
            } else {
                response.grant_types
            },
            response_types: if response.response_types.is_empty() {
                request.response_types.clone()
            } else {
                response.response_types
            },
            scopes: scopes.to_vec(),
            redirect_uris: if response.redirect_uris.is_empty() {
                request.redirect_uris.clone()
            } else {
                response.redirect_uris
            },
            created_at: now,
            updated_at: now,
        };
        self.clients.save(&client).await?;

        info!(backend_id = %backend_id, issuer = %client.issuer, "[OAuth] Registered client");
        Ok(client)
    }

    /// Complete an authorization from the redirect's query parameters
    pub async fn handle_callback(
        &self,
        params: &CallbackParams,
    ) -> Result<CallbackOutcome, OAuthError> {
        if let Some(error) = &params.error {
            info!(error = %error, "[OAuth] Authorization denied by provider");
            return Err(OAuthError::provider(
                error.clone(),
                params.error_description.clone(),
            ));
        }

        let state = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing state parameter".to_string()))?;
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing code parameter".to_string()))?;

        let Some(_in_flight) = InFlight::try_acquire(&self.in_flight, state) else {
            warn!(state = %short(state), "[OAuth] Duplicate callback in flight");
            return Err(OAuthError::InvalidState);
        };

        let session = self
            .sessions
            .find_by_state(state)
            .await?
            .ok_or(OAuthError::InvalidState)?;

        let now = Utc::now();
        if session.is_expired_at(now) {
            if session.status == SessionStatus::Pending {
                self.sessions
                    .transition(&session.id, SessionStatus::Expired, Some("session_expired"), None)
                    .await?;
            }
            info!(state = %short(state), "[OAuth] Callback for expired session");
            return Err(OAuthError::SessionExpired);
        }
        if session.status != SessionStatus::Pending {
            return Err(OAuthError::InvalidState);
        }

        let client = match self.clients.get(&session.backend_id).await? {
            Some(client) => client,
            None => {
                let err = OAuthError::ServerError(format!(
                    "No client registration for backend {}",
                    session.backend_id
                ));
                self.fail_session(&session, &err).await;
                return Err(err);
            }
        };

        let token = match self
            .token_manager
            .exchange_code(
                &client,
                code,
                &session.redirect_uri,
                &session.code_verifier,
                &session.user_id,
            )
            .await
        {
            Ok(token) => token,
            Err(err) => {
                warn!(state = %short(state), "[OAuth] Code exchange failed: {}", err);
                self.fail_session(&session, &err).await;
                return Err(err);
            }
        };

        let completed = self
            .sessions
            .transition(&session.id, SessionStatus::Completed, None, None)
            .await?;
        if !completed {
            return Err(OAuthError::InvalidState);
        }

        info!(
            backend_id = %session.backend_id,
            state = %short(state),
            "[OAuth] Authorization completed"
        );
        Ok(CallbackOutcome {
            session_id: session.id,
            backend_id: session.backend_id,
            user_id: session.user_id,
            token_id: token.id,
            access_token: token.access_token,
            expires_at: token.expires_at,
        })
    }

    async fn fail_session(&self, session: &OAuthSession, err: &OAuthError) {
        let description = err.description();
        if let Err(e) = self
            .sessions
            .transition(
                &session.id,
                SessionStatus::Error,
                Some(err.code()),
                Some(&description),
            )
            .await
        {
            warn!(session_id = %session.id, "[OAuth] Failed to record session error: {:#}", e);
        }
    }

    /// Refresh with the fixed retry policy
    pub async fn refresh(
        &self,
        token_id: &Uuid,
    ) -> Result<mcproxy_core::OAuthTokenRecord, OAuthError> {
        self.token_manager
            .refresh_token(token_id, Some(self.settings.refresh_retry))
            .await
    }

    /// Best-effort revocation; never retried
    pub async fn revoke(&self, token_id: &Uuid) -> Result<(), OAuthError> {
        self.token_manager.revoke_token(token_id).await
    }

    /// Forget the registration so the next authenticate re-registers
    pub async fn invalidate_client(&self, backend_id: &str) -> Result<(), OAuthError> {
        self.clients.delete(backend_id).await?;
        info!(backend_id = %backend_id, "[OAuth] Client registration invalidated");
        Ok(())
    }
}

/// Authorization code request URL (RFC 6749 + PKCE + RFC 8707 `resource`)
pub fn build_authorization_url(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    pkce: &PkceChallenge,
    resource: &str,
) -> Result<String, OAuthError> {
    let mut url = Url::parse(authorization_endpoint).map_err(|e| {
        OAuthError::ServerError(format!(
            "Invalid authorization endpoint '{}': {}",
            authorization_endpoint, e
        ))
    })?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", client_id);
        query.append_pair("redirect_uri", redirect_uri);
        if !scopes.is_empty() {
            query.append_pair("scope", &scopes.join(" "));
        }
        query.append_pair("state", state);
        query.append_pair("code_challenge", &pkce.challenge);
        query.append_pair("code_challenge_method", pkce.method);
        query.append_pair("resource", resource);
    }

    Ok(url.to_string())
}
