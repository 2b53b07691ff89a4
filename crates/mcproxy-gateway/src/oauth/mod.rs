//! Outbound OAuth 2.1
//!
//! The gateway acting as OAuth client of protected backends:
//! - `dcr` - discovery, dynamic registration, `WWW-Authenticate` parsing
//! - `token_manager` - token persistence, refresh and revocation
//! - `manager` - the authorization state machine

mod dcr;
mod error;
mod manager;
mod pkce;
mod token;
mod token_manager;

pub use dcr::{
    parse_www_authenticate, AuthServerMetadata, ClientRegistrationRequest,
    ClientRegistrationResponse, DcrClient, ProtectedResourceMetadata, WwwAuthenticateChallenge,
};
pub use error::{OAuthError, OAuthErrorBody};
pub use manager::{
    build_authorization_url, AuthenticateOutcome, CallbackOutcome, CallbackParams, OAuthManager,
    OAuthSettings,
};
pub use pkce::{generate_state, PkceChallenge};
pub use token::{TokenError, TokenResponse};
pub use token_manager::TokenManager;
