//! Core library for addrbook.
//!
//! Provides the authenticated request pipeline used by the front ends:
//! session persistence, bearer authorization, single-flight token renewal,
//! and the login/register/logout/bootstrap operations.

pub mod api;
pub mod auth;
pub mod config;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::Result;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, Envelope, Registration};
pub use auth::{AuthError, RefreshCoordinator, SessionController};
pub use config::Config;
pub use session::{Identity, Session, SessionStore};

/// Wire up an `ApiClient` from configuration.
///
/// The controller starts without a session; call `bootstrap` on it before
/// issuing requests.
pub fn connect(config: &Config) -> Result<ApiClient> {
    let transport = Arc::new(api::HttpTransport::new(
        config.api_base_url.as_str(),
        config.request_timeout(),
    )?);
    let authenticator = Arc::new(api::HttpAuthenticator::new(transport.clone()));
    let controller = Arc::new(SessionController::new(
        config.session_store()?,
        authenticator,
    ));
    Ok(ApiClient::new(transport, controller, config.refresh_timeout()))
}
