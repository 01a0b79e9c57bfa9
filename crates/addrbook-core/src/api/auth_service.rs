//! Remote authenticator: the four auth operations of the backend.
//!
//! Every operation is a form-encoded POST to the auth endpoint with a
//! `method` field naming the operation. These calls go straight to the
//! transport and never through the refresh pipeline, so a failing renewal
//! cannot recurse into another renewal.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ApiError, ApiRequest, Envelope, Transport};
use crate::session::{Renewal, Session};

/// Default auth endpoint, relative to the API base URL
pub const AUTH_ENDPOINT: &str = "Auth.cfc";

/// Account details for registration
#[derive(Clone)]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("full_name", &self.full_name)
            .field("email", &self.email)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RemoteAuthenticator: Send + Sync {
    /// Exchange credentials for a complete session
    async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError>;

    /// Create an account. Does not log in.
    async fn register(&self, registration: &Registration) -> Result<(), ApiError>;

    /// Obtain a new access token; the refresh token may rotate
    async fn refresh(&self, refresh_token: &str) -> Result<Renewal, ApiError>;

    /// Revoke the refresh token server-side
    async fn logout(&self, refresh_token: &str) -> Result<(), ApiError>;
}

pub struct HttpAuthenticator {
    transport: Arc<dyn Transport>,
    endpoint: String,
}

impl HttpAuthenticator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_endpoint(transport, AUTH_ENDPOINT)
    }

    pub fn with_endpoint(transport: Arc<dyn Transport>, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
        }
    }

    async fn call(&self, method: &str, fields: &[(&str, &str)]) -> Result<Envelope, ApiError> {
        let request = fields.iter().fold(
            ApiRequest::post(self.endpoint.as_str()).form("method", method),
            |request, (key, value)| request.form(*key, *value),
        );

        debug!(method = method, "Calling auth endpoint");
        let response = self.transport.execute(&request).await?.error_for_status()?;
        response.envelope()?.into_result()
    }
}

#[async_trait]
impl RemoteAuthenticator for HttpAuthenticator {
    async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        let envelope = self
            .call("login", &[("username", username), ("password", password)])
            .await?;

        let token = envelope
            .token()
            .ok_or_else(|| ApiError::InvalidResponse("Login response missing token".to_string()))?;
        let refresh_token = envelope.refresh_token.as_deref().unwrap_or_default();

        Session::new(token, refresh_token, envelope.identity()).ok_or_else(|| {
            ApiError::InvalidResponse("Login response missing refresh token".to_string())
        })
    }

    async fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        self.call(
            "register",
            &[
                ("full_name", registration.full_name.as_str()),
                ("email", registration.email.as_str()),
                ("username", registration.username.as_str()),
                ("password", registration.password.as_str()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Renewal, ApiError> {
        let envelope = self
            .call("refreshToken", &[("refreshToken", refresh_token)])
            .await?;

        let access_token = envelope
            .token()
            .ok_or_else(|| ApiError::InvalidResponse("Refresh response missing token".to_string()))?
            .to_string();

        Ok(Renewal {
            access_token,
            refresh_token: envelope
                .refresh_token
                .clone()
                .filter(|t| !t.trim().is_empty()),
            identity: envelope.identity(),
        })
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        self.call("logout", &[("refreshToken", refresh_token)])
            .await?;
        Ok(())
    }
}
