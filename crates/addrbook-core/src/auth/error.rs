use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The server answered with `success: false`
    #[error("{0}")]
    Rejected(String),

    #[error("Unexpected response from server: {0}")]
    Malformed(String),

    #[error(transparent)]
    Api(ApiError),

    #[error("Failed to save session: {0:#}")]
    Storage(anyhow::Error),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Rejected(msg) => AuthError::Rejected(msg),
            ApiError::InvalidResponse(msg) => AuthError::Malformed(msg),
            other => AuthError::Api(other),
        }
    }
}

impl AuthError {
    /// Message suitable for showing on a login or signup form
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Rejected(msg) => msg.clone(),
            AuthError::Malformed(_) => "Unexpected response from server. Please try again.".to_string(),
            AuthError::Api(ApiError::Unauthorized) => "Invalid username or password".to_string(),
            AuthError::Api(ApiError::RateLimited) => {
                "Too many attempts. Please wait a moment and try again.".to_string()
            }
            AuthError::Api(ApiError::Network(e)) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            AuthError::Api(ApiError::Network(_)) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            AuthError::Api(ApiError::ServerError(_)) => {
                "The server ran into a problem. Please try again later.".to_string()
            }
            AuthError::Api(other) => other.to_string(),
            AuthError::Storage(_) => "Could not save your session on this device.".to_string(),
        }
    }
}
