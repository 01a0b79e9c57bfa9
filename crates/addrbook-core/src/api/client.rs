//! API client for performing authenticated requests.
//!
//! Every call goes through the same pipeline: attach the current access
//! token, execute, and on a `401` hand the request to the refresh
//! coordinator, which either returns it re-authorized for a single replay
//! or fails it.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{ApiError, ApiRequest, ApiResponse, Envelope, Transport};
use crate::auth::{authorize, RefreshCoordinator, SessionController};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Clone is cheap - all state is shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    controller: Arc<SessionController>,
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        controller: Arc<SessionController>,
        refresh_timeout: Duration,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(Arc::clone(&controller), refresh_timeout);
        Self {
            transport,
            controller,
            coordinator,
        }
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Perform an authenticated request.
    ///
    /// Succeeds with any 2xx response. An expired token is renewed and the
    /// request replayed at most once.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut request = authorize(request, self.controller.current().as_ref());
        loop {
            match self.execute(&request).await {
                Err(e) if e.is_unauthorized() => {
                    request = self.coordinator.recover(&request).await?;
                    debug!(path = %request.path, "Replaying request");
                }
                result => return result,
            }
        }
    }

    /// Perform an authenticated request and unwrap the response envelope.
    /// `success: false` surfaces as `ApiError::Rejected`.
    pub async fn call(&self, request: ApiRequest) -> Result<Envelope, ApiError> {
        self.send(request).await?.envelope()?.into_result()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    /// Execute once, backing off on rate limits. Non-2xx statuses become errors.
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.transport.execute(request).await?;
            if response.status.as_u16() != 429 {
                return response.error_for_status();
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(
                path = %request.path,
                retry = retries,
                backoff_ms = backoff_ms,
                "Rate limited, backing off"
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2; // Exponential backoff
        }
    }
}
