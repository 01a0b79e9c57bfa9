//! Single-flight renewal of expired access tokens.
//!
//! When an authorized call comes back `401`, the coordinator either starts
//! a renewal episode or joins the one already running. Every request that
//! joined an episode is handed back re-authorized with the new token once
//! the renewal settles, or fails with `ApiError::SessionExpired` if it
//! could not be renewed. Only one renewal call is outstanding at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{authorize, SessionController};
use crate::api::{ApiError, ApiRequest};
use crate::session::Session;

/// Default upper bound on a single renewal call
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
enum Outcome {
    Renewed(Session),
    Expired,
}

enum Step {
    Wait(watch::Receiver<Option<Outcome>>),
    /// The session already moved past the request's token
    Replay(Session),
    NoSession,
}

enum State {
    Idle,
    /// Receivers resolve to `Some(outcome)` when the episode settles
    Refreshing(watch::Receiver<Option<Outcome>>),
}

struct Inner {
    controller: Arc<SessionController>,
    state: Mutex<State>,
    refresh_timeout: Duration,
}

/// Clone is cheap and shares the episode state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(controller: Arc<SessionController>, refresh_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                controller,
                state: Mutex::new(State::Idle),
                refresh_timeout,
            }),
        }
    }

    /// Whether a renewal call is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.lock_state(), State::Refreshing(_))
    }

    /// Handle a `401` for `request`.
    ///
    /// Returns the request to replay, re-authorized and marked as retried.
    /// A request that was already retried is never replayed again.
    pub async fn recover(&self, request: &ApiRequest) -> Result<ApiRequest, ApiError> {
        if request.is_retried() {
            debug!(path = %request.path, "Retried request rejected again, giving up");
            return Err(ApiError::Unauthorized);
        }

        let mut outcome = match self.join_or_start(request) {
            Step::Wait(rx) => rx,
            Step::Replay(current) => {
                debug!(path = %request.path, "Request used a superseded token, replaying");
                return Ok(authorize(request.clone().mark_retried(), Some(&current)));
            }
            Step::NoSession => {
                debug!(path = %request.path, "Unauthorized with no session to renew");
                self.inner.controller.expire();
                return Err(ApiError::Unauthorized);
            }
        };
        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map(|value| value.clone())
            .ok()
            .flatten();

        match settled {
            Some(Outcome::Renewed(session)) => {
                debug!(path = %request.path, "Resuming request with renewed token");
                Ok(authorize(request.clone().mark_retried(), Some(&session)))
            }
            Some(Outcome::Expired) => Err(ApiError::SessionExpired),
            None => {
                warn!(path = %request.path, "Renewal ended without an outcome");
                Err(ApiError::Unauthorized)
            }
        }
    }

    /// Decide under the state lock, so an episode cannot settle between
    /// reading the session and starting a renewal.
    fn join_or_start(&self, request: &ApiRequest) -> Step {
        let mut state = self.inner.lock_state();
        if let State::Refreshing(ref rx) = *state {
            debug!("Joining in-flight renewal");
            return Step::Wait(rx.clone());
        }

        // Idle: whatever the last episode did is already in the session
        let Some(current) = self.inner.controller.current() else {
            return Step::NoSession;
        };
        // An episode already replaced the token this request carried
        if request.bearer.as_deref() != Some(current.access_token()) {
            return Step::Replay(current);
        }

        let (tx, rx) = watch::channel(None);
        *state = State::Refreshing(rx.clone());
        drop(state);

        // Spawned so a caller that stops waiting cannot strand the others
        let inner = Arc::clone(&self.inner);
        let refresh_token = current.refresh_token().to_string();
        tokio::spawn(async move {
            inner.run_episode(refresh_token, tx).await;
        });
        Step::Wait(rx)
    }
}

impl Inner {
    async fn run_episode(&self, refresh_token: String, tx: watch::Sender<Option<Outcome>>) {
        let guard = EpisodeGuard(self);
        info!("Access token rejected, renewing session");

        let authenticator = Arc::clone(self.controller.authenticator());
        let result = tokio::time::timeout(
            self.refresh_timeout,
            authenticator.refresh(&refresh_token),
        )
        .await;

        let outcome = match result {
            Ok(Ok(renewal)) => match self.controller.apply_renewal(&refresh_token, renewal) {
                Some(session) => {
                    info!("Session renewed");
                    Outcome::Renewed(session)
                }
                None => {
                    warn!("Session was cleared or replaced while renewing");
                    Outcome::Expired
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, "Session renewal failed");
                self.controller.expire_from(&refresh_token);
                Outcome::Expired
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.refresh_timeout.as_secs_f64(),
                    "Session renewal timed out"
                );
                self.controller.expire_from(&refresh_token);
                Outcome::Expired
            }
        };

        // Back to idle before waking anyone
        drop(guard);
        let _ = tx.send(Some(outcome));
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the coordinator to idle even if the episode task unwinds
struct EpisodeGuard<'a>(&'a Inner);

impl Drop for EpisodeGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock_state() = State::Idle;
    }
}
