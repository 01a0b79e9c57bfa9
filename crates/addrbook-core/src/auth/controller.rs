//! Public session operations: login, register, logout and bootstrap.
//!
//! `SessionController` owns the single in-process `Session` and is the only
//! writer of the `SessionStore`. The refresh coordinator reports renewal
//! outcomes back through `apply_renewal` / `expire_from`.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::AuthError;
use crate::api::{Registration, RemoteAuthenticator};
use crate::session::{Renewal, Session, SessionStore};

/// Callback fired when a present session becomes absent
pub type SessionObserver = Box<dyn Fn() + Send + Sync>;

pub struct SessionController {
    store: Arc<dyn SessionStore>,
    authenticator: Arc<dyn RemoteAuthenticator>,
    session: RwLock<Option<Session>>,
    observers: Mutex<Vec<SessionObserver>>,
}

impl SessionController {
    /// Create a controller with no session. Call `bootstrap` to pick up a
    /// persisted one.
    pub fn new(store: Arc<dyn SessionStore>, authenticator: Arc<dyn RemoteAuthenticator>) -> Self {
        Self {
            store,
            authenticator,
            session: RwLock::new(None),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Restore the persisted session without touching the network.
    ///
    /// An incomplete or unreadable record is treated as no session and
    /// removed from the store.
    pub fn bootstrap(&self) -> Option<Session> {
        let restored = match self.store.load() {
            Ok(record) if record.is_empty() => {
                debug!("No persisted session");
                None
            }
            Ok(record) => {
                let session = record.into_session();
                if session.is_none() {
                    warn!("Persisted session is incomplete, discarding");
                    self.clear_store();
                }
                session
            }
            Err(e) => {
                warn!(error = %e, "Failed to load session, discarding");
                self.clear_store();
                None
            }
        };

        if let Some(ref session) = restored {
            info!(
                user = session.identity().map(|i| i.display_name()).unwrap_or("unknown"),
                "Session restored"
            );
        }

        *self.write() = restored.clone();
        restored
    }

    /// Authenticate and persist the resulting session.
    ///
    /// Nothing is kept if persisting fails.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let session = match self.authenticator.login(username, password).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Login failed");
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.save(&session) {
            warn!(error = %e, "Failed to save session, rolling back");
            self.clear_store();
            return Err(AuthError::Storage(e));
        }

        *self.write() = Some(session.clone());
        info!("Login successful");
        Ok(session)
    }

    /// Create an account. The caller still has to log in afterwards.
    pub async fn register(&self, registration: &Registration) -> Result<(), AuthError> {
        self.authenticator.register(registration).await.map_err(|e| {
            warn!(error = %e, "Registration failed");
            AuthError::from(e)
        })?;
        info!(username = %registration.username, "Registration successful");
        Ok(())
    }

    /// Revoke the session remotely (best effort) and clear it locally.
    ///
    /// Safe to call when already logged out.
    pub async fn logout(&self) {
        let Some(session) = self.current() else {
            debug!("Logout requested with no active session");
            self.clear_store();
            return;
        };

        if let Err(e) = self.authenticator.logout(session.refresh_token()).await {
            warn!(error = %e, "Logout API call failed, clearing local session anyway");
        }

        self.clear_session();
        info!("Logged out");
    }

    /// Register an observer fired whenever the session transitions to absent.
    pub fn on_session_cleared<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Snapshot of the current session
    pub fn current(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn authenticator(&self) -> &Arc<dyn RemoteAuthenticator> {
        &self.authenticator
    }

    /// Fold new credentials into the session the renewal started from,
    /// identified by its refresh token, and persist them.
    /// Returns `None` if that session was cleared or replaced meanwhile.
    pub(crate) fn apply_renewal(&self, renewed_from: &str, renewal: Renewal) -> Option<Session> {
        let mut guard = self.write();
        let Some(current) = guard.as_ref().filter(|s| s.refresh_token() == renewed_from) else {
            debug!("Renewal no longer matches the active session, discarding");
            return None;
        };
        let renewed = current.renewed(renewal);

        if let Err(e) = self.store.save(&renewed) {
            warn!(error = %e, "Failed to persist renewed session");
        }

        *guard = Some(renewed.clone());
        Some(renewed)
    }

    /// Drop the session after credentials could not be renewed.
    pub(crate) fn expire(&self) {
        if self.clear_session() {
            info!("Session expired, logged out");
        }
    }

    /// Drop the session a failed renewal started from. A session that
    /// replaced it in the meantime is left alone.
    pub(crate) fn expire_from(&self, renewed_from: &str) {
        let expired = {
            let mut guard = self.write();
            if matches!(guard.as_ref(), Some(s) if s.refresh_token() == renewed_from) {
                guard.take();
                self.clear_store();
                true
            } else {
                false
            }
        };

        if expired {
            info!("Session expired, logged out");
            self.notify_cleared();
        } else {
            debug!("Failed renewal belongs to a session that is already gone");
        }
    }

    /// Clear memory and store; notify observers if a session was present.
    fn clear_session(&self) -> bool {
        let was_present = self.write().take().is_some();
        self.clear_store();
        if was_present {
            self.notify_cleared();
        }
        was_present
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }

    fn notify_cleared(&self) {
        let observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(count = observers.len(), "Notifying session observers");
        for observer in observers.iter() {
            observer();
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }
}
