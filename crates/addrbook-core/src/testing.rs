//! Scripted collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Notify;

use crate::api::{ApiError, ApiRequest, ApiResponse, Registration, RemoteAuthenticator, Transport};
use crate::session::{Renewal, Session};

pub(crate) enum RefreshPlan {
    Issue {
        access_token: String,
        refresh_token: Option<String>,
    },
    Reject,
    Hang,
}

pub(crate) struct FakeAuthenticator {
    pub login_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub refresh_tokens_seen: Mutex<Vec<String>>,
    login: Mutex<VecDeque<Result<Session, ApiError>>>,
    refresh: Mutex<RefreshPlan>,
    register_error: Option<String>,
    logout_fails: bool,
    gate: Option<Arc<Notify>>,
}

impl FakeAuthenticator {
    pub fn new() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            login: Mutex::new(VecDeque::new()),
            refresh: Mutex::new(RefreshPlan::Reject),
            register_error: None,
            logout_fails: false,
            gate: None,
        }
    }

    pub fn with_login(self, result: Result<Session, ApiError>) -> Self {
        self.login.lock().unwrap().push_back(result);
        self
    }

    pub fn refresh_issues(self, access_token: &str) -> Self {
        *self.refresh.lock().unwrap() = RefreshPlan::Issue {
            access_token: access_token.to_string(),
            refresh_token: None,
        };
        self
    }

    pub fn refresh_rotates(self, access_token: &str, refresh_token: &str) -> Self {
        *self.refresh.lock().unwrap() = RefreshPlan::Issue {
            access_token: access_token.to_string(),
            refresh_token: Some(refresh_token.to_string()),
        };
        self
    }

    pub fn refresh_rejects(self) -> Self {
        *self.refresh.lock().unwrap() = RefreshPlan::Reject;
        self
    }

    pub fn refresh_hangs(self) -> Self {
        *self.refresh.lock().unwrap() = RefreshPlan::Hang;
        self
    }

    pub fn register_rejects(mut self, message: &str) -> Self {
        self.register_error = Some(message.to_string());
        self
    }

    pub fn logout_fails(mut self) -> Self {
        self.logout_fails = true;
        self
    }

    /// Hold every renewal until the returned handle is notified
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteAuthenticator for FakeAuthenticator {
    async fn login(&self, _username: &str, _password: &str) -> Result<Session, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ApiError::Rejected("Invalid credentials".to_string())))
    }

    async fn register(&self, _registration: &Registration) -> Result<(), ApiError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        match self.register_error {
            Some(ref msg) => Err(ApiError::Rejected(msg.clone())),
            None => Ok(()),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Renewal, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen
            .lock()
            .unwrap()
            .push(refresh_token.to_string());

        if let Some(ref gate) = self.gate {
            gate.notified().await;
        }

        // Outer None = hang, inner None = reject
        let planned: Option<Option<Renewal>> = match *self.refresh.lock().unwrap() {
            RefreshPlan::Issue {
                ref access_token,
                ref refresh_token,
            } => Some(Some(Renewal {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
                identity: None,
            })),
            RefreshPlan::Reject => Some(None),
            RefreshPlan::Hang => None,
        };
        match planned {
            Some(renewal) => renewal.ok_or(ApiError::Unauthorized),
            None => std::future::pending().await,
        }
    }

    async fn logout(&self, _refresh_token: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.logout_fails {
            Err(ApiError::ServerError("logout unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Accepts exactly one access token at a time; everything else gets 401.
pub(crate) struct TokenTransport {
    valid_token: Mutex<String>,
    seen: Mutex<Vec<ApiRequest>>,
    /// Queued statuses returned ahead of the token check
    scripted: Mutex<VecDeque<StatusCode>>,
}

impl TokenTransport {
    pub fn accepting(token: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new(token.to_string()),
            seen: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
        })
    }

    pub fn script(&self, status: StatusCode) {
        self.scripted.lock().unwrap().push_back(status);
    }

    pub fn seen(&self) -> Vec<ApiRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for TokenTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.seen.lock().unwrap().push(request.clone());

        if let Some(status) = self.scripted.lock().unwrap().pop_front() {
            return Ok(ApiResponse::new(status, r#"{"success": false}"#));
        }

        let valid = self.valid_token.lock().unwrap().clone();
        if request.bearer.as_deref() == Some(valid.as_str()) {
            let body = serde_json::json!({ "success": true, "path": request.path }).to_string();
            Ok(ApiResponse::new(StatusCode::OK, body))
        } else {
            Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, ""))
        }
    }
}

pub(crate) fn session(access: &str, refresh: &str) -> Session {
    Session::new(access, refresh, None).expect("test tokens are non-empty")
}
