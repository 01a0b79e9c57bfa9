//! End-to-end tests for the authenticated request pipeline.
//!
//! Each test runs the real reqwest transport and auth client against a
//! wiremock server that plays the backend: `Auth.cfc` answers the
//! form-encoded auth methods, `routes/Contact.cfc` only accepts whichever
//! bearer token the scenario considers current.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use addrbook_core::api::{HttpAuthenticator, HttpTransport};
use addrbook_core::session::{FileSessionStore, SessionStore};
use addrbook_core::{ApiClient, ApiError, ApiRequest, SessionController};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONTACTS: &str = "routes/Contact.cfc";

struct Backend {
    server: MockServer,
    _dir: tempfile::TempDir,
    store: Arc<FileSessionStore>,
}

impl Backend {
    async fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FileSessionStore::new(dir.path().to_path_buf()));
        Self {
            server: MockServer::start().await,
            _dir: dir,
            store,
        }
    }

    /// A fresh "process": new transport, controller and client over the same storage
    fn client(&self) -> ApiClient {
        let transport = Arc::new(
            HttpTransport::new(format!("{}/api", self.server.uri()), Duration::from_secs(5))
                .expect("transport"),
        );
        let authenticator = Arc::new(HttpAuthenticator::new(transport.clone()));
        let controller = Arc::new(SessionController::new(self.store.clone(), authenticator));
        controller.bootstrap();
        ApiClient::new(transport, controller, Duration::from_secs(5))
    }

    async fn mock_login(&self, token: &str, refresh_token: &str) {
        Mock::given(method("POST"))
            .and(path("/api/Auth.cfc"))
            .and(body_string_contains("method=login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "token": token,
                "refreshToken": refresh_token,
                "user": {"id": 7, "fullName": "Ada Lovelace", "username": "ada"}
            })))
            .mount(&self.server)
            .await;
    }

    async fn mock_contacts(&self, token: &str, status: u16) {
        let template = if status == 200 {
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": []}))
        } else {
            ResponseTemplate::new(status)
        };
        Mock::given(method("GET"))
            .and(path(format!("/api/{}", CONTACTS)))
            .and(header("Authorization", format!("Bearer {}", token).as_str()))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }
}

fn contacts_request() -> ApiRequest {
    ApiRequest::get(CONTACTS).query("method", "getContacts")
}

fn count_clears(client: &ApiClient) -> Arc<AtomicUsize> {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    client.controller().on_session_cleared(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    fired
}

#[tokio::test]
async fn concurrent_expiry_triggers_a_single_renewal() {
    let backend = Backend::start().await;
    backend.mock_login("t1", "r1").await;
    backend.mock_contacts("t1", 401).await;
    backend.mock_contacts("t2", 200).await;

    Mock::given(method("POST"))
        .and(path("/api/Auth.cfc"))
        .and(body_string_contains("method=refreshToken"))
        .and(body_string_contains("refreshToken=r1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "token": "t2"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&backend.server)
        .await;

    let client = backend.client();
    client.controller().login("ada", "pw").await.unwrap();

    let (a, b) = tokio::join!(client.call(contacts_request()), client.call(contacts_request()));
    assert!(a.unwrap().success);
    assert!(b.unwrap().success);

    let stored = backend.store.load().unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("t2"));
    assert_eq!(stored.refresh_token.as_deref(), Some("r1"));

    let requests = backend.server.received_requests().await.unwrap();
    let renewals = requests
        .iter()
        .filter(|r| String::from_utf8_lossy(&r.body).contains("method=refreshToken"))
        .count();
    assert_eq!(renewals, 1);
}

#[tokio::test]
async fn failed_renewal_logs_out_once() {
    let backend = Backend::start().await;
    backend.mock_login("t1", "r1").await;
    backend.mock_contacts("t1", 401).await;

    Mock::given(method("POST"))
        .and(path("/api/Auth.cfc"))
        .and(body_string_contains("method=refreshToken"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&backend.server)
        .await;

    let client = backend.client();
    let cleared = count_clears(&client);
    client.controller().login("ada", "pw").await.unwrap();

    let (a, b, c) = tokio::join!(
        client.send(contacts_request()),
        client.send(contacts_request()),
        client.send(contacts_request())
    );
    for result in [a, b, c] {
        assert!(matches!(result, Err(ApiError::SessionExpired)));
    }

    assert_eq!(cleared.load(Ordering::SeqCst), 1);
    assert!(!client.controller().is_authenticated());
    assert!(backend.store.load().unwrap().is_empty());
}

#[tokio::test]
async fn refresh_reported_failure_also_logs_out() {
    let backend = Backend::start().await;
    backend.mock_login("t1", "r1").await;
    backend.mock_contacts("t1", 401).await;

    Mock::given(method("POST"))
        .and(path("/api/Auth.cfc"))
        .and(body_string_contains("method=refreshToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "SUCCESS": false,
            "MESSAGE": "Refresh token expired"
        })))
        .expect(1)
        .mount(&backend.server)
        .await;

    let client = backend.client();
    client.controller().login("ada", "pw").await.unwrap();

    let err = client.send(contacts_request()).await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));
    assert!(backend.store.load().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_envelope_does_not_refresh() {
    let backend = Backend::start().await;
    backend.mock_login("t1", "r1").await;

    Mock::given(method("GET"))
        .and(path(format!("/api/{}", CONTACTS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Invalid or expired token"
        })))
        .mount(&backend.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/Auth.cfc"))
        .and(body_string_contains("method=refreshToken"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend.server)
        .await;

    let client = backend.client();
    client.controller().login("ada", "pw").await.unwrap();

    match client.call(contacts_request()).await {
        Err(ApiError::Rejected(msg)) => assert_eq!(msg, "Invalid or expired token"),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(client.controller().is_authenticated());
}

#[tokio::test]
async fn login_survives_restart() {
    let backend = Backend::start().await;
    backend.mock_login("t1", "r1").await;

    let first = backend.client();
    let session = first.controller().login("ada", "pw").await.unwrap();
    assert_eq!(session.identity().unwrap().display_name(), "Ada Lovelace");

    let second = backend.client();
    assert_eq!(second.controller().current(), Some(session));
}

#[tokio::test]
async fn login_rejection_keeps_server_message() {
    let backend = Backend::start().await;
    Mock::given(method("POST"))
        .and(path("/api/Auth.cfc"))
        .and(body_string_contains("method=login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Invalid username or password"
        })))
        .mount(&backend.server)
        .await;

    let client = backend.client();
    let err = client.controller().login("ada", "nope").await.unwrap_err();
    assert_eq!(err.user_message(), "Invalid username or password");
    assert!(backend.store.load().unwrap().is_empty());
}

#[tokio::test]
async fn logout_without_session_makes_no_calls() {
    let backend = Backend::start().await;
    Mock::given(method("POST"))
        .and(path("/api/Auth.cfc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend.server)
        .await;

    let client = backend.client();
    client.controller().logout().await;
    client.controller().logout().await;
    assert!(!client.controller().is_authenticated());
}

#[tokio::test]
async fn logout_clears_even_when_server_fails() {
    let backend = Backend::start().await;
    backend.mock_login("t1", "r1").await;
    Mock::given(method("POST"))
        .and(path("/api/Auth.cfc"))
        .and(body_string_contains("method=logout"))
        .and(body_string_contains("refreshToken=r1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&backend.server)
        .await;

    let client = backend.client();
    let cleared = count_clears(&client);
    client.controller().login("ada", "pw").await.unwrap();

    client.controller().logout().await;
    assert!(!client.controller().is_authenticated());
    assert!(backend.store.load().unwrap().is_empty());
    assert_eq!(cleared.load(Ordering::SeqCst), 1);
}
