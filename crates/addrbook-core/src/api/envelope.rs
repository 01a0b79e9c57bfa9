//! The uniform response envelope returned by the backend.
//!
//! The backend is inconsistent about key casing (`success`, `SUCCESS`,
//! `refreshToken`, `REFRESHTOKEN`, ...) and sometimes encodes booleans as
//! strings, so parsing is deliberately lenient.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::ApiError;
use crate::session::Identity;

/// Fallback message when a failed envelope carries none
const DEFAULT_FAILURE_MESSAGE: &str = "Request failed";

const SUCCESS_KEYS: &[&str] = &["success", "SUCCESS"];
const MESSAGE_KEYS: &[&str] = &["message", "MESSAGE"];
const TOKEN_KEYS: &[&str] = &["token", "TOKEN"];
const REFRESH_TOKEN_KEYS: &[&str] = &["refreshToken", "REFRESHTOKEN", "refreshtoken"];
const USER_KEYS: &[&str] = &["user", "USER"];

/// Parsed from the raw object so that one payload may carry several
/// casings of the same key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct Envelope {
    pub success: bool,
    pub message: Option<String>,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<Value>,
    /// Everything else in the payload (e.g. `data`, `contacts`)
    pub extra: Map<String, Value>,
}

impl From<Map<String, Value>> for Envelope {
    fn from(mut map: Map<String, Value>) -> Self {
        // Any truthy casing wins
        let success = take_all(&mut map, SUCCESS_KEYS).iter().any(truthy);
        let message = first_string(take_all(&mut map, MESSAGE_KEYS));
        let token = first_string(take_all(&mut map, TOKEN_KEYS));
        let refresh_token = first_string(take_all(&mut map, REFRESH_TOKEN_KEYS));
        let user = take_all(&mut map, USER_KEYS)
            .into_iter()
            .find(|value| !value.is_null());

        Self {
            success,
            message,
            token,
            refresh_token,
            user,
            extra: map,
        }
    }
}

impl Envelope {
    /// Turn an application-reported failure into `ApiError::Rejected`.
    pub fn into_result(self) -> Result<Self, ApiError> {
        if self.success {
            Ok(self)
        } else {
            Err(ApiError::Rejected(self.failure_message()))
        }
    }

    pub fn failure_message(&self) -> String {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_FAILURE_MESSAGE)
            .to_string()
    }

    /// Non-empty access token, if any
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.user.clone().and_then(Identity::from_value)
    }
}

fn take_all(map: &mut Map<String, Value>, keys: &[&str]) -> Vec<Value> {
    keys.iter().filter_map(|key| map.remove(*key)).collect()
}

/// First non-empty string among the values
fn first_string(values: Vec<Value>) -> Option<String> {
    values.into_iter().find_map(|value| match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1"
        ),
        _ => false,
    }
}
