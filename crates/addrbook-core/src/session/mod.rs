//! Session model and persistence.
//!
//! This module provides:
//! - `Session`: the access/refresh token pair plus a cached identity
//! - `SessionStore`: durable storage for the session, with file, keyring
//!   and in-memory backends
//!
//! A session is either absent or complete. A record holding only one of the
//! two tokens is never treated as a session.

pub mod store;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

pub use store::{
    FileSessionStore, KeyringSessionStore, MemorySessionStore, SessionStore, StoredSession,
};

/// Minimal user profile cached for display. Not authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(
        default,
        alias = "ID",
        alias = "userId",
        alias = "USERID",
        deserialize_with = "string_or_number"
    )]
    pub id: Option<String>,
    #[serde(default, alias = "USERNAME")]
    pub username: Option<String>,
    #[serde(
        default,
        alias = "fullName",
        alias = "FULL_NAME",
        alias = "FULLNAME",
        alias = "name"
    )]
    pub full_name: Option<String>,
    #[serde(default, alias = "EMAIL")]
    pub email: Option<String>,
}

impl Identity {
    /// Best available name for display
    pub fn display_name(&self) -> &str {
        [&self.full_name, &self.username, &self.email, &self.id]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.trim().is_empty())
            .unwrap_or("Unknown user")
    }

    /// Build an identity from the loosely-typed `user` field of an envelope.
    /// Shapes we cannot read are dropped rather than failing the call.
    pub fn from_value(value: Value) -> Option<Self> {
        if value.is_null() {
            return None;
        }
        match serde_json::from_value(value) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable user profile");
                None
            }
        }
    }
}

/// Ids arrive as either JSON strings or numbers depending on the endpoint
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// The authenticated credential pair held by this process.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    access_token: String,
    refresh_token: String,
    identity: Option<Identity>,
}

impl Session {
    /// Returns `None` unless both tokens are present and non-empty.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        identity: Option<Identity>,
    ) -> Option<Self> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();
        if access_token.trim().is_empty() || refresh_token.trim().is_empty() {
            return None;
        }
        Some(Self {
            access_token,
            refresh_token,
            identity,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Apply a successful renewal. The refresh token and identity are only
    /// replaced when the server sent new ones.
    pub fn renewed(&self, renewal: Renewal) -> Self {
        let refresh_token = renewal
            .refresh_token
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.refresh_token.clone());
        Self {
            access_token: renewal.access_token,
            refresh_token,
            identity: renewal.identity.or_else(|| self.identity.clone()),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}

/// New credentials issued by the refresh endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct Renewal {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub identity: Option<Identity>,
}

impl fmt::Debug for Renewal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renewal")
            .field("rotated", &self.refresh_token.is_some())
            .field("identity", &self.identity)
            .finish()
    }
}
