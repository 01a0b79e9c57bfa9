//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `authorize`: attaches the access token to outgoing requests
//! - `SessionController`: login, register, logout and bootstrap
//! - `RefreshCoordinator`: renews an expired access token once per episode
//!   and resumes the requests that were waiting on it

pub mod authorizer;
pub mod controller;
pub mod error;
pub mod refresh;

pub use authorizer::authorize;
pub use controller::{SessionController, SessionObserver};
pub use error::AuthError;
pub use refresh::{RefreshCoordinator, DEFAULT_REFRESH_TIMEOUT};
