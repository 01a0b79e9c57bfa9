//! REST API client module for the address book backend.
//!
//! This module provides the `ApiClient` for performing authenticated
//! requests, the `Transport` seam it sends them through, and the
//! `RemoteAuthenticator` for the login/register/refresh/logout calls.
//!
//! The API uses bearer token authentication; a `401` response is the only
//! signal that the access token needs renewing.

pub mod auth_service;
pub mod client;
pub mod envelope;
pub mod error;
pub mod transport;

pub use auth_service::{HttpAuthenticator, Registration, RemoteAuthenticator, AUTH_ENDPOINT};
pub use client::ApiClient;
pub use envelope::Envelope;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};

pub use reqwest::{Method, StatusCode};
