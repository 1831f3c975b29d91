//! HTTP client for the marketplace messaging API.
//!
//! Cookie-session aware: every state-changing request carries the session's
//! CSRF token, refreshed and retried once when the server rejects it.

pub mod client;
pub mod csrf;
pub mod error;
pub mod http;
pub mod transport;

pub use client::ApiClient;
pub use csrf::CsrfTokenCache;
pub use error::ClientError;
pub use http::HttpTransport;
pub use transport::{ApiRequest, ApiResponse, Transport};
