use std::future::Future;

use reqwest::Method;
use serde_json::Value;

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub csrf_token: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            csrf_token: None,
        }
    }

    /// GET, HEAD and OPTIONS never carry a token.
    pub fn is_safe(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Moves requests to the server. The session cookie is the transport's concern.
pub trait Transport: Send + Sync {
    /// `GET /api/csrf-token` for the current session.
    fn fetch_csrf_token(&self) -> impl Future<Output = Result<String, ClientError>> + Send;

    fn execute(&self, request: ApiRequest) -> impl Future<Output = Result<ApiResponse, ClientError>> + Send;
}
