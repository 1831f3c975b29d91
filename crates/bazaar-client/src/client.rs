use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use bazaar_types::api::{MarkReadResponse, StatusMessage};
use bazaar_types::models::{Conversation, Message, User};

use crate::csrf::CsrfTokenCache;
use crate::error::ClientError;
use crate::http::error_message;
use crate::transport::{ApiRequest, ApiResponse, Transport};

const FORBIDDEN: u16 = 403;

pub struct ApiClient<T> {
    transport: T,
    csrf: CsrfTokenCache,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            csrf: CsrfTokenCache::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a request, attaching the CSRF token to anything but GET/HEAD/OPTIONS.
    ///
    /// A 403 on a mutating request refreshes the token and retries exactly
    /// once; whatever the retry returns is the result.
    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<ApiResponse, ClientError> {
        let mut request = ApiRequest::new(method, path, body);
        if request.is_safe() {
            return self.transport.execute(request).await;
        }

        request.csrf_token = Some(self.csrf.get(&self.transport).await?);
        let response = self.transport.execute(request.clone()).await?;
        if response.status != FORBIDDEN {
            return Ok(response);
        }

        debug!("{} {} rejected with 403, refreshing CSRF token", request.method, request.path);
        self.csrf.invalidate().await;
        request.csrf_token = Some(self.csrf.get(&self.transport).await?);
        self.transport.execute(request).await
    }

    /// `request`, then decode a success body or turn the failure into `ClientError::Status`.
    pub async fn request_json<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<R, ClientError> {
        let response = self.request(method, path, body).await?;
        if !response.is_success() {
            return Err(ClientError::Status {
                status: response.status,
                message: error_message(&response.body),
            });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    // -- Auth --
    // The server rotates the session and its token on register, login and
    // logout, so the cached token is dropped after each.

    pub async fn register(&self, username: &str, password: &str, phone_number: Option<&str>) -> Result<User, ClientError> {
        let body = json!({ "username": username, "password": password, "phoneNumber": phone_number });
        let result = self.request_json(Method::POST, "/api/register", Some(body)).await;
        self.csrf.invalidate().await;
        result
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<User, ClientError> {
        let body = json!({ "username": username, "password": password });
        let result = self.request_json(Method::POST, "/api/login", Some(body)).await;
        self.csrf.invalidate().await;
        result
    }

    pub async fn logout(&self) -> Result<StatusMessage, ClientError> {
        let result = self.request_json(Method::POST, "/api/logout", None).await;
        self.csrf.invalidate().await;
        result
    }

    pub async fn current_user(&self) -> Result<User, ClientError> {
        self.request_json(Method::GET, "/api/user", None).await
    }

    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<StatusMessage, ClientError> {
        let body = json!({ "currentPassword": current_password, "newPassword": new_password });
        self.request_json(Method::POST, "/api/change-password", Some(body)).await
    }

    pub async fn update_phone_number(&self, phone_number: &str) -> Result<User, ClientError> {
        let body = json!({ "phoneNumber": phone_number });
        self.request_json(Method::PATCH, "/api/user", Some(body)).await
    }

    // -- Conversations --

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        self.request_json(Method::GET, "/api/conversations", None).await
    }

    pub async fn create_conversation(
        &self,
        buyer_id: Uuid,
        seller_id: Uuid,
        product_id: Option<Uuid>,
    ) -> Result<Conversation, ClientError> {
        let body = json!({ "buyerId": buyer_id, "sellerId": seller_id, "productId": product_id });
        self.request_json(Method::POST, "/api/conversations", Some(body)).await
    }

    pub async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, ClientError> {
        let path = format!("/api/conversations/{}/messages", conversation_id);
        self.request_json(Method::GET, &path, None).await
    }

    pub async fn send_message(&self, conversation_id: Uuid, content: &str) -> Result<Message, ClientError> {
        let path = format!("/api/conversations/{}/messages", conversation_id);
        self.request_json(Method::POST, &path, Some(json!({ "content": content }))).await
    }

    pub async fn mark_read(&self, conversation_id: Uuid) -> Result<MarkReadResponse, ClientError> {
        let path = format!("/api/conversations/{}/read", conversation_id);
        self.request_json(Method::POST, &path, None).await
    }
}
