use reqwest::Client;

use bazaar_types::api::{CsrfTokenResponse, ErrorBody};

use crate::error::ClientError;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// `reqwest` transport with its own cookie store, so the session cookie set
/// by login follows every later request.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Transport for HttpTransport {
    async fn fetch_csrf_token(&self) -> Result<String, ClientError> {
        let response = self.client.get(self.url("/api/csrf-token")).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        if !(200..300).contains(&status) {
            return Err(ClientError::Status {
                status,
                message: error_message(&body),
            });
        }
        let parsed: CsrfTokenResponse = serde_json::from_slice(&body)?;
        Ok(parsed.csrf_token)
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut builder = self.client.request(request.method, self.url(&request.path));
        if let Some(token) = &request.csrf_token {
            builder = builder.header("x-csrf-token", token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        Ok(ApiResponse {
            status: response.status().as_u16(),
            body: response.bytes().await?.to_vec(),
        })
    }
}

/// The server's `{ message }` when present, else the raw body.
pub(crate) fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned())
}
