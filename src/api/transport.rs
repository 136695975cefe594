//! Wire transport behind the authenticated client.
//!
//! The client never talks to reqwest directly: it hands a fully prepared
//! `ApiRequest` (bearer already chosen) to a `Transport` and gets back the
//! raw status and body. Tests substitute a scripted transport.

use std::future::Future;

use super::error::ApiError;
use super::types::{ApiRequest, ApiResponse, Method, MultipartForm};
use crate::config::ClientConfig;

/// Sends one prepared request. Must not retry, refresh, or interpret status codes.
pub trait Transport: Send + Sync + 'static {
    fn dispatch(
        &self,
        request: &ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send;
}

/// Errors below the HTTP status level.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Cannot connect to {0}")]
    Connect(String),
    #[error("Transport timed out")]
    Timeout,
    #[error("HTTP client error: {0}")]
    Http(String),
    #[error("HTTP client setup failed: {0}")]
    Setup(String),
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        ApiError::Network(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════
// HttpTransport: reqwest
// ═══════════════════════════════════════════════════════════

/// reqwest-backed transport for a single backend origin.
pub struct HttpTransport {
    base_url: String,
    auth_scheme: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build from client config. Only the connect phase is bounded here;
    /// the overall deadline is enforced by the authenticated client.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_scheme: config.auth_scheme.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl Transport for HttpTransport {
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, self.url_for(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = request.bearer.as_deref() {
            builder = builder.header(
                reqwest::header::AUTHORIZATION,
                format!("{} {token}", self.auth_scheme),
            );
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(form) = &request.form {
            builder = builder.multipart(to_reqwest_form(form));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                TransportError::Connect(self.base_url.clone())
            } else if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

/// Rebuilt per dispatch so a replayed request sends the same parts.
fn to_reqwest_form(form: &MultipartForm) -> reqwest::multipart::Form {
    let mut out = reqwest::multipart::Form::new();
    for (name, value) in &form.fields {
        out = out.text(name.clone(), value.clone());
    }
    for file in &form.files {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
        out = out.part(file.field.clone(), part);
    }
    out
}
