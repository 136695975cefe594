//! Request/response values passed through the client, plus auth wire bodies.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;

// ═══════════════════════════════════════════════════════════
// ApiRequest: one logical call
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// An outbound call. The client owns `bearer` and `retried`; callers only
/// describe method, path, query and body.
#[derive(Clone)]
pub struct ApiRequest {
    /// Correlates the original dispatch and its replay in logs.
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Multipart body. Mutually exclusive with `body`.
    pub form: Option<MultipartForm>,
    /// Access token attached to this dispatch.
    pub bearer: Option<String>,
    /// Set once the call has been replayed after a 401. Never reset.
    pub retried: bool,
    /// `false` for token endpoints: no bearer, no refresh on 401.
    pub authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            form: None,
            bearer: None,
            retried: false,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Encode`] if `body` cannot be serialized.
    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Encode(e.to_string()))?;
        self.body = Some(value);
        self.form = None;
        Ok(self)
    }

    /// Attach a multipart form body, replacing any JSON body.
    #[must_use]
    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.form = Some(form);
        self.body = None;
        self
    }

    /// Mark as a call that must not carry or refresh credentials.
    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Value of a query parameter, if present.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("form", &self.form)
            .field("has_bearer", &self.bearer.is_some())
            .field("retried", &self.retried)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════
// MultipartForm: text fields plus file parts
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

/// One uploaded file. Debug output shows the size, not the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for FilePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePart")
            .field("field", &self.field)
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn file(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.files.push(FilePart {
            field: field.into(),
            file_name: file_name.into(),
            bytes: bytes.into(),
        });
        self
    }

    /// First text field named `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// ApiResponse
// ═══════════════════════════════════════════════════════════

/// Raw backend response. Non-2xx statuses are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Response with a JSON body.
    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// 202: the backend accepted the work but has no result yet.
    pub fn is_accepted(&self) -> bool {
        self.status == 202
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Turn a non-2xx response into [`ApiError::Status`].
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::Status {
                status: self.status,
                body: self.text(),
            })
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Auth wire bodies
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh endpoint reply. Older backends answer `{"access": …}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshResponse {
    #[serde(alias = "access")]
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct OtpRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct VerifyOtpRequest<'a> {
    pub email: &'a str,
    pub otp: u32,
}

/// Token pair issued by login and OTP verification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenPair {
    #[serde(alias = "access")]
    pub access_token: String,
    #[serde(alias = "refresh", default)]
    pub refresh_token: Option<String>,
}

/// Signed-in staff member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: String,
}

impl UserProfile {
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_is_fresh() {
        let req = ApiRequest::get("/auth/users/me");
        assert_eq!(req.method, Method::Get);
        assert!(!req.retried);
        assert!(req.authenticated);
        assert!(req.bearer.is_none());
    }

    #[test]
    fn query_builder_appends_pairs() {
        let req = ApiRequest::get("/report-section-status")
            .query("reportId", "r-1")
            .query("sectionId", "3");
        assert_eq!(req.query_value("reportId"), Some("r-1"));
        assert_eq!(req.query_value("sectionId"), Some("3"));
        assert_eq!(req.query_value("missing"), None);
    }

    #[test]
    fn debug_hides_bearer() {
        let mut req = ApiRequest::get("/status/1");
        req.bearer = Some("top-secret".into());
        let debug = format!("{req:?}");
        assert!(!debug.contains("top-secret"));
        assert!(debug.contains("has_bearer: true"));
    }

    #[test]
    fn multipart_replaces_json_body() {
        let form = MultipartForm::new()
            .text("name", "R. Iyer")
            .file("xray", "chest.png", vec![0u8; 2048]);
        let req = ApiRequest::post("/generate")
            .json(&serde_json::json!({ "ignored": true }))
            .unwrap()
            .multipart(form);

        assert!(req.body.is_none());
        let form = req.form.as_ref().unwrap();
        assert_eq!(form.field("name"), Some("R. Iyer"));
        assert_eq!(form.files[0].field, "xray");

        let debug = format!("{req:?}");
        assert!(debug.contains("len: 2048"));
    }

    #[test]
    fn status_helpers() {
        assert!(ApiResponse::new(204, "").is_success());
        assert!(ApiResponse::new(401, "").is_unauthorized());
        assert!(ApiResponse::new(202, "").is_accepted());
        assert!(!ApiResponse::new(500, "").is_success());
    }

    #[test]
    fn error_for_status_keeps_body() {
        let err = ApiResponse::new(404, "no such report")
            .error_for_status()
            .unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such report");
            }
            other => panic!("Expected Status, got: {other}"),
        }
    }

    #[test]
    fn refresh_response_accepts_both_shapes() {
        let camel: RefreshResponse = serde_json::from_str(r#"{"accessToken":"A2"}"#).unwrap();
        let short: RefreshResponse = serde_json::from_str(r#"{"access":"A3"}"#).unwrap();
        assert_eq!(camel.access_token, "A2");
        assert_eq!(short.access_token, "A3");
    }

    #[test]
    fn refresh_request_serializes_camel_case() {
        let json = serde_json::to_string(&RefreshRequest { refresh_token: "R1" }).unwrap();
        assert_eq!(json, r#"{"refreshToken":"R1"}"#);
    }

    #[test]
    fn token_pair_from_login_reply() {
        let pair: TokenPair =
            serde_json::from_str(r#"{"access":"A1","refresh":"R1"}"#).unwrap();
        assert_eq!(pair.access_token, "A1");
        assert_eq!(pair.refresh_token.as_deref(), Some("R1"));
    }

    #[test]
    fn admin_role_detection() {
        let user: UserProfile = serde_json::from_str(
            r#"{"id":7,"username":"asha","full_name":"Asha Rao","role":"Admin"}"#,
        )
        .unwrap();
        assert!(user.is_admin());
        assert_eq!(user.full_name.as_deref(), Some("Asha Rao"));
    }
}
