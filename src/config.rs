use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Nidhi";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Backend used when `NIDHI_API_URL` is not set.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// Authorization header scheme expected by the dashboard backend.
pub const DEFAULT_AUTH_SCHEME: &str = "JWT";

/// Upper bound for any single backend call. Generation is slow, so this is generous.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Capacity of the session event broadcast channel.
const DEFAULT_SESSION_EVENT_BUFFER: usize = 16;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,nidhi_client=debug"
}

/// Get the application data directory.
/// Falls back to the working directory when the platform has no data dir.
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// SQLite file backing the persistent session store.
pub fn session_db_path() -> PathBuf {
    app_data_dir().join("session.db")
}

// ═══════════════════════════════════════════════════════════
// Endpoints
// ═══════════════════════════════════════════════════════════

/// Backend paths, relative to `ClientConfig::base_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub refresh: String,
    pub login: String,
    pub request_otp: String,
    pub verify_otp: String,
    pub current_user: String,
    /// Prefix for `GET {report}/{report_id}`.
    pub report: String,
    pub section_status: String,
    pub generate: String,
    pub doctor_remark: String,
    /// Multipart patient intake; answers with the new report id.
    pub intake: String,
    /// Prefix for `GET {patient}/{phone}`; bare path lists patients.
    pub patient: String,
    /// Prefix for `GET {output}/{patient_id}`.
    pub output: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            refresh: "/auth/refresh".into(),
            login: "/auth/jwt/create".into(),
            request_otp: "/request-otp".into(),
            verify_otp: "/verify-otp".into(),
            current_user: "/auth/users/me".into(),
            report: "/status".into(),
            section_status: "/report-section-status".into(),
            generate: "/generate".into(),
            doctor_remark: "/doctor-remark".into(),
            intake: "/generate".into(),
            patient: "/patient".into(),
            output: "/output".into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// ClientConfig
// ═══════════════════════════════════════════════════════════

/// Runtime configuration of the dashboard client.
///
/// Use [`from_env()`](ClientConfig::from_env) for convention-based setup,
/// or `Default` with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub auth_scheme: String,
    /// Applied to every dispatch, including refresh calls.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub session_event_buffer: usize,
    pub endpoints: Endpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.into(),
            auth_scheme: DEFAULT_AUTH_SCHEME.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            session_event_buffer: DEFAULT_SESSION_EVENT_BUFFER,
            endpoints: Endpoints::default(),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `NIDHI_API_URL`: backend base URL
    /// - `NIDHI_AUTH_SCHEME`: authorization scheme (default `JWT`)
    /// - `NIDHI_REQUEST_TIMEOUT_SECS`: per-call timeout
    /// - `NIDHI_CONNECT_TIMEOUT_SECS`: TCP connect timeout
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a numeric variable does not parse
    /// or the base URL is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("NIDHI_API_URL") {
            config = config.with_base_url(url)?;
        }
        if let Ok(scheme) = std::env::var("NIDHI_AUTH_SCHEME") {
            config.auth_scheme = scheme.trim().to_string();
        }
        if let Some(secs) = env_secs("NIDHI_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("NIDHI_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Override the backend base URL. Trailing slashes are dropped.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        let trimmed = url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "NIDHI_API_URL",
                value: url,
            });
        }
        self.base_url = trimmed.to_string();
        Ok(self)
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.auth_scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

fn env_secs(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
