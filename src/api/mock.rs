//! Scripted transport for tests. Records every dispatch and answers
//! through a caller-supplied handler, optionally after a delay.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::transport::{Transport, TransportError};
use super::types::{ApiRequest, ApiResponse};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync>;

pub(crate) struct MockTransport {
    handler: Handler,
    default_delay: Duration,
    path_delays: HashMap<String, Duration>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub(crate) fn new(
        handler: impl Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            default_delay: Duration::ZERO,
            path_delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Delay every dispatch.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Delay dispatches to one path (overrides the default delay).
    pub(crate) fn with_path_delay(mut self, path: &str, delay: Duration) -> Self {
        self.path_delays.insert(path.to_string(), delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, path: &str) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|req| req.path == path)
            .collect()
    }

    pub(crate) fn call_count(&self, path: &str) -> usize {
        self.calls_to(path).len()
    }
}

impl Transport for MockTransport {
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let delay = self
            .path_delays
            .get(&request.path)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(request)
    }
}

pub(crate) fn ok_json(value: serde_json::Value) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::json_body(200, &value))
}

pub(crate) fn status(code: u16) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(code, ""))
}
