//! Authenticated request client.
//!
//! Every backend call goes through [`AuthenticatedClient::send`]. The client
//! attaches the stored access token, and on a 401 refreshes it once for all
//! concurrent callers before replaying the request exactly once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use zeroize::Zeroizing;

use super::error::{ApiError, SessionEndReason};
use super::refresh::{RefreshGate, RefreshState, Ticket};
use super::transport::{HttpTransport, Transport, TransportError};
use super::types::{ApiRequest, ApiResponse, RefreshRequest, RefreshResponse, UserProfile};
use crate::config::ClientConfig;
use crate::session_store::SessionStore;

/// Session lifecycle notifications for the view layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Credentials were issued by login or OTP verification.
    Started,
    /// Credentials are gone; the view should return to the login screen.
    Ended { reason: SessionEndReason },
}

pub struct AuthenticatedClient<T: Transport> {
    transport: T,
    store: Arc<dyn SessionStore>,
    config: ClientConfig,
    gate: RefreshGate,
    events: broadcast::Sender<SessionEvent>,
    cached_user: Mutex<Option<UserProfile>>,
}

impl AuthenticatedClient<HttpTransport> {
    /// Client talking HTTP to `config.base_url`.
    pub fn connect(
        config: ClientConfig,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&config)?;
        tracing::info!(base_url = %transport.base_url(), "API client ready");
        Ok(Self::new(transport, store, config))
    }
}

impl<T: Transport> AuthenticatedClient<T> {
    pub fn new(transport: T, store: Arc<dyn SessionStore>, config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.session_event_buffer.max(1));
        Self {
            transport,
            store,
            config,
            gate: RefreshGate::new(),
            events,
            cached_user: Mutex::new(None),
        }
    }

    /// Send a request, refreshing the session on 401.
    ///
    /// Non-401 statuses come back as `Ok` responses; only transport
    /// failures, timeouts and session loss are errors.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if request.authenticated {
            request.bearer = self.store.get().map(|c| c.access_token().to_string());
        }

        loop {
            let response = self.dispatch(&request).await?;
            if !request.authenticated || !response.is_unauthorized() {
                return Ok(response);
            }

            if request.retried {
                tracing::warn!(
                    request = %request.id,
                    path = %request.path,
                    "Refreshed token rejected, ending session"
                );
                let reason = SessionEndReason::RejectedAfterRefresh;
                // Another caller may already have ended it.
                if self.store.get().is_some() {
                    self.end_session(reason.clone());
                }
                return Err(ApiError::AuthExpired(reason));
            }

            request.retried = true;
            let token = self.fresh_token(request.bearer.as_deref()).await?;
            tracing::debug!(request = %request.id, path = %request.path, "Replaying after refresh");
            request.bearer = Some(token);
        }
    }

    /// Send, require a 2xx status, and decode the JSON body.
    pub async fn send_json<R: DeserializeOwned>(&self, request: ApiRequest) -> Result<R, ApiError> {
        self.send(request).await?.error_for_status()?.json()
    }

    pub fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.gate.state()
    }

    /// Callers currently parked behind an in-flight refresh.
    pub fn queued_requests(&self) -> usize {
        self.gate.queued()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.get().is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ─── Refresh ─────────────────────────────────────────────

    /// Access token to replay with after `failed_bearer` got a 401.
    ///
    /// A follower whose leader was dropped mid-refresh enters the gate again,
    /// so one of the remaining callers takes over the refresh.
    async fn fresh_token(&self, failed_bearer: Option<&str>) -> Result<String, ApiError> {
        loop {
            // Token rotated while this request was in flight.
            if let Some(current) = self.store.get() {
                if failed_bearer != Some(current.access_token()) {
                    return Ok(current.access_token().to_string());
                }
            }

            match self.gate.enter() {
                Ticket::Follower(waiter) => {
                    tracing::debug!("Token refresh in flight, queueing");
                    match waiter.await {
                        Ok(Ok(token)) => return Ok(token),
                        Ok(Err(SessionEndReason::RefreshAbandoned)) | Err(_) => {
                            tracing::debug!("Refresh leader went away, entering gate again");
                        }
                        Ok(Err(reason)) => return Err(ApiError::AuthExpired(reason)),
                    }
                }
                Ticket::Leader(leader) => {
                    let outcome = self.refresh().await;
                    let woken = leader.resolve(outcome.clone());
                    return match outcome {
                        Ok(token) => {
                            tracing::info!(woken, "Access token refreshed");
                            Ok(token)
                        }
                        Err(reason) => {
                            tracing::warn!(woken, reason = %reason, "Token refresh failed");
                            self.end_session(reason.clone());
                            Err(ApiError::AuthExpired(reason))
                        }
                    };
                }
            }
        }
    }

    /// One call to the refresh endpoint. Stores the new access token on success.
    async fn refresh(&self) -> Result<String, SessionEndReason> {
        let refresh_token = self
            .store
            .get()
            .and_then(|c| c.refresh_token().map(|t| Zeroizing::new(t.to_string())))
            .ok_or(SessionEndReason::MissingRefreshToken)?;

        let request = ApiRequest::post(self.config.endpoints.refresh.as_str())
            .anonymous()
            .json(&RefreshRequest {
                refresh_token: refresh_token.as_str(),
            })
            .map_err(|e| SessionEndReason::RefreshUnavailable(e.to_string()))?;

        let response = self
            .dispatch(&request)
            .await
            .map_err(|e| SessionEndReason::RefreshUnavailable(e.to_string()))?;
        if !response.is_success() {
            return Err(SessionEndReason::RefreshRejected {
                status: response.status,
            });
        }
        let body: RefreshResponse = response
            .json()
            .map_err(|e| SessionEndReason::RefreshUnavailable(e.to_string()))?;

        if let Err(e) = self.store.replace_access_token(&body.access_token) {
            tracing::warn!(error = %e, "Could not persist refreshed token, using it for this session only");
        }
        Ok(body.access_token)
    }

    // ─── Internals ───────────────────────────────────────────

    /// One bounded dispatch. No retry, no status interpretation.
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let limit = self.config.request_timeout;
        tracing::debug!(
            request = %request.id,
            method = %request.method,
            path = %request.path,
            retried = request.retried,
            "Dispatching"
        );

        match tokio::time::timeout(limit, self.transport.dispatch(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                let after_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(request = %request.id, path = %request.path, after_ms, "Request timed out");
                Err(ApiError::Timeout { after_ms })
            }
        }
    }

    /// Clear credentials and notify subscribers.
    pub(crate) fn end_session(&self, reason: SessionEndReason) {
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to clear session store");
        }
        self.set_cached_user(None);
        tracing::info!(reason = %reason, "Session ended");
        self.emit(SessionEvent::Ended { reason });
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // Err only means nobody is subscribed.
        let _ = self.events.send(event);
    }

    pub(crate) fn cached_user(&self) -> Option<UserProfile> {
        self.user_slot().clone()
    }

    pub(crate) fn set_cached_user(&self, user: Option<UserProfile>) {
        *self.user_slot() = user;
    }

    fn user_slot(&self) -> MutexGuard<'_, Option<UserProfile>> {
        self.cached_user.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::future::join_all;
    use serde_json::json;

    use super::*;
    use crate::api::mock::{ok_json, status, MockTransport};
    use crate::session_store::{Credentials, MemorySessionStore};

    const REFRESH: &str = "/auth/refresh";

    fn client_with(
        mock: MockTransport,
        store: Arc<MemorySessionStore>,
    ) -> AuthenticatedClient<MockTransport> {
        let config = ClientConfig::default().with_request_timeout(Duration::from_millis(500));
        AuthenticatedClient::new(mock, store, config)
    }

    fn signed_in(access: &str, refresh: &str) -> Arc<MemorySessionStore> {
        Arc::new(MemorySessionStore::with_credentials(Credentials::new(
            access, refresh,
        )))
    }

    /// Backend that accepts only `A2` and refreshes to `A2`.
    fn rotating_backend() -> MockTransport {
        MockTransport::new(|req| {
            if req.path == REFRESH {
                ok_json(json!({ "accessToken": "A2" }))
            } else if req.bearer.as_deref() == Some("A2") {
                ok_json(json!({ "ok": true }))
            } else {
                status(401)
            }
        })
    }

    #[tokio::test]
    async fn attaches_stored_access_token() {
        let store = signed_in("A1", "R1");
        let client = client_with(MockTransport::new(|_| ok_json(json!({}))), store);

        client.send(ApiRequest::get("/status/1")).await.unwrap();

        let calls = client.transport().calls();
        assert_eq!(calls[0].bearer.as_deref(), Some("A1"));
        assert!(!calls[0].retried);
    }

    #[tokio::test]
    async fn other_statuses_returned_as_is() {
        let store = signed_in("A1", "R1");
        let client = client_with(MockTransport::new(|_| status(500)), store);

        let response = client.send(ApiRequest::get("/status/1")).await.unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(client.transport().call_count(REFRESH), 0);
        assert_eq!(client.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_refresh() {
        let store = signed_in("A1", "R1");
        let mock = rotating_backend()
            .with_delay(Duration::from_millis(20))
            .with_path_delay(REFRESH, Duration::from_millis(50));
        let client = client_with(mock, store.clone());

        let paths = ["/status/1", "/status/2", "/status/3"];
        let results = join_all(paths.iter().map(|p| client.send(ApiRequest::get(*p)))).await;

        for result in &results {
            assert_eq!(result.as_ref().unwrap().status, 200);
        }
        let mock = client.transport();
        assert_eq!(mock.call_count(REFRESH), 1);
        for path in paths {
            let calls = mock.calls_to(path);
            assert_eq!(calls.len(), 2, "{path} should be dispatched twice");
            assert_eq!(calls[0].bearer.as_deref(), Some("A1"));
            assert_eq!(calls[1].bearer.as_deref(), Some("A2"));
            assert!(calls[1].retried);
        }
        assert_eq!(store.get().unwrap(), Credentials::new("A2", "R1"));
        assert_eq!(client.refresh_state(), RefreshState::Idle);
        assert_eq!(client.queued_requests(), 0);
    }

    #[tokio::test]
    async fn queued_request_takes_over_when_refreshing_caller_is_dropped() {
        let store = signed_in("A1", "R1");
        let mock = rotating_backend().with_path_delay(REFRESH, Duration::from_millis(100));
        let client = Arc::new(client_with(mock, store.clone()));
        let mut events = client.subscribe_session_events();

        let leader = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                tokio::time::timeout(
                    Duration::from_millis(30),
                    client.send(ApiRequest::get("/status/1")),
                )
                .await
            })
        };
        let follower = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                client.send(ApiRequest::get("/status/2")).await
            })
        };

        assert!(leader.await.unwrap().is_err());
        let response = follower.await.unwrap().unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(client.transport().call_count(REFRESH), 2);
        assert_eq!(store.get().unwrap(), Credentials::new("A2", "R1"));
        assert_eq!(client.refresh_state(), RefreshState::Idle);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn refresh_call_is_anonymous_and_carries_refresh_token() {
        let store = signed_in("A1", "R1");
        let client = client_with(rotating_backend(), store);

        client.send(ApiRequest::get("/status/1")).await.unwrap();

        let refresh_calls = client.transport().calls_to(REFRESH);
        assert_eq!(refresh_calls.len(), 1);
        assert!(refresh_calls[0].bearer.is_none());
        assert_eq!(refresh_calls[0].body, Some(json!({ "refreshToken": "R1" })));
    }

    #[tokio::test]
    async fn refresh_failure_rejects_every_caller_and_ends_session_once() {
        let store = signed_in("A1", "R1");
        let mock = MockTransport::new(|_| status(401))
            .with_delay(Duration::from_millis(20))
            .with_path_delay(REFRESH, Duration::from_millis(50));
        let client = client_with(mock, store.clone());
        let mut events = client.subscribe_session_events();

        let paths = ["/status/1", "/status/2", "/status/3"];
        let results = join_all(paths.iter().map(|p| client.send(ApiRequest::get(*p)))).await;

        for result in results {
            match result {
                Err(ApiError::AuthExpired(SessionEndReason::RefreshRejected { status: 401 })) => {}
                other => panic!("Expected RefreshRejected, got: {other:?}"),
            }
        }
        assert_eq!(client.transport().call_count(REFRESH), 1);
        assert!(store.get().is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Ended {
                reason: SessionEndReason::RefreshRejected { status: 401 }
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_backend_call() {
        let store = signed_in("A1", "");
        let client = client_with(MockTransport::new(|_| status(401)), store.clone());

        let err = client.send(ApiRequest::get("/status/1")).await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::AuthExpired(SessionEndReason::MissingRefreshToken)
        ));
        assert_eq!(client.transport().call_count(REFRESH), 0);
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn second_401_is_fatal_and_not_retried_again() {
        let store = signed_in("A1", "R1");
        let mock = MockTransport::new(|req| {
            if req.path == REFRESH {
                ok_json(json!({ "accessToken": "A2" }))
            } else {
                status(401)
            }
        });
        let client = client_with(mock, store.clone());
        let mut events = client.subscribe_session_events();

        let err = client.send(ApiRequest::get("/status/1")).await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::AuthExpired(SessionEndReason::RejectedAfterRefresh)
        ));
        assert_eq!(client.transport().call_count("/status/1"), 2);
        assert_eq!(client.transport().call_count(REFRESH), 1);
        assert!(store.get().is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Ended {
                reason: SessionEndReason::RejectedAfterRefresh
            }
        );
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let store = signed_in("A1", "R1");
        let mock = MockTransport::new(|_| ok_json(json!({}))).with_delay(Duration::from_millis(300));
        let config = ClientConfig::default().with_request_timeout(Duration::from_millis(50));
        let client = AuthenticatedClient::new(mock, store, config);

        let err = client.send(ApiRequest::get("/status/1")).await.unwrap_err();

        assert!(matches!(err, ApiError::Timeout { after_ms: 50 }));
    }

    #[tokio::test]
    async fn refresh_timeout_counts_as_refresh_failure() {
        let store = signed_in("A1", "R1");
        let mock = MockTransport::new(|_| status(401))
            .with_path_delay(REFRESH, Duration::from_millis(300));
        let config = ClientConfig::default().with_request_timeout(Duration::from_millis(50));
        let client = AuthenticatedClient::new(mock, store.clone(), config);

        let err = client.send(ApiRequest::get("/status/1")).await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::AuthExpired(SessionEndReason::RefreshUnavailable(_))
        ));
        assert!(store.get().is_none());
        assert_eq!(client.refresh_state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn anonymous_requests_skip_bearer_and_refresh() {
        let store = signed_in("A1", "R1");
        let client = client_with(MockTransport::new(|_| status(401)), store.clone());

        let response = client
            .send(ApiRequest::post("/auth/jwt/create").anonymous())
            .await
            .unwrap();

        assert_eq!(response.status, 401);
        assert!(client.transport().calls()[0].bearer.is_none());
        assert_eq!(client.transport().call_count(REFRESH), 0);
        assert!(store.get().is_some());
    }

    #[tokio::test]
    async fn rotated_token_is_reused_without_refresh() {
        let store = signed_in("A1", "R1");
        let backend_store = store.clone();
        let mock = MockTransport::new(move |req| match req.bearer.as_deref() {
            Some("A1") => {
                // Another caller rotated the token mid-flight.
                backend_store.set(Credentials::new("A2", "R1")).unwrap();
                status(401)
            }
            Some("A2") => ok_json(json!({})),
            _ => status(401),
        });
        let client = client_with(mock, store);

        let response = client.send(ApiRequest::get("/status/1")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(client.transport().call_count(REFRESH), 0);
    }

    #[tokio::test]
    async fn send_json_decodes_and_maps_status() {
        let store = signed_in("A1", "R1");
        let mock = MockTransport::new(|req| {
            if req.path == "/ok" {
                ok_json(json!({ "id": 3, "username": "asha", "role": "doctor" }))
            } else {
                Ok(ApiResponse::new(404, "missing"))
            }
        });
        let client = client_with(mock, store);

        let user: UserProfile = client.send_json(ApiRequest::get("/ok")).await.unwrap();
        assert_eq!(user.username, "asha");

        let err = client
            .send_json::<UserProfile>(ApiRequest::get("/gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
    }
}
