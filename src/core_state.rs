//! Client state root.
//!
//! `CoreState` owns the shared authenticated client and the report view
//! currently on screen. The view layer holds it in an `Arc` and calls into it
//! from any task; the report slot is an `RwLock` because reads (every
//! section click) vastly outnumber writes (open/close).

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::api::{ApiError, AuthenticatedClient, HttpTransport, SessionEvent, Transport, TransportError};
use crate::config::{self, ClientConfig, ConfigError};
use crate::report::{load_report, CoordinatorError, GenerationCoordinator, ReportDetails, ReportId};
use crate::session_store::{SessionStoreError, SqliteSessionStore};

/// An open report: backend details plus its section coordinator.
pub struct ActiveReport<T: Transport> {
    pub details: ReportDetails,
    pub sections: Arc<GenerationCoordinator<T>>,
}

impl<T: Transport> ActiveReport<T> {
    pub fn report_id(&self) -> &ReportId {
        self.sections.report_id()
    }
}

pub struct CoreState<T: Transport> {
    client: Arc<AuthenticatedClient<T>>,
    report: RwLock<Option<Arc<ActiveReport<T>>>>,
}

impl CoreState<HttpTransport> {
    /// Production wiring: env config, HTTP transport, persistent session store
    /// under the application data directory.
    pub fn from_env() -> Result<Self, CoreError> {
        let config = ClientConfig::from_env()?;
        let store = SqliteSessionStore::open(&config::session_db_path())?;
        let client = AuthenticatedClient::connect(config, Arc::new(store))?;
        Ok(Self::new(Arc::new(client)))
    }
}

impl<T: Transport> CoreState<T> {
    pub fn new(client: Arc<AuthenticatedClient<T>>) -> Self {
        Self {
            client,
            report: RwLock::new(None),
        }
    }

    pub fn client(&self) -> &Arc<AuthenticatedClient<T>> {
        &self.client
    }

    // ── Report view ─────────────────────────────────────────

    /// Load a report and make it the active view, replacing any previous one.
    pub async fn open_report(&self, report_id: ReportId) -> Result<Arc<ActiveReport<T>>, CoreError> {
        let details = load_report(&*self.client, &report_id).await?;
        let sections = GenerationCoordinator::new(
            Arc::clone(&self.client),
            report_id,
            details.section_seeds(),
        )?;
        let report = Arc::new(ActiveReport {
            details,
            sections: Arc::new(sections),
        });

        let previous = self.write_report()?.replace(Arc::clone(&report));
        if let Some(previous) = previous {
            discard(&previous);
        }
        tracing::info!(report = %report.report_id(), "Report opened");
        Ok(report)
    }

    pub fn active_report(&self) -> Result<Option<Arc<ActiveReport<T>>>, CoreError> {
        Ok(self.read_report()?.clone())
    }

    /// Close the active view. No-op when nothing is open.
    pub fn close_report(&self) -> Result<(), CoreError> {
        let previous = self.write_report()?.take();
        if let Some(previous) = previous {
            discard(&previous);
            tracing::info!(report = %previous.report_id(), "Report closed");
        }
        Ok(())
    }

    // ── Session lifecycle ───────────────────────────────────

    /// Discard the report view whenever the session ends.
    ///
    /// The task holds only a weak reference and exits once the state is
    /// dropped or the event channel closes.
    pub fn watch_session(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.client.subscribe_session_events();
        let weak: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let ended = match events.recv().await {
                    Ok(SessionEvent::Ended { reason }) => {
                        tracing::info!(reason = %reason, "Session ended, discarding report view");
                        true
                    }
                    Ok(SessionEvent::Started) => false,
                    // Missed events may include an end; assume the worst.
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session events lagged");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(state) = weak.upgrade() else {
                    break;
                };
                if ended && !state.client.is_authenticated() {
                    if let Err(e) = state.close_report() {
                        tracing::error!(error = %e, "Failed to discard report view");
                    }
                }
            }
        })
    }

    // ── Internal ────────────────────────────────────────────

    fn read_report(&self) -> Result<RwLockReadGuard<'_, Option<Arc<ActiveReport<T>>>>, CoreError> {
        self.report.read().map_err(|_| CoreError::LockPoisoned)
    }

    fn write_report(&self) -> Result<RwLockWriteGuard<'_, Option<Arc<ActiveReport<T>>>>, CoreError> {
        self.report.write().map_err(|_| CoreError::LockPoisoned)
    }
}

fn discard<T: Transport>(report: &ActiveReport<T>) {
    if let Err(e) = report.sections.discard() {
        tracing::warn!(report = %report.report_id(), error = %e, "Failed to clear report view");
    }
}

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Session store error: {0}")]
    SessionStore(#[from] SessionStoreError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("API error: {0}")]
    Api(#[from] ApiError),
    #[error("Report view error: {0}")]
    Coordinator(#[from] CoordinatorError),
}
