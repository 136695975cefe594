//! Generation coordinator: on-demand section generation for one report view.
//!
//! `request_section` drives a section through
//! `Checking → (WaitingRemote | Generating → Ready | Error)`. A single
//! [`GenerationLock`] covers the whole report, so at most one section is
//! checked or generated at a time and concurrent requests get `Busy`.
//!
//! The busy check, cache check, lock acquisition and the move to `Checking`
//! all happen under the registry mutex before the first `.await`, which makes
//! "first requester wins" hold on any runtime.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::lock::{ActiveGeneration, GenerationGuard, GenerationLock};
use super::registry::{RegistryError, SectionRegistry};
use super::types::{
    GenerateRequest, GenerateResponse, RemoteStatus, ReportId, Section, SectionId, SectionSeed,
    SectionStatus, StatusCheckResponse,
};
use crate::api::{ApiError, ApiRequest, AuthenticatedClient, SessionEndReason, Transport};

/// How a request for a section was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionOutcome {
    /// Served from the registry, no network call.
    Cached(String),
    /// Freshly generated by the backend.
    Generated(String),
    /// The backend is already generating it; re-request later.
    WaitingRemote,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Another section is being generated")]
    Busy { active: Option<SectionId> },
    #[error("Unknown section: {0}")]
    UnknownSection(SectionId),
    #[error("Generation failed for section {section}: {reason}")]
    GenerationFailed { section: SectionId, reason: String },
    #[error("Session ended: {0}")]
    SessionEnded(SessionEndReason),
    #[error("Registry error: {0}")]
    Registry(RegistryError),
    #[error("Internal lock error")]
    LockPoisoned,
}

impl From<RegistryError> for CoordinatorError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownSection(id) => Self::UnknownSection(id),
            other => Self::Registry(other),
        }
    }
}

type RequestResult = Result<SectionOutcome, CoordinatorError>;

/// Outcome of the synchronous half of a request.
enum Start {
    Cached(String),
    Run(GenerationGuard),
}

/// One in-flight attempt. Dropped before it settles (the request future was
/// cancelled), it moves the section to `Error`, then releases the lock.
struct Attempt<'a, T: Transport> {
    coordinator: &'a GenerationCoordinator<T>,
    id: SectionId,
    settled: bool,
    _guard: GenerationGuard,
}

impl<T: Transport> Drop for Attempt<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!(section = %self.id, "Generation request dropped before completion");
        if let Err(e) = self.coordinator.transition(&self.id, SectionStatus::Error) {
            tracing::debug!(section = %self.id, error = %e, "Section gone before cancellation cleanup");
        }
    }
}

pub struct GenerationCoordinator<T: Transport> {
    client: Arc<AuthenticatedClient<T>>,
    report_id: ReportId,
    registry: Mutex<SectionRegistry>,
    lock: GenerationLock,
    updates: watch::Sender<Vec<Section>>,
}

impl<T: Transport> GenerationCoordinator<T> {
    pub fn new(
        client: Arc<AuthenticatedClient<T>>,
        report_id: ReportId,
        seeds: impl IntoIterator<Item = SectionSeed>,
    ) -> Result<Self, CoordinatorError> {
        let mut registry = SectionRegistry::new();
        registry.initialize(seeds)?;
        let (updates, _) = watch::channel(registry.snapshot());

        tracing::debug!(report = %report_id, sections = registry.len(), "Report view initialized");
        Ok(Self {
            client,
            report_id,
            registry: Mutex::new(registry),
            lock: GenerationLock::new(),
            updates,
        })
    }

    pub fn report_id(&self) -> &ReportId {
        &self.report_id
    }

    /// Bring a section up to date and wait for the result.
    ///
    /// # Errors
    ///
    /// - `Busy` if any section of this report is being checked or generated
    /// - `GenerationFailed` / `SessionEnded` after the section was moved to `Error`
    pub async fn request_section(&self, id: &SectionId, force_reload: bool) -> RequestResult {
        match self.begin(id, force_reload)? {
            Start::Cached(content) => Ok(SectionOutcome::Cached(content)),
            Start::Run(guard) => self.run(id.clone(), force_reload, guard).await,
        }
    }

    /// Fire-and-forget form of [`request_section`](Self::request_section).
    ///
    /// `Busy` and unknown ids are reported before anything is spawned; progress
    /// is observed through [`subscribe`](Self::subscribe) or [`snapshot`](Self::snapshot).
    pub fn spawn_request(
        self: &Arc<Self>,
        id: &SectionId,
        force_reload: bool,
    ) -> Result<JoinHandle<RequestResult>, CoordinatorError> {
        match self.begin(id, force_reload)? {
            Start::Cached(content) => {
                Ok(tokio::spawn(async move { Ok(SectionOutcome::Cached(content)) }))
            }
            Start::Run(guard) => {
                let this = Arc::clone(self);
                let id = id.clone();
                Ok(tokio::spawn(async move { this.run(id, force_reload, guard).await }))
            }
        }
    }

    // ─── Observation ─────────────────────────────────────────

    /// All sections in display order.
    pub fn snapshot(&self) -> Vec<Section> {
        self.updates.borrow().clone()
    }

    pub fn section(&self, id: &SectionId) -> Result<Section, CoordinatorError> {
        Ok(self.registry()?.get(id)?.clone())
    }

    /// Receiver updated after every status or content change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Section>> {
        self.updates.subscribe()
    }

    pub fn is_generating(&self) -> bool {
        self.lock.is_busy()
    }

    pub fn active_generation(&self) -> Option<ActiveGeneration> {
        self.lock.current()
    }

    /// Drop all sections. In-flight work finishes without touching the view.
    pub fn discard(&self) -> Result<(), CoordinatorError> {
        let mut registry = self.registry()?;
        registry.clear();
        self.publish(&registry);
        tracing::debug!(report = %self.report_id, "Report view discarded");
        Ok(())
    }

    // ─── Request phases ──────────────────────────────────────

    fn begin(&self, id: &SectionId, force_reload: bool) -> Result<Start, CoordinatorError> {
        let mut registry = self.registry()?;

        if self.lock.is_busy() {
            return Err(self.busy());
        }

        let section = registry.get(id)?;
        if !force_reload && section.status == SectionStatus::Ready {
            if let Some(content) = &section.content {
                tracing::debug!(report = %self.report_id, section = %id, "Serving cached section");
                return Ok(Start::Cached(content.clone()));
            }
        }

        let guard = self
            .lock
            .try_acquire(id, force_reload)
            .ok_or_else(|| self.busy())?;
        registry.set_status(id, SectionStatus::Checking)?;
        self.publish(&registry);

        Ok(Start::Run(guard))
    }

    /// Holds the lock for the whole attempt. The lock is released on every
    /// return path, including when this future is dropped.
    async fn run(&self, id: SectionId, force_reload: bool, guard: GenerationGuard) -> RequestResult {
        let mut attempt = Attempt {
            coordinator: self,
            id,
            settled: false,
            _guard: guard,
        };
        let result = self.check_and_generate(&attempt.id, force_reload).await;
        attempt.settled = true;
        result
    }

    async fn check_and_generate(&self, id: &SectionId, force_reload: bool) -> RequestResult {
        let remote = match self.check_remote(id).await {
            Ok(status) => status,
            Err(e) => return Err(self.fail(id, e)),
        };

        if remote.is_in_progress() {
            self.transition(id, SectionStatus::WaitingRemote)?;
            tracing::info!(report = %self.report_id, section = %id, ?remote, "Section already generating remotely");
            return Ok(SectionOutcome::WaitingRemote);
        }

        self.transition(id, SectionStatus::Generating)?;
        match self.generate(id, force_reload).await {
            Ok(content) => {
                let mut registry = self.registry()?;
                registry.set_content(id, content.as_str())?;
                self.publish(&registry);
                tracing::info!(report = %self.report_id, section = %id, force_reload, "Section generated");
                Ok(SectionOutcome::Generated(content))
            }
            Err(e) => Err(self.fail(id, e)),
        }
    }

    async fn check_remote(&self, id: &SectionId) -> Result<RemoteStatus, ApiError> {
        let request = ApiRequest::get(self.client.config().endpoints.section_status.as_str())
            .query("reportId", self.report_id.as_str())
            .query("sectionId", id.as_str());
        let body: StatusCheckResponse = self.client.send_json(request).await?;
        Ok(body.status())
    }

    async fn generate(&self, id: &SectionId, force_reload: bool) -> Result<String, ApiError> {
        let request = ApiRequest::put(self.client.config().endpoints.generate.as_str()).json(
            &GenerateRequest {
                report_id: self.report_id.as_str(),
                section_id: id.as_str(),
                force_reload,
            },
        )?;

        let response = self.client.send(request).await?;
        // 202: accepted but not finished, nothing to show yet.
        if response.is_accepted() {
            return Err(ApiError::Status {
                status: response.status,
                body: "generation still processing".into(),
            });
        }
        let body: GenerateResponse = response.error_for_status()?.json()?;
        Ok(body.content)
    }

    // ─── Internals ───────────────────────────────────────────

    /// Move the section to `Error` (content kept) and classify the failure.
    fn fail(&self, id: &SectionId, error: ApiError) -> CoordinatorError {
        if let Err(e) = self.transition(id, SectionStatus::Error) {
            tracing::warn!(section = %id, error = %e, "Could not mark section as failed");
        }
        tracing::warn!(report = %self.report_id, section = %id, error = %error, "Section generation failed");

        match error {
            ApiError::AuthExpired(reason) => CoordinatorError::SessionEnded(reason),
            other => CoordinatorError::GenerationFailed {
                section: id.clone(),
                reason: other.to_string(),
            },
        }
    }

    fn transition(&self, id: &SectionId, status: SectionStatus) -> Result<(), CoordinatorError> {
        let mut registry = self.registry()?;
        registry.set_status(id, status)?;
        self.publish(&registry);
        Ok(())
    }

    fn publish(&self, registry: &SectionRegistry) {
        self.updates.send_replace(registry.snapshot());
    }

    fn busy(&self) -> CoordinatorError {
        CoordinatorError::Busy {
            active: self.lock.current().map(|g| g.section_id),
        }
    }

    fn registry(&self) -> Result<MutexGuard<'_, SectionRegistry>, CoordinatorError> {
        self.registry.lock().map_err(|_| CoordinatorError::LockPoisoned)
    }
}
