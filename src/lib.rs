pub mod api; // Authenticated request client, single-flight refresh
pub mod config;
pub mod core_state; // Client state root
pub mod db;
pub mod patient; // Intake, lookup, patient list
pub mod report; // Section registry + generation coordinator
pub mod session_store;

pub use api::{ApiError, AuthenticatedClient, SessionEndReason, SessionEvent};
pub use config::ClientConfig;
pub use core_state::{ActiveReport, CoreError, CoreState};
pub use patient::{DateFilter, PatientIntake, PatientSummary};
pub use report::{GenerationCoordinator, SectionId, SectionOutcome, SectionStatus};
pub use session_store::{Credentials, SessionStore, SqliteSessionStore};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`, falling back to [`config::default_log_filter`]. Safe to
/// call more than once; later calls are ignored.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} client v{}", config::APP_NAME, config::APP_VERSION);
    }
}
