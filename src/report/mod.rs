//! Report view: sections, on-demand generation, doctor remarks.

pub mod coordinator;
pub mod loader;
pub mod lock;
pub mod registry;
pub mod types;

pub use coordinator::{CoordinatorError, GenerationCoordinator, SectionOutcome};
pub use loader::{load_report, submit_remark, ModelOutput, Rating, ReportDetails, SECTION_TITLES};
pub use lock::{ActiveGeneration, GenerationGuard, GenerationLock};
pub use registry::{RegistryError, SectionRegistry};
pub use types::{RemoteStatus, ReportId, Section, SectionId, SectionSeed, SectionStatus};
