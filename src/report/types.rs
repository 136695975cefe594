use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════

/// Backend identifier of a generated report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one section within a report. Stable for the report's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionId(String);

impl SectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ═══════════════════════════════════════════════════════════
// Section
// ═══════════════════════════════════════════════════════════

/// Lifecycle of a section's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Never generated in this view.
    Empty,
    /// Asking the backend whether generation is already under way.
    Checking,
    /// Another generation is running remotely; re-request later.
    WaitingRemote,
    /// Generate call in flight.
    Generating,
    /// Content is cached.
    Ready,
    /// Last attempt failed. Earlier content, if any, is still shown.
    Error,
}

impl SectionStatus {
    /// Statuses that hold the generation lock.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Checking | Self::Generating)
    }
}

impl std::fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Checking => write!(f, "checking"),
            Self::WaitingRemote => write!(f, "waiting_remote"),
            Self::Generating => write!(f, "generating"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub id: SectionId,
    pub title: String,
    pub content: Option<String>,
    pub status: SectionStatus,
}

/// Initial state for one section when a report view opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSeed {
    pub id: SectionId,
    pub title: String,
    /// Content already produced by the backend. Seeds the section as ready.
    pub content: Option<String>,
}

impl SectionSeed {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: SectionId::new(id),
            title: title.into(),
            content: None,
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════
// Wire bodies
// ═══════════════════════════════════════════════════════════

/// Server-side generation state of a section.
///
/// Anything other than `pending`/`processing` means nothing is running
/// remotely; unrecognized values land in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    None,
    Pending,
    Processing,
    Done,
    #[serde(other)]
    Other,
}

impl RemoteStatus {
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusCheckResponse {
    status: Option<RemoteStatus>,
}

impl StatusCheckResponse {
    /// Missing or null status reads as `None`.
    pub fn status(&self) -> RemoteStatus {
        self.status.unwrap_or(RemoteStatus::None)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest<'a> {
    pub report_id: &'a str,
    pub section_id: &'a str,
    pub force_reload: bool,
}

/// Generate reply. Older backends answer `{"updatedText": …}`.
#[derive(Debug, Deserialize)]
pub(crate) struct GenerateResponse {
    #[serde(alias = "updatedText")]
    pub content: String,
}
