//! Report details and doctor remarks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ReportId, SectionSeed};
use crate::api::{ApiError, ApiRequest, AuthenticatedClient, Transport};

/// Display titles of the generated sections. Section `N` (1-based) is
/// backed by `model_output.output_text_N`.
pub const SECTION_TITLES: [&str; 10] = [
    "Initial Diagnosis",
    "Primary Diagnosis",
    "Organ Impact",
    "Executive Summary",
    "Clinical Analysis",
    "Urgent Alerts",
    "Recommended Actions",
    "Treatment Plan & Recommendations",
    "Prognostic Insights",
    "Attachments",
];

// ═══════════════════════════════════════════════════════════
// ReportDetails
// ═══════════════════════════════════════════════════════════

/// Everything the backend knows about one report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDetails {
    #[serde(default)]
    pub model_output: ModelOutput,
    #[serde(default)]
    pub patient_data: Value,
    #[serde(default)]
    pub previous_visits: Option<Vec<Value>>,
}

/// Generated text plus the reviewing doctor's feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    #[serde(default)]
    pub doctor_comment: Option<String>,
    #[serde(default)]
    pub doctor_remark: Option<String>,
    /// `output_text_N`, `symptoms`, `history` and anything newer.
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl ModelOutput {
    /// Text of section `n` (1-based), if the backend already produced it.
    pub fn output_text(&self, n: usize) -> Option<String> {
        self.text_field(&format!("output_text_{n}"))
    }

    /// Any scalar field as text. Null and empty strings count as absent.
    pub fn text_field(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            Value::Number(n) => Some(n.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Rating left by a doctor, if it is one of the known labels.
    pub fn rating(&self) -> Option<Rating> {
        self.doctor_remark.as_deref()?.parse().ok()
    }
}

impl ReportDetails {
    pub fn previous_visits(&self) -> &[Value] {
        self.previous_visits.as_deref().unwrap_or_default()
    }

    /// One seed per section, prefilled where text already exists.
    pub fn section_seeds(&self) -> Vec<SectionSeed> {
        SECTION_TITLES
            .iter()
            .enumerate()
            .map(|(idx, title)| {
                let n = idx + 1;
                let seed = SectionSeed::new(n.to_string(), *title);
                match self.model_output.output_text(n) {
                    Some(text) => seed.with_content(text),
                    None => seed,
                }
            })
            .collect()
    }
}

/// Fetch the report with its generated sections.
pub async fn load_report<T: Transport>(
    client: &AuthenticatedClient<T>,
    report_id: &ReportId,
) -> Result<ReportDetails, ApiError> {
    let path = format!(
        "{}/{}",
        client.config().endpoints.report.trim_end_matches('/'),
        report_id
    );
    let details: ReportDetails = client.send_json(ApiRequest::get(path)).await?;
    tracing::debug!(
        report = %report_id,
        visits = details.previous_visits().len(),
        "Report loaded"
    );
    Ok(details)
}

// ═══════════════════════════════════════════════════════════
// Doctor remarks
// ═══════════════════════════════════════════════════════════

/// Doctor's verdict on a generated report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    Excellent,
    Good,
    Average,
    Poor,
    Bad,
}

impl Rating {
    pub const ALL: [Rating; 5] = [
        Rating::Excellent,
        Rating::Good,
        Rating::Average,
        Rating::Poor,
        Rating::Bad,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Average => "Average",
            Self::Poor => "Poor",
            Self::Bad => "Bad",
        }
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown rating: {0}")]
pub struct UnknownRating(String);

impl std::str::FromStr for Rating {
    type Err = UnknownRating;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRating(s.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct RemarkRequest<'a> {
    output_id: &'a str,
    remark: Rating,
    comment: &'a str,
}

/// Record a doctor's rating and comment on a report.
pub async fn submit_remark<T: Transport>(
    client: &AuthenticatedClient<T>,
    report_id: &ReportId,
    rating: Rating,
    comment: &str,
) -> Result<(), ApiError> {
    let request = ApiRequest::post(client.config().endpoints.doctor_remark.as_str()).json(
        &RemarkRequest {
            output_id: report_id.as_str(),
            remark: rating,
            comment: comment.trim(),
        },
    )?;
    client.send(request).await?.error_for_status()?;
    tracing::info!(report = %report_id, %rating, "Doctor remark submitted");
    Ok(())
}
