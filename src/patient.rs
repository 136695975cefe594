//! Patient intake, lookup and the dashboard patient list.
//!
//! Intake is what creates a report: the registration form goes to the
//! backend as multipart (text fields plus scan uploads) and the reply names
//! the new report. Lookup pre-fills a returning patient and tells whether a
//! visit already has a report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::api::{ApiError, ApiRequest, AuthenticatedClient, MultipartForm, Transport};
use crate::report::ReportId;

// ═══════════════════════════════════════════════════════════
// Form choices
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicationType {
    Allopathy,
    Homeopathy,
    Ayurveda,
}

impl MedicationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allopathy => "allopathy",
            Self::Homeopathy => "homeopathy",
            Self::Ayurveda => "ayurveda",
        }
    }
}

/// Scan type of an upload. Doubles as the multipart field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentCategory {
    Mri,
    CtScan,
    Xray,
    Other,
}

impl AttachmentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mri => "mri",
            Self::CtScan => "ct_scan",
            Self::Xray => "xray",
            Self::Other => "other",
        }
    }
}

/// Creation-date window for the patient list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateFilter {
    #[default]
    All,
    Today,
    Yesterday,
    LastWeek,
    LastMonth,
    /// Older than a month.
    Archive,
}

impl DateFilter {
    /// Value of the `date_filter` query parameter. `All` sends it empty.
    pub fn as_query(self) -> &'static str {
        match self {
            Self::All => "",
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::LastWeek => "last_week",
            Self::LastMonth => "last_month",
            Self::Archive => "old",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Intake
// ═══════════════════════════════════════════════════════════

#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub category: AttachmentCategory,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("category", &self.category)
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Registration of one visit. `patient_id` is the visit id handed out by
/// the patient list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientIntake {
    pub patient_id: String,
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    pub phone: String,
    pub major_symptoms: String,
    pub medical_history: String,
    pub medication_type: Option<MedicationType>,
    pub notes: String,
    pub attachments: Vec<Attachment>,
}

impl PatientIntake {
    /// Multipart body in the backend's field naming.
    pub fn to_form(&self) -> MultipartForm {
        let mut form = MultipartForm::new()
            .text("id", self.patient_id.as_str())
            .text("name", self.name.as_str())
            .text("age", self.age.to_string())
            .text("gender", self.gender.as_str())
            .text("phone", self.phone.as_str())
            .text("majorsymptoms", self.major_symptoms.as_str())
            .text("medicalHistory", self.medical_history.as_str())
            .text(
                "medication_type",
                self.medication_type.map(MedicationType::as_str).unwrap_or(""),
            )
            .text("notes", self.notes.as_str());

        for attachment in &self.attachments {
            form = form.file(
                attachment.category.as_str(),
                attachment.file_name.as_str(),
                attachment.bytes.clone(),
            );
        }
        form
    }
}

#[derive(Debug, Deserialize)]
struct IntakeResponse {
    #[serde(deserialize_with = "id_text")]
    model_output_id: String,
}

/// Register a visit and start report generation. Returns the new report.
pub async fn submit_intake<T: Transport>(
    client: &AuthenticatedClient<T>,
    intake: &PatientIntake,
) -> Result<ReportId, ApiError> {
    let request = ApiRequest::post(client.config().endpoints.intake.as_str()).multipart(intake.to_form());
    let reply: IntakeResponse = client.send(request).await?.error_for_status()?.json()?;

    let report_id = ReportId::new(reply.model_output_id);
    tracing::info!(
        report = %report_id,
        attachments = intake.attachments.len(),
        "Patient intake submitted"
    );
    Ok(report_id)
}

// ═══════════════════════════════════════════════════════════
// Lookup
// ═══════════════════════════════════════════════════════════

/// What the backend remembers about a returning patient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PatientRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub age: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
}

/// Look a patient up by phone number. `None` for an unknown number.
pub async fn find_patient<T: Transport>(
    client: &AuthenticatedClient<T>,
    phone: &str,
) -> Result<Option<PatientRecord>, ApiError> {
    let path = join(&client.config().endpoints.patient, phone.trim());
    let response = client.send(ApiRequest::get(path)).await?;
    if response.status == 404 {
        return Ok(None);
    }
    Ok(Some(response.error_for_status()?.json()?))
}

/// Whether the visit `patient_id` already has a generated report.
pub async fn report_exists<T: Transport>(
    client: &AuthenticatedClient<T>,
    patient_id: &str,
) -> Result<bool, ApiError> {
    let path = join(&client.config().endpoints.output, patient_id);
    let response = client.send(ApiRequest::get(path)).await?;
    if response.status == 404 {
        return Ok(false);
    }
    response.error_for_status()?;
    Ok(true)
}

// ═══════════════════════════════════════════════════════════
// Patient list
// ═══════════════════════════════════════════════════════════

/// One row of the dashboard list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    #[serde(deserialize_with = "id_text")]
    pub id: String,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub patient_age: Option<String>,
    #[serde(default)]
    pub patient_gender: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub patient_mobile_number: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub model_output_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl PatientSummary {
    /// The visit's report, once intake has been submitted.
    pub fn report_id(&self) -> Option<ReportId> {
        self.model_output_id.clone().map(ReportId::new)
    }

    pub fn display_name(&self) -> &str {
        match self.patient_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => "New Patient",
        }
    }
}

#[derive(Debug, Deserialize)]
struct PatientPage {
    #[serde(default)]
    results: Vec<PatientSummary>,
}

/// Patients matching `filter` and `search`, newest first.
pub async fn list_patients<T: Transport>(
    client: &AuthenticatedClient<T>,
    filter: DateFilter,
    search: &str,
) -> Result<Vec<PatientSummary>, ApiError> {
    let request = ApiRequest::get(client.config().endpoints.patient.as_str())
        .query("date_filter", filter.as_query())
        .query("search", search.trim());
    let page: PatientPage = client.send_json(request).await?;

    let mut patients = page.results;
    // Undated rows sort last.
    patients.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    tracing::debug!(count = patients.len(), ?filter, "Patient list loaded");
    Ok(patients)
}

// ═══════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════

fn join(prefix: &str, segment: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), segment)
}

/// Ids and ages arrive as strings or numbers depending on the backend version.
#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl TextOrNumber {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

fn id_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    TextOrNumber::deserialize(deserializer).map(TextOrNumber::into_text)
}

fn opt_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<TextOrNumber>::deserialize(deserializer)?;
    Ok(value.map(TextOrNumber::into_text).filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::api::mock::{ok_json, status, MockTransport};
    use crate::config::ClientConfig;
    use crate::session_store::{Credentials, MemorySessionStore};

    fn client(mock: MockTransport) -> AuthenticatedClient<MockTransport> {
        AuthenticatedClient::new(
            mock,
            Arc::new(MemorySessionStore::with_credentials(Credentials::new("A1", "R1"))),
            ClientConfig::default(),
        )
    }

    fn intake() -> PatientIntake {
        PatientIntake {
            patient_id: "88".into(),
            name: "R. Iyer".into(),
            age: 54,
            gender: Gender::Female,
            phone: "9876543210".into(),
            major_symptoms: "fatigue, chest pain".into(),
            medical_history: "hypertension".into(),
            medication_type: None,
            notes: String::new(),
            attachments: vec![Attachment {
                category: AttachmentCategory::CtScan,
                file_name: "thorax.dcm".into(),
                bytes: vec![7; 16],
            }],
        }
    }

    #[tokio::test]
    async fn intake_posts_multipart_and_returns_report() {
        let client = client(MockTransport::new(|req| match req.path.as_str() {
            "/generate" => ok_json(json!({ "model_output_id": 512 })),
            _ => status(404),
        }));

        let report = submit_intake(&client, &intake()).await.unwrap();

        assert_eq!(report, ReportId::new("512"));
        let calls = client.transport().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, crate::api::Method::Post);
        assert_eq!(calls[0].bearer.as_deref(), Some("A1"));
        assert!(calls[0].body.is_none());

        let form = calls[0].form.as_ref().unwrap();
        assert_eq!(form.field("id"), Some("88"));
        assert_eq!(form.field("age"), Some("54"));
        assert_eq!(form.field("gender"), Some("female"));
        assert_eq!(form.field("majorsymptoms"), Some("fatigue, chest pain"));
        assert_eq!(form.field("medicalHistory"), Some("hypertension"));
        assert_eq!(form.field("medication_type"), Some(""));
        assert_eq!(form.files.len(), 1);
        assert_eq!(form.files[0].field, "ct_scan");
        assert_eq!(form.files[0].file_name, "thorax.dcm");
    }

    #[tokio::test]
    async fn intake_is_replayed_with_same_form_after_refresh() {
        let client = client(MockTransport::new(|req| match req.path.as_str() {
            "/auth/refresh" => ok_json(json!({ "accessToken": "A2" })),
            "/generate" if req.bearer.as_deref() == Some("A2") => {
                ok_json(json!({ "model_output_id": "r-9" }))
            }
            _ => status(401),
        }));

        let report = submit_intake(&client, &intake()).await.unwrap();

        assert_eq!(report, ReportId::new("r-9"));
        let calls = client.transport().calls_to("/generate");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].form, calls[1].form);
        assert!(calls[1].retried);
    }

    #[tokio::test]
    async fn intake_rejection_is_status_error() {
        let client = client(MockTransport::new(|_| status(400)));
        let err = submit_intake(&client, &intake()).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn find_patient_by_phone() {
        let client = client(MockTransport::new(|req| match req.path.as_str() {
            "/patient/9876543210" => ok_json(json!({ "name": "R. Iyer", "age": 54, "gender": "female" })),
            "/patient/0000" => status(404),
            _ => status(500),
        }));

        let record = find_patient(&client, " 9876543210 ").await.unwrap().unwrap();
        assert_eq!(record.name.as_deref(), Some("R. Iyer"));
        assert_eq!(record.age.as_deref(), Some("54"));

        assert!(find_patient(&client, "0000").await.unwrap().is_none());
        assert!(matches!(
            find_patient(&client, "1111").await,
            Err(ApiError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn report_exists_maps_404_to_false() {
        let client = client(MockTransport::new(|req| match req.path.as_str() {
            "/output/88" => ok_json(json!({ "id": 88 })),
            "/output/89" => status(404),
            _ => status(503),
        }));

        assert!(report_exists(&client, "88").await.unwrap());
        assert!(!report_exists(&client, "89").await.unwrap());
        assert!(report_exists(&client, "90").await.is_err());
    }

    #[tokio::test]
    async fn list_patients_filters_and_sorts_newest_first() {
        let client = client(MockTransport::new(|_| {
            ok_json(json!({
                "results": [
                    { "id": 1, "patient_name": "A", "created_at": "2026-03-01T08:00:00Z" },
                    { "id": "2", "patient_name": null, "created_at": null },
                    { "id": 3, "patient_name": "C", "patient_age": 61,
                      "patient_mobile_number": 9876543210u64,
                      "model_output_id": 77, "created_at": "2026-03-02T09:30:00+05:30" }
                ]
            }))
        }));

        let patients = list_patients(&client, DateFilter::LastWeek, " iyer ").await.unwrap();

        let ids: Vec<_> = patients.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
        assert_eq!(patients[0].report_id(), Some(ReportId::new("77")));
        assert_eq!(patients[0].patient_age.as_deref(), Some("61"));
        assert_eq!(patients[0].patient_mobile_number.as_deref(), Some("9876543210"));
        assert_eq!(patients[2].display_name(), "New Patient");
        assert!(patients[2].report_id().is_none());

        let call = &client.transport().calls()[0];
        assert_eq!(call.path, "/patient");
        assert_eq!(call.query_value("date_filter"), Some("last_week"));
        assert_eq!(call.query_value("search"), Some("iyer"));
    }

    #[test]
    fn all_filter_sends_empty_value() {
        assert_eq!(DateFilter::default(), DateFilter::All);
        assert_eq!(DateFilter::All.as_query(), "");
        assert_eq!(DateFilter::Archive.as_query(), "old");
    }

    #[test]
    fn medication_type_sent_when_chosen() {
        let mut intake = intake();
        intake.medication_type = Some(MedicationType::Ayurveda);
        intake.attachments.clear();
        let form = intake.to_form();
        assert_eq!(form.field("medication_type"), Some("ayurveda"));
        assert!(form.files.is_empty());
    }
}
