use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::AppError;

// ============ Intake ============

/// How the uploaded content reached the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Image,
    Url,
}

/// Normalized upload handed to the orchestrator.
///
/// For `Url` ingests the URL itself is carried in `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIngest {
    pub kind: FileKind,
    pub text: Option<String>,
    /// `data:` URL for image uploads.
    pub image_data: Option<String>,
    pub size_bytes: u64,
}

/// Which canonical schema a document is reconciled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Medical,
    Insurance,
}

// ============ Orchestrator ============

/// Output of one orchestrator stage. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage_id: String,
    pub raw_output: String,
    pub parsed: Option<Value>,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl StageResult {
    pub fn ok(stage_id: &str, raw_output: String, parsed: Value) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            raw_output,
            parsed: Some(parsed),
            succeeded: true,
            error: None,
        }
    }

    pub fn failed(stage_id: &str, raw_output: String, error: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            raw_output,
            parsed: None,
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

// ============ Canonical records ============

/// Resolution state of a single canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    /// A real value was resolved.
    Present,
    /// Only placeholder sentinels were found.
    Placeholder,
    /// No candidate path held any value.
    Absent,
}

/// Where a canonical field came from, kept for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTrace {
    pub status: FieldStatus,
    /// `"<stageId>:<json pointer>"` of the winning candidate.
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMedicalRecord {
    pub hospital: Option<String>,
    pub department: Option<String>,
    pub doctor: Option<String>,
    pub visit_date: Option<String>,
    pub diagnosis: Option<String>,
    pub treatments: Vec<String>,
    pub medications: Vec<String>,
    pub document_title: Option<String>,
    pub certificate_type: Option<String>,
    pub icd_code: Option<String>,
    pub disease_name: Option<String>,
    pub rest_period: Option<String>,
    pub is_accident_related: bool,
    pub missing_fields: Vec<String>,
    pub has_data_issues: bool,
    /// 0–100.
    pub claim_success_rate: u8,
    #[serde(default)]
    pub field_sources: BTreeMap<String, FieldTrace>,
}

/// Confidence tier attached to a coverage line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub amount: f64,
    pub unit: String,
    pub confidence: Confidence,
    /// 0 whenever `confidence` is `Low`.
    pub estimated_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalInsurancePolicy {
    pub company: Option<String>,
    pub policy_type: Option<String>,
    pub policy_name: Option<String>,
    pub policy_number: Option<String>,
    pub effective_date: Option<String>,
    pub expiry_date: Option<String>,
    pub insured_name: Option<String>,
    pub beneficiary: Option<String>,
    pub coverage_items: Vec<CoverageItem>,
    /// Policy-specific documents the insurer asks for when claiming.
    #[serde(default)]
    pub claim_requirements: Vec<String>,
    pub missing_fields: Vec<String>,
    pub has_data_issues: bool,
    pub total_estimated_amount: f64,
    #[serde(default)]
    pub field_sources: BTreeMap<String, FieldTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CanonicalRecord {
    Medical(CanonicalMedicalRecord),
    Insurance(CanonicalInsurancePolicy),
}

impl CanonicalRecord {
    pub fn kind(&self) -> DocumentKind {
        match self {
            CanonicalRecord::Medical(_) => DocumentKind::Medical,
            CanonicalRecord::Insurance(_) => DocumentKind::Insurance,
        }
    }

    pub fn missing_fields(&self) -> &[String] {
        match self {
            CanonicalRecord::Medical(r) => &r.missing_fields,
            CanonicalRecord::Insurance(p) => &p.missing_fields,
        }
    }

    pub fn has_data_issues(&self) -> bool {
        match self {
            CanonicalRecord::Medical(r) => r.has_data_issues,
            CanonicalRecord::Insurance(p) => p.has_data_issues,
        }
    }
}

/// Persistence envelope. Identity lives outside the record so that
/// canonicalization of the same stage outputs always yields equal records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord<T> {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub record: T,
}

impl<T> StoredRecord<T> {
    pub fn new(user_id: impl Into<String>, record: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            record,
        }
    }
}

// ============ Policy evaluation ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricItemScore {
    pub name: String,
    /// One of 0, 0.5, 1.
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSection {
    /// Sum of the five item scores, 0–5.
    pub score: f64,
    pub items: Vec<RubricItemScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSections {
    pub content: EvaluationSection,
    pub pricing: EvaluationSection,
    pub company: EvaluationSection,
    pub flexibility: EvaluationSection,
}

impl EvaluationSections {
    pub fn iter(&self) -> impl Iterator<Item = &EvaluationSection> {
        [&self.content, &self.pricing, &self.company, &self.flexibility].into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluation {
    /// 0–20.
    pub total_score: f64,
    /// 1–5.
    pub star_rating: u8,
    pub recommendation: String,
    pub sections: EvaluationSections,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
}

// ============ Claims ============

/// An existing supporting upload belonging to the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    /// Free-form type label, e.g. "receipt" or "診斷證明書".
    pub document_type: String,
    pub file_ref: String,
    /// Policy the upload was attached to, if any.
    #[serde(default)]
    pub policy_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredDocument {
    pub id: String,
    pub name: String,
    pub required: bool,
    pub description: String,
    pub uploaded: bool,
    pub matched_existing_file_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimContext {
    pub required_documents: Vec<RequiredDocument>,
    pub total_estimated_amount: f64,
    /// Missing fields of the selected medical record.
    pub record_issues: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDraft {
    pub id: String,
    pub medical_record_ref: String,
    pub policy_refs: Vec<String>,
    pub total_estimated_amount: f64,
    pub created_at: DateTime<Utc>,
    pub status: ClaimStatus,
}

// ============ Outcomes ============

/// Result of a pipeline step that may have run with reduced fidelity.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Ok(T),
    /// A value is available but some stage failed along the way.
    Degraded { value: T, reason: String },
    Failed(AppError),
}

impl<T> Outcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Ok(value) | Outcome::Degraded { value, .. } => Some(value),
            Outcome::Failed(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Ok(value) | Outcome::Degraded { value, .. } => Some(value),
            Outcome::Failed(_) => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Ok(_) => "ok",
            Outcome::Degraded { .. } => "degraded",
            Outcome::Failed(_) => "failed",
        }
    }
}

impl<T: Serialize> Outcome<T> {
    pub fn to_json(&self) -> Value {
        match self {
            Outcome::Ok(value) => serde_json::json!({
                "status": "ok",
                "value": value,
            }),
            Outcome::Degraded { value, reason } => serde_json::json!({
                "status": "degraded",
                "reason": reason,
                "value": value,
            }),
            Outcome::Failed(err) => serde_json::json!({
                "status": "failed",
                "errorKind": err.kind(),
                "error": err.to_string(),
            }),
        }
    }
}
