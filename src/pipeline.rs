//! Document pipeline shared by the HTTP handlers:
//! 1. Normalize the upload
//! 2. Run the stage sequence for the document kind
//! 3. Reconcile stage outputs into a canonical record
//! 4. Score the policy (insurance documents)
//! 5. Persist, one record at a time
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db_storage::RecordStore;
use crate::errors::AppError;
use crate::intake::{normalize, RawUpload};
use crate::llm_client::LlmService;
use crate::models::{CanonicalRecord, DocumentKind, Outcome, PolicyEvaluation, StoredRecord};
use crate::orchestrator::{degradation_reason, Orchestrator};
use crate::prompts::{evaluation_only_stages, stages_for, STAGE_EVALUATE};
use crate::reconciler::canonicalize;
use crate::scoring;

/// One document in an upload request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpload {
    pub document_kind: DocumentKind,
    #[serde(flatten)]
    pub upload: RawUpload,
}

/// A reconciled document, with its policy evaluation for insurance uploads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDocument {
    pub record: CanonicalRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<PolicyEvaluation>,
}

/// Runs one upload through intake, the stage sequence and reconciliation.
///
/// Intake errors fail before any stage runs. Stage failures degrade the
/// result but still produce a record.
pub async fn process_document<L: LlmService>(
    orchestrator: &Orchestrator<L>,
    upload: &RawUpload,
    kind: DocumentKind,
    max_bytes: u64,
) -> Outcome<ProcessedDocument> {
    tracing::info!("Step 1: Normalizing {:?} upload", kind);
    let ingest = match normalize(upload, max_bytes) {
        Ok(ingest) => ingest,
        Err(e) => {
            tracing::warn!("✗ Upload rejected at intake: {}", e);
            return Outcome::Failed(e);
        }
    };

    tracing::info!("Step 2: Running {:?} stages ({} bytes)", kind, ingest.size_bytes);
    let results = orchestrator.run(&ingest, &stages_for(kind)).await;

    tracing::info!("Step 3: Reconciling {} stage result(s)", results.len());
    let record = canonicalize(&results, kind);

    let evaluation = match kind {
        DocumentKind::Insurance => {
            tracing::info!("Step 4: Scoring policy");
            let raw = results
                .iter()
                .find(|r| r.stage_id == STAGE_EVALUATE && r.succeeded)
                .map(|r| r.raw_output.as_str())
                .unwrap_or_default();
            Some(scoring::score(raw))
        }
        DocumentKind::Medical => None,
    };

    let processed = ProcessedDocument { record, evaluation };
    match degradation_reason(&results) {
        Some(reason) => {
            tracing::warn!("⚠ Document processed with degraded stages: {}", reason);
            Outcome::Degraded {
                value: processed,
                reason,
            }
        }
        None => {
            tracing::info!(
                "✓ Document processed ({} missing field(s))",
                processed.record.missing_fields().len()
            );
            Outcome::Ok(processed)
        }
    }
}

/// Scores a policy directly from its text with the single evaluate stage.
pub async fn evaluate_policy<L: LlmService>(
    orchestrator: &Orchestrator<L>,
    upload: &RawUpload,
    max_bytes: u64,
) -> Outcome<PolicyEvaluation> {
    let ingest = match normalize(upload, max_bytes) {
        Ok(ingest) => ingest,
        Err(e) => return Outcome::Failed(e),
    };

    let results = orchestrator.run(&ingest, &evaluation_only_stages()).await;
    let Some(stage) = results.first().filter(|r| r.succeeded) else {
        let reason = degradation_reason(&results)
            .unwrap_or_else(|| "evaluate stage did not run".to_string());
        return Outcome::Degraded {
            value: scoring::default_evaluation(),
            reason,
        };
    };

    match scoring::try_score(&stage.raw_output) {
        Ok(evaluation) => Outcome::Ok(evaluation),
        Err(e) => Outcome::Degraded {
            value: scoring::default_evaluation(),
            reason: e.to_string(),
        },
    }
}

/// Ordered outcomes of a batch, one per upload.
#[derive(Debug, Default)]
pub struct BatchAccumulator {
    outcomes: Vec<Outcome<ProcessedDocument>>,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: Outcome<ProcessedDocument>) {
        self.outcomes.push(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> &[Outcome<ProcessedDocument>] {
        &self.outcomes
    }

    pub fn degraded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_degraded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn into_outcomes(self) -> Vec<Outcome<ProcessedDocument>> {
        self.outcomes
    }
}

/// Processes uploads one after another, appending each outcome to `acc`.
pub async fn process_batch<L: LlmService>(
    orchestrator: &Orchestrator<L>,
    uploads: &[DocumentUpload],
    max_bytes: u64,
    mut acc: BatchAccumulator,
) -> BatchAccumulator {
    for (idx, document) in uploads.iter().enumerate() {
        tracing::info!("Processing document {}/{}", idx + 1, uploads.len());
        let outcome =
            process_document(orchestrator, &document.upload, document.document_kind, max_bytes)
                .await;
        acc.push(outcome);
    }

    tracing::info!(
        "Batch complete: {} document(s), {} degraded, {} failed",
        acc.len(),
        acc.degraded_count(),
        acc.failed_count()
    );
    acc
}

async fn save_record<S: RecordStore>(
    store: &S,
    user_id: &str,
    record: &CanonicalRecord,
) -> Result<Uuid, AppError> {
    match record {
        CanonicalRecord::Medical(r) => {
            store
                .upsert_medical(&StoredRecord::new(user_id, r.clone()))
                .await
        }
        CanonicalRecord::Insurance(p) => {
            store
                .upsert_policy(&StoredRecord::new(user_id, p.clone()))
                .await
        }
    }
}

/// Persists every processed record, one write per record.
///
/// Not transactional: a failed write is reported for that record only and
/// the remaining records are still attempted.
pub async fn save_batch<S: RecordStore>(
    store: &S,
    user_id: &str,
    acc: &BatchAccumulator,
) -> Vec<Outcome<Uuid>> {
    let mut saved = Vec::with_capacity(acc.len());

    for (idx, outcome) in acc.outcomes().iter().enumerate() {
        let result = match outcome {
            Outcome::Failed(e) => Outcome::Failed(e.clone()),
            Outcome::Ok(doc) => match save_record(store, user_id, &doc.record).await {
                Ok(id) => Outcome::Ok(id),
                Err(e) => Outcome::Failed(e),
            },
            Outcome::Degraded { value, reason } => {
                match save_record(store, user_id, &value.record).await {
                    Ok(id) => Outcome::Degraded {
                        value: id,
                        reason: reason.clone(),
                    },
                    Err(e) => Outcome::Failed(e),
                }
            }
        };

        match &result {
            Outcome::Failed(e) if !outcome.is_failed() => {
                tracing::error!("✗ Failed to store document {}: {}", idx + 1, e)
            }
            Outcome::Ok(id) | Outcome::Degraded { value: id, .. } => {
                tracing::info!("✓ Stored document {} → id: {}", idx + 1, id)
            }
            Outcome::Failed(_) => {}
        }
        saved.push(result);
    }

    saved
}

/// JSON summary of a processed-and-saved batch.
pub fn batch_report(acc: &BatchAccumulator, saved: &[Outcome<Uuid>]) -> Value {
    let documents: Vec<Value> = acc
        .outcomes()
        .iter()
        .zip(saved)
        .map(|(processed, stored)| {
            let mut entry = processed.to_json();
            if let Some(id) = stored.value() {
                entry["id"] = json!(id);
            }
            if let Outcome::Failed(e) = stored {
                entry["saved"] = json!(false);
                entry["saveError"] = json!(e.to_string());
            } else {
                entry["saved"] = json!(true);
            }
            entry
        })
        .collect();

    json!({
        "total": acc.len(),
        "degraded": acc.degraded_count(),
        "failed": acc.failed_count(),
        "documents": documents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_storage::MemoryRecordStore;
    use crate::llm_client::LlmRequest;
    use crate::models::{CanonicalInsurancePolicy, CanonicalMedicalRecord, ClaimDraft};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every stage from the system prompt alone.
    struct CannedLlm;

    impl LlmService for CannedLlm {
        async fn complete(&self, request: &LlmRequest) -> Result<String, AppError> {
            if request.system.contains("reviewer") {
                return Ok("not json".to_string());
            }
            if request.system.contains("convert") {
                return Ok(r#"{"flattenedFields": {"hospital": "NTUH", "insuranceCompany": "Cathay Life"}}"#.to_string());
            }
            if request.system.contains("analyst") {
                return Ok(r#"{"isAccidentRelated": false}"#.to_string());
            }
            Ok("- facts".to_string())
        }
    }

    fn text(t: &str) -> RawUpload {
        RawUpload::Text {
            text: t.to_string(),
        }
    }

    #[tokio::test]
    async fn test_intake_error_fails_before_stages() {
        let orchestrator = Orchestrator::new(CannedLlm);
        let outcome = process_document(&orchestrator, &text("   "), DocumentKind::Medical, 1024).await;
        assert!(matches!(outcome, Outcome::Failed(AppError::Ingest(_))));
    }

    #[tokio::test]
    async fn test_insurance_document_gets_default_score_on_bad_json() {
        let orchestrator = Orchestrator::new(CannedLlm);
        let outcome =
            process_document(&orchestrator, &text("policy"), DocumentKind::Insurance, 1024).await;
        // evaluate stage returned prose, so the run is degraded
        assert!(outcome.is_degraded());
        let doc = outcome.into_value().unwrap();
        assert_eq!(doc.evaluation, Some(scoring::default_evaluation()));
        let CanonicalRecord::Insurance(policy) = doc.record else {
            panic!("expected a policy");
        };
        assert_eq!(policy.company.as_deref(), Some("Cathay Life"));
    }

    #[tokio::test]
    async fn test_batch_save_reports_per_record() {
        let orchestrator = Orchestrator::new(CannedLlm);
        let uploads = vec![
            DocumentUpload {
                document_kind: DocumentKind::Medical,
                upload: text("visit"),
            },
            DocumentUpload {
                document_kind: DocumentKind::Medical,
                upload: text(""),
            },
        ];
        let acc = process_batch(&orchestrator, &uploads, 1024, BatchAccumulator::new()).await;
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.failed_count(), 1);

        let store = MemoryRecordStore::new();
        let saved = save_batch(&store, "user-1", &acc).await;
        let id = *saved[0].value().unwrap();
        assert!(saved[1].is_failed());
        let stored = store.get_medical(id).await.unwrap().unwrap();
        assert_eq!(stored.record.hospital.as_deref(), Some("NTUH"));

        let report = batch_report(&acc, &saved);
        assert_eq!(report["total"], 2);
        assert_eq!(report["documents"][0]["saved"], true);
        assert_eq!(report["documents"][1]["saved"], false);
    }

    /// Memory store whose `fail_on`-th record write (1-based) fails.
    struct FlakyStore {
        inner: MemoryRecordStore,
        writes: AtomicUsize,
        fail_on: usize,
    }

    impl FlakyStore {
        fn new(fail_on: usize) -> Self {
            Self {
                inner: MemoryRecordStore::new(),
                writes: AtomicUsize::new(0),
                fail_on,
            }
        }

        fn check(&self) -> Result<(), AppError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(AppError::Persistence(sqlx::Error::Protocol(
                    "connection reset".to_string(),
                )));
            }
            Ok(())
        }
    }

    impl RecordStore for FlakyStore {
        async fn upsert_medical(
            &self,
            record: &StoredRecord<CanonicalMedicalRecord>,
        ) -> Result<Uuid, AppError> {
            self.check()?;
            self.inner.upsert_medical(record).await
        }

        async fn upsert_policy(
            &self,
            policy: &StoredRecord<CanonicalInsurancePolicy>,
        ) -> Result<Uuid, AppError> {
            self.check()?;
            self.inner.upsert_policy(policy).await
        }

        async fn upsert_claim(&self, claim: &StoredRecord<ClaimDraft>) -> Result<Uuid, AppError> {
            self.check()?;
            self.inner.upsert_claim(claim).await
        }

        async fn get_medical(
            &self,
            id: Uuid,
        ) -> Result<Option<StoredRecord<CanonicalMedicalRecord>>, AppError> {
            self.inner.get_medical(id).await
        }

        async fn get_policy(
            &self,
            id: Uuid,
        ) -> Result<Option<StoredRecord<CanonicalInsurancePolicy>>, AppError> {
            self.inner.get_policy(id).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_midway_keeps_other_records() {
        let orchestrator = Orchestrator::new(CannedLlm);
        let uploads: Vec<DocumentUpload> = ["first visit", "second visit", "third visit"]
            .iter()
            .map(|t| DocumentUpload {
                document_kind: DocumentKind::Medical,
                upload: text(t),
            })
            .collect();
        let acc = process_batch(&orchestrator, &uploads, 1024, BatchAccumulator::new()).await;
        assert_eq!(acc.failed_count(), 0);

        let store = FlakyStore::new(2);
        let saved = save_batch(&store, "user-1", &acc).await;
        assert_eq!(saved.len(), 3);
        assert!(!saved[0].is_failed());
        assert!(matches!(saved[1], Outcome::Failed(AppError::Persistence(_))));
        assert!(!saved[2].is_failed());
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);

        let first = *saved[0].value().unwrap();
        let third = *saved[2].value().unwrap();
        assert_ne!(first, third);
        assert!(store.get_medical(first).await.unwrap().is_some());
        assert!(store.get_medical(third).await.unwrap().is_some());

        let report = batch_report(&acc, &saved);
        let documents = report["documents"].as_array().unwrap();
        let flags: Vec<&Value> = documents.iter().map(|d| &d["saved"]).collect();
        assert_eq!(flags, vec![&json!(true), &json!(false), &json!(true)]);
        assert!(documents[0].get("saveError").is_none());
        assert!(documents[1]["saveError"].as_str().unwrap().contains("connection reset"));
        assert!(documents[1].get("id").is_none());
        assert!(documents[2].get("saveError").is_none());
        assert_eq!(documents[2]["id"], json!(third));
    }

    #[test]
    fn test_document_upload_wire_format() {
        let upload: DocumentUpload = serde_json::from_value(json!({
            "documentKind": "insurance",
            "kind": "text",
            "text": "Policy No. A123"
        }))
        .unwrap();
        assert_eq!(upload.document_kind, DocumentKind::Insurance);
        assert!(matches!(upload.upload, RawUpload::Text { .. }));
    }
}
