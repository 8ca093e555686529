use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use crate::claims::{build_claim_context, ClaimWorkflow};
use crate::config::Config;
use crate::db_storage::RecordStore;
use crate::errors::AppError;
use crate::intake::RawUpload;
use crate::llm_client::LlmService;
use crate::models::{
    CanonicalInsurancePolicy, CanonicalMedicalRecord, Certificate, ClaimContext, ClaimDraft,
    Outcome, StoredRecord,
};
use crate::orchestrator::Orchestrator;
use crate::pipeline::{self, BatchAccumulator, DocumentUpload};

/// Shared application state injected into handlers.
pub struct AppState<S, L> {
    /// Canonical record store.
    pub store: S,
    /// Stage runner, built once from the LLM settings.
    pub orchestrator: Orchestrator<L>,
    /// Application configuration.
    pub config: Config,
}

/// API routes without middleware.
pub fn api_routes<S, L>() -> Router<Arc<AppState<S, L>>>
where
    S: RecordStore + 'static,
    L: LlmService + 'static,
{
    Router::new()
        .route("/api/v1/documents", post(upload_documents::<S, L>))
        .route("/api/v1/policies/evaluate", post(evaluate_policy::<S, L>))
        .route("/api/v1/claims/context", post(claim_context::<S, L>))
        .route("/api/v1/claims", post(submit_claim::<S, L>))
}

/// API routes behind the configured request body ceiling. Rate limiting and
/// tracing are added by the binary.
pub fn limited_api_routes<S, L>(config: &Config) -> Router<Arc<AppState<S, L>>>
where
    S: RecordStore + 'static,
    L: LlmService + 'static,
{
    let limit = usize::try_from(config.max_request_bytes).unwrap_or(usize::MAX);
    api_routes::<S, L>().layer(
        ServiceBuilder::new()
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(limit)),
    )
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-claims-ai",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDocumentsRequest {
    pub user_id: String,
    pub documents: Vec<DocumentUpload>,
}

/// POST /api/v1/documents
///
/// Runs each document through the pipeline, sequentially, then stores every
/// resulting record. The response carries one outcome per document.
pub async fn upload_documents<S: RecordStore, L: LlmService>(
    State(state): State<Arc<AppState<S, L>>>,
    Json(request): Json<UploadDocumentsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(
        "POST /documents - user: {}, documents: {}",
        request.user_id,
        request.documents.len()
    );

    if request.user_id.trim().is_empty() {
        return Err(AppError::BadRequest("userId is required".to_string()));
    }
    if request.documents.is_empty() {
        return Err(AppError::BadRequest(
            "At least one document is required".to_string(),
        ));
    }
    if request.documents.len() > state.config.max_documents_per_request {
        return Err(AppError::BadRequest(format!(
            "At most {} documents per request, got {}",
            state.config.max_documents_per_request,
            request.documents.len()
        )));
    }

    let acc = pipeline::process_batch(
        &state.orchestrator,
        &request.documents,
        state.config.max_upload_bytes,
        BatchAccumulator::new(),
    )
    .await;
    let saved = pipeline::save_batch(&state.store, &request.user_id, &acc).await;

    Ok(Json(pipeline::batch_report(&acc, &saved)))
}

/// POST /api/v1/policies/evaluate
///
/// Scores a policy from its text or image. Unusable model output yields the
/// default evaluation with `status: "degraded"`.
pub async fn evaluate_policy<S: RecordStore, L: LlmService>(
    State(state): State<Arc<AppState<S, L>>>,
    Json(upload): Json<RawUpload>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("POST /policies/evaluate");

    let outcome =
        pipeline::evaluate_policy(&state.orchestrator, &upload, state.config.max_upload_bytes)
            .await;
    match outcome {
        Outcome::Failed(e) => Err(e),
        other => Ok(Json(other.to_json())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimContextRequest {
    pub medical_record_id: Uuid,
    pub policy_ids: Vec<Uuid>,
    /// Supporting documents the user has already uploaded.
    #[serde(default)]
    pub certificates: Vec<Certificate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedDocument {
    pub document_id: String,
    pub file_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitClaimRequest {
    #[serde(flatten)]
    pub selection: ClaimContextRequest,
    /// Uploads made during the documents step.
    #[serde(default)]
    pub uploads: Vec<UploadedDocument>,
}

/// A stored claim: the envelope id that keys it plus the draft itself.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedClaim {
    pub record_id: Uuid,
    #[serde(flatten)]
    pub draft: ClaimDraft,
}

type ClaimInputs = (
    StoredRecord<CanonicalMedicalRecord>,
    Vec<StoredRecord<CanonicalInsurancePolicy>>,
);

async fn load_claim_inputs<S: RecordStore>(
    store: &S,
    selection: &ClaimContextRequest,
) -> Result<ClaimInputs, AppError> {
    let record = store
        .get_medical(selection.medical_record_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Medical record {} not found",
                selection.medical_record_id
            ))
        })?;

    let mut policies = Vec::with_capacity(selection.policy_ids.len());
    for policy_id in &selection.policy_ids {
        let policy = store
            .get_policy(*policy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Policy {} not found", policy_id)))?;
        if policy.user_id != record.user_id {
            return Err(AppError::BadRequest(format!(
                "Policy {} does not belong to the record's owner",
                policy_id
            )));
        }
        policies.push(policy);
    }

    Ok((record, policies))
}

/// POST /api/v1/claims/context
///
/// Builds the required-document checklist for a record and its policies.
pub async fn claim_context<S: RecordStore, L: LlmService>(
    State(state): State<Arc<AppState<S, L>>>,
    Json(request): Json<ClaimContextRequest>,
) -> Result<Json<ClaimContext>, AppError> {
    tracing::info!(
        "POST /claims/context - record: {}, policies: {}",
        request.medical_record_id,
        request.policy_ids.len()
    );

    let (record, policies) = load_claim_inputs(&state.store, &request).await?;
    Ok(Json(build_claim_context(
        &record.record,
        &policies,
        &request.certificates,
    )))
}

/// POST /api/v1/claims
///
/// Walks the claim workflow in one request and stores the pending draft.
pub async fn submit_claim<S: RecordStore, L: LlmService>(
    State(state): State<Arc<AppState<S, L>>>,
    Json(request): Json<SubmitClaimRequest>,
) -> Result<(StatusCode, Json<SubmittedClaim>), AppError> {
    tracing::info!(
        "POST /claims - record: {}, policies: {}",
        request.selection.medical_record_id,
        request.selection.policy_ids.len()
    );

    let (record, policies) = load_claim_inputs(&state.store, &request.selection).await?;
    let user_id = record.user_id.clone();

    let mut workflow = ClaimWorkflow::new();
    workflow.select_record(record)?;
    workflow.select_policies(policies, &request.selection.certificates)?;
    for upload in &request.uploads {
        workflow.mark_uploaded(&upload.document_id, &upload.file_ref)?;
    }
    let draft = workflow.submit()?;

    let stored = StoredRecord::new(user_id, draft);
    let record_id = state.store.upsert_claim(&stored).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmittedClaim {
            record_id,
            draft: stored.record,
        }),
    ))
}
