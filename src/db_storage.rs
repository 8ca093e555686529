use serde::de::DeserializeOwned;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{CanonicalInsurancePolicy, CanonicalMedicalRecord, ClaimDraft, StoredRecord};

/// Persistence boundary for canonical records and claim drafts.
///
/// Upserts are keyed on the envelope id: saving the same record twice
/// overwrites it.
pub trait RecordStore: Send + Sync {
    fn upsert_medical(
        &self,
        record: &StoredRecord<CanonicalMedicalRecord>,
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    fn upsert_policy(
        &self,
        policy: &StoredRecord<CanonicalInsurancePolicy>,
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    /// Claims are keyed on the envelope id, never on the display number.
    fn upsert_claim(
        &self,
        claim: &StoredRecord<ClaimDraft>,
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    fn get_medical(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<StoredRecord<CanonicalMedicalRecord>>, AppError>> + Send;

    fn get_policy(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<StoredRecord<CanonicalInsurancePolicy>>, AppError>> + Send;
}

/// PostgreSQL store: scalar columns for querying, the full record as JSONB.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_envelope<T: DeserializeOwned + Send + Unpin + 'static>(
        &self,
        sql: &'static str,
        id: Uuid,
    ) -> Result<Option<StoredRecord<T>>, AppError> {
        let row = sqlx::query(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context(format!("Failed to load record {}", id))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let Json(record): Json<T> = row.try_get("payload")?;
        Ok(Some(StoredRecord {
            id,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            record,
        }))
    }
}

impl RecordStore for PgRecordStore {
    async fn upsert_medical(
        &self,
        stored: &StoredRecord<CanonicalMedicalRecord>,
    ) -> Result<Uuid, AppError> {
        let record = &stored.record;
        sqlx::query(
            r#"
            INSERT INTO medical_records (
                id, user_id, hospital, diagnosis, visit_date, claim_success_rate,
                has_data_issues, missing_fields, payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                hospital = EXCLUDED.hospital,
                diagnosis = EXCLUDED.diagnosis,
                visit_date = EXCLUDED.visit_date,
                claim_success_rate = EXCLUDED.claim_success_rate,
                has_data_issues = EXCLUDED.has_data_issues,
                missing_fields = EXCLUDED.missing_fields,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
        )
        .bind(stored.id)
        .bind(&stored.user_id)
        .bind(&record.hospital)
        .bind(&record.diagnosis)
        .bind(&record.visit_date)
        .bind(i16::from(record.claim_success_rate))
        .bind(record.has_data_issues)
        .bind(&record.missing_fields)
        .bind(Json(record))
        .bind(stored.created_at)
        .execute(&self.pool)
        .await
        .context(format!("Failed to upsert medical record {}", stored.id))?;

        tracing::debug!("Upserted medical record {}", stored.id);
        Ok(stored.id)
    }

    async fn upsert_policy(
        &self,
        stored: &StoredRecord<CanonicalInsurancePolicy>,
    ) -> Result<Uuid, AppError> {
        let policy = &stored.record;
        sqlx::query(
            r#"
            INSERT INTO insurance_policies (
                id, user_id, company, policy_number, policy_name, total_estimated_amount,
                has_data_issues, missing_fields, payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                company = EXCLUDED.company,
                policy_number = EXCLUDED.policy_number,
                policy_name = EXCLUDED.policy_name,
                total_estimated_amount = EXCLUDED.total_estimated_amount,
                has_data_issues = EXCLUDED.has_data_issues,
                missing_fields = EXCLUDED.missing_fields,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
        )
        .bind(stored.id)
        .bind(&stored.user_id)
        .bind(&policy.company)
        .bind(&policy.policy_number)
        .bind(&policy.policy_name)
        .bind(policy.total_estimated_amount)
        .bind(policy.has_data_issues)
        .bind(&policy.missing_fields)
        .bind(Json(policy))
        .bind(stored.created_at)
        .execute(&self.pool)
        .await
        .context(format!("Failed to upsert policy {}", stored.id))?;

        tracing::debug!("Upserted policy {}", stored.id);
        Ok(stored.id)
    }

    async fn upsert_claim(&self, stored: &StoredRecord<ClaimDraft>) -> Result<Uuid, AppError> {
        let draft = &stored.record;
        sqlx::query(
            r#"
            INSERT INTO claims (
                id, claim_number, user_id, medical_record_ref, policy_refs,
                total_estimated_amount, status, payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                policy_refs = EXCLUDED.policy_refs,
                total_estimated_amount = EXCLUDED.total_estimated_amount,
                status = EXCLUDED.status,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
        )
        .bind(stored.id)
        .bind(&draft.id)
        .bind(&stored.user_id)
        .bind(&draft.medical_record_ref)
        .bind(&draft.policy_refs)
        .bind(draft.total_estimated_amount)
        .bind("pending")
        .bind(Json(draft))
        .bind(stored.created_at)
        .execute(&self.pool)
        .await
        .context(format!("Failed to upsert claim {} ({})", draft.id, stored.id))?;

        tracing::info!(
            "✓ Stored claim {} as {} for user {}",
            draft.id,
            stored.id,
            stored.user_id
        );
        Ok(stored.id)
    }

    async fn get_medical(
        &self,
        id: Uuid,
    ) -> Result<Option<StoredRecord<CanonicalMedicalRecord>>, AppError> {
        self.fetch_envelope(
            "SELECT user_id, created_at, payload FROM medical_records WHERE id = $1",
            id,
        )
        .await
    }

    async fn get_policy(
        &self,
        id: Uuid,
    ) -> Result<Option<StoredRecord<CanonicalInsurancePolicy>>, AppError> {
        self.fetch_envelope(
            "SELECT user_id, created_at, payload FROM insurance_policies WHERE id = $1",
            id,
        )
        .await
    }
}

/// Hash-map store for tests and local runs.
#[derive(Default)]
pub struct MemoryRecordStore {
    medical: RwLock<HashMap<Uuid, StoredRecord<CanonicalMedicalRecord>>>,
    policies: RwLock<HashMap<Uuid, StoredRecord<CanonicalInsurancePolicy>>>,
    claims: RwLock<HashMap<Uuid, StoredRecord<ClaimDraft>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn claim(&self, id: Uuid) -> Option<StoredRecord<ClaimDraft>> {
        self.claims.read().await.get(&id).cloned()
    }

    /// Every stored claim carrying the display number `claim_number`.
    pub async fn claims_numbered(&self, claim_number: &str) -> Vec<StoredRecord<ClaimDraft>> {
        self.claims
            .read()
            .await
            .values()
            .filter(|c| c.record.id == claim_number)
            .cloned()
            .collect()
    }
}

impl RecordStore for MemoryRecordStore {
    async fn upsert_medical(
        &self,
        record: &StoredRecord<CanonicalMedicalRecord>,
    ) -> Result<Uuid, AppError> {
        self.medical.write().await.insert(record.id, record.clone());
        Ok(record.id)
    }

    async fn upsert_policy(
        &self,
        policy: &StoredRecord<CanonicalInsurancePolicy>,
    ) -> Result<Uuid, AppError> {
        self.policies.write().await.insert(policy.id, policy.clone());
        Ok(policy.id)
    }

    async fn upsert_claim(&self, claim: &StoredRecord<ClaimDraft>) -> Result<Uuid, AppError> {
        self.claims.write().await.insert(claim.id, claim.clone());
        Ok(claim.id)
    }

    async fn get_medical(
        &self,
        id: Uuid,
    ) -> Result<Option<StoredRecord<CanonicalMedicalRecord>>, AppError> {
        Ok(self.medical.read().await.get(&id).cloned())
    }

    async fn get_policy(
        &self,
        id: Uuid,
    ) -> Result<Option<StoredRecord<CanonicalInsurancePolicy>>, AppError> {
        Ok(self.policies.read().await.get(&id).cloned())
    }
}
