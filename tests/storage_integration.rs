use chrono::Utc;
use std::env;
use uuid::Uuid;

use rust_claims_ai::claims::claim_id;
use rust_claims_ai::db::Database;
use rust_claims_ai::db_storage::{PgRecordStore, RecordStore};
use rust_claims_ai::models::{
    CanonicalInsurancePolicy, CanonicalMedicalRecord, ClaimDraft, ClaimStatus, StoredRecord,
};

async fn store() -> anyhow::Result<PgRecordStore> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.migrate().await?;
    Ok(PgRecordStore::new(db.pool.clone()))
}

/// Smoke test for canonical record persistence.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn medical_record_round_trip_smoke_test() -> anyhow::Result<()> {
    let store = store().await?;
    let user_id = format!("test-user-{}", Uuid::new_v4());

    let mut stored = StoredRecord::new(
        user_id.clone(),
        CanonicalMedicalRecord {
            hospital: Some("Taipei Veterans General Hospital".to_string()),
            diagnosis: Some("Fractured wrist".to_string()),
            medications: vec!["Ibuprofen".to_string()],
            missing_fields: vec!["doctor".to_string()],
            has_data_issues: true,
            claim_success_rate: 90,
            ..Default::default()
        },
    );

    let id = store.upsert_medical(&stored).await?;
    assert_eq!(id, stored.id);

    // Second save overwrites rather than duplicating
    stored.record.doctor = Some("Dr. Lin".to_string());
    store.upsert_medical(&stored).await?;

    let loaded = store
        .get_medical(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("record {} not found after upsert", id))?;
    assert_eq!(loaded.user_id, user_id);
    assert_eq!(loaded.record.doctor.as_deref(), Some("Dr. Lin"));
    assert_eq!(loaded.record.medications, vec!["Ibuprofen"]);

    assert!(store.get_medical(Uuid::new_v4()).await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn policy_and_claim_smoke_test() -> anyhow::Result<()> {
    let store = store().await?;
    let user_id = format!("test-user-{}", Uuid::new_v4());

    let policy = StoredRecord::new(
        user_id.clone(),
        CanonicalInsurancePolicy {
            company: Some("Cathay Life".to_string()),
            total_estimated_amount: 30_000.0,
            ..Default::default()
        },
    );
    let policy_id = store.upsert_policy(&policy).await?;

    let loaded = store
        .get_policy(policy_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("policy {} not found after upsert", policy_id))?;
    assert_eq!(loaded.record.company.as_deref(), Some("Cathay Life"));

    // Random sequence keeps repeated runs from colliding on the claim id
    let seq = (Uuid::new_v4().as_u128() % 10_000) as u32;
    let draft = ClaimDraft {
        id: claim_id(Utc::now(), seq),
        medical_record_ref: Uuid::new_v4().to_string(),
        policy_refs: vec![policy_id.to_string()],
        total_estimated_amount: 30_000.0,
        created_at: Utc::now(),
        status: ClaimStatus::Pending,
    };
    let claim = StoredRecord::new(user_id.clone(), draft.clone());
    assert_eq!(store.upsert_claim(&claim).await?, claim.id);
    store.upsert_claim(&claim).await?;

    // Another user drawing the same claim number gets a row of their own
    let other = StoredRecord::new(format!("test-user-{}", Uuid::new_v4()), draft);
    assert_ne!(store.upsert_claim(&other).await?, claim.id);
    Ok(())
}
