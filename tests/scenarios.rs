/// End-to-end checks of the deterministic core: reconciliation, scoring and
/// claims readiness, driven by hand-written stage outputs.
use rust_claims_ai::claims::build_claim_context;
use rust_claims_ai::models::{
    CanonicalRecord, Certificate, Confidence, DocumentKind, FieldStatus, StageResult,
    StoredRecord,
};
use rust_claims_ai::reconciler::{canonicalize, canonicalize_insurance, canonicalize_medical};
use rust_claims_ai::scoring::{default_evaluation, score};
use serde_json::{json, Value};

fn stage_outputs(structured: Value) -> Vec<StageResult> {
    vec![
        StageResult::ok(
            "extract",
            "- extracted".to_string(),
            json!({"text": "- extracted", "bullets": ["extracted"]}),
        ),
        StageResult::ok("structure", structured.to_string(), structured),
    ]
}

fn rubric_json(item_score: f64) -> Value {
    let section = json!({
        "items": (0..5)
            .map(|i| json!({"name": format!("item {}", i), "score": item_score, "reason": "ok"}))
            .collect::<Vec<_>>()
    });
    json!({
        "totalScore": item_score * 20.0,
        "recommendation": "Keep this policy.",
        "sections": {
            "content": section.clone(),
            "pricing": section.clone(),
            "company": section.clone(),
            "flexibility": section,
        },
        "strengths": ["Broad coverage"],
        "weaknesses": [],
        "suggestions": []
    })
}

#[test]
fn placeholder_policy_type_is_missing_but_company_is_not() {
    let results = stage_outputs(json!({
        "insuranceCompany": "Cathay Life",
        "policyType": "<placeholder>"
    }));

    let CanonicalRecord::Insurance(policy) = canonicalize(&results, DocumentKind::Insurance)
    else {
        panic!("expected an insurance policy");
    };

    assert_eq!(policy.company.as_deref(), Some("Cathay Life"));
    assert!(policy.missing_fields.contains(&"policyType".to_string()));
    assert!(!policy.missing_fields.contains(&"company".to_string()));
    assert_eq!(
        policy.field_sources["policyType"].status,
        FieldStatus::Placeholder
    );
    assert_eq!(
        policy.field_sources["company"].source.as_deref(),
        Some("structure:/insuranceCompany")
    );
    assert!(policy.has_data_issues);
}

#[test]
fn canonicalize_is_idempotent() {
    let results = stage_outputs(json!({
        "flattenedFields": {
            "hospital": "National Taiwan University Hospital",
            "diagnosis": "Acute bronchitis",
            "medications": ["Amoxicillin"],
            "restPeriod": "to be filled"
        }
    }));

    assert_eq!(canonicalize_medical(&results), canonicalize_medical(&results));
    assert_eq!(
        canonicalize(&results, DocumentKind::Insurance),
        canonicalize(&results, DocumentKind::Insurance)
    );
}

#[test]
fn no_json_object_gives_exact_default_evaluation() {
    let raw = "I'm sorry, I cannot evaluate this policy without more details.";
    let first = score(raw);
    assert_eq!(first, default_evaluation());
    assert_eq!(first.total_score, 12.0);
    assert_eq!(first.star_rating, 3);
    assert_eq!(score(raw), first);
}

#[test]
fn all_items_full_marks_gives_five_stars() {
    let raw = format!("Here is my evaluation:\n{}\nThanks.", rubric_json(1.0));
    let evaluation = score(&raw);
    assert_eq!(evaluation.total_score, 20.0);
    assert_eq!(evaluation.star_rating, 5);
    assert!(evaluation.sections.iter().all(|s| s.score == 5.0));
    assert_eq!(evaluation.recommendation, "Keep this policy.");
}

#[test]
fn half_marks_everywhere_gives_three_stars() {
    let evaluation = score(&rubric_json(0.5).to_string());
    assert_eq!(evaluation.total_score, 10.0);
    assert_eq!(evaluation.star_rating, 3);
}

#[test]
fn receipt_matched_from_either_policy_and_totals_skip_unresolved_amounts() {
    let medical = canonicalize_medical(&stage_outputs(json!({
        "flattenedFields": {"hospital": "to be filled", "diagnosis": "Fractured wrist"}
    })));
    assert_eq!(medical.hospital, None);
    assert!(medical.missing_fields.contains(&"hospital".to_string()));

    let with_receipt = StoredRecord::new(
        "user-1",
        canonicalize_insurance(&stage_outputs(json!({
            "flattenedFields": {
                "insuranceCompany": "Fubon Life",
                "policyType": "Accident",
                "policyName": "Accident Care",
                "policyNumber": "FB-001",
                "effectiveDate": "2022-05-01",
                "expiryDate": "2032-05-01",
                "insuredName": "Lin",
                "beneficiary": "Lin",
                "coverageItems": [{"type": "Fracture", "amount": "NT$20,000", "unit": "per event"}]
            }
        }))),
    );
    let without_receipt = StoredRecord::new(
        "user-1",
        canonicalize_insurance(&stage_outputs(json!({
            "flattenedFields": {
                "insuranceCompany": "Cathay Life",
                "coverageItems": [{"type": "Surgery", "amount": "to be filled", "unit": "per event"}]
            }
        }))),
    );
    assert_eq!(with_receipt.record.coverage_items[0].confidence, Confidence::High);
    assert_eq!(without_receipt.record.coverage_items[0].confidence, Confidence::Low);

    let certificates = vec![Certificate {
        id: "cert-1".to_string(),
        document_type: "Medical receipt".to_string(),
        file_ref: "uploads/receipt-0412.jpg".to_string(),
        policy_ref: Some(with_receipt.id.to_string()),
    }];

    let context = build_claim_context(
        &medical,
        &[with_receipt, without_receipt],
        &certificates,
    );

    let receipt = context
        .required_documents
        .iter()
        .find(|d| d.id == "receipt")
        .expect("base checklist has a receipt entry");
    assert!(receipt.uploaded);
    assert_eq!(
        receipt.matched_existing_file_ref.as_deref(),
        Some("uploads/receipt-0412.jpg")
    );
    assert_eq!(context.total_estimated_amount, 20_000.0);
    assert!(context.record_issues.contains(&"hospital".to_string()));
}
