//! Claims readiness: required-document checklist, matching against existing
//! uploads, and the claim submission workflow.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    CanonicalInsurancePolicy, CanonicalMedicalRecord, Certificate, ClaimContext, ClaimDraft,
    ClaimStatus, RequiredDocument, StoredRecord,
};

struct ChecklistEntry {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    /// Lowercase fragments that identify an upload of this document.
    aliases: &'static [&'static str],
}

const BASE_CHECKLIST: [ChecklistEntry; 5] = [
    ChecklistEntry {
        id: "identity-proof",
        name: "Identity proof",
        description: "National ID card or passport of the insured person.",
        aliases: &["identity", "id card", "passport", "身分證", "身份證", "護照"],
    },
    ChecklistEntry {
        id: "diagnosis-certificate",
        name: "Diagnosis certificate",
        description: "Certificate issued by the treating hospital stating the diagnosis.",
        aliases: &["diagnosis", "medical certificate", "診斷證明", "診斷書"],
    },
    ChecklistEntry {
        id: "receipt",
        name: "Medical receipt",
        description: "Itemized receipt for the treatment being claimed.",
        aliases: &["receipt", "invoice", "收據", "發票"],
    },
    ChecklistEntry {
        id: "bank-account-proof",
        name: "Bank account proof",
        description: "Passbook cover or statement showing the payout account.",
        aliases: &["bank", "passbook", "存摺", "帳戶"],
    },
    ChecklistEntry {
        id: "application-form",
        name: "Claim application form",
        description: "The insurer's signed claim application form.",
        aliases: &["claim application", "application form", "claim form", "申請書"],
    },
];

/// Words that qualify a document without naming a different one.
const QUALIFIERS: [&str; 7] = ["original", "copy", "copies", "of", "certified", "signed", "the"];

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Lowercase words of a label. CJK runs stay whole.
fn tokens(label: &str) -> Vec<String> {
    label
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn requirement_id(name: &str) -> String {
    format!("policy-{}", tokens(name).join("-"))
}

/// True when `alias` occurs in `label` as whole words. Aliases without word
/// boundaries (CJK) match as substrings.
fn mentions(label: &str, alias: &str) -> bool {
    if alias.is_ascii() {
        let label = tokens(label);
        let alias = tokens(alias);
        !alias.is_empty() && label.windows(alias.len()).any(|w| w == alias.as_slice())
    } else {
        normalize_label(label).contains(alias)
    }
}

/// The base entry a policy requirement names outright, ignoring qualifiers
/// such as "original" or "copy of".
fn base_entry_named(requirement: &str) -> Option<&'static ChecklistEntry> {
    let core: Vec<String> = tokens(requirement)
        .into_iter()
        .filter(|t| !QUALIFIERS.contains(&t.as_str()))
        .collect();
    if core.is_empty() {
        return None;
    }
    BASE_CHECKLIST.iter().find(|entry| {
        std::iter::once(entry.name)
            .chain(entry.aliases.iter().copied())
            .any(|name| tokens(name) == core)
    })
}

/// Every word of the requirement must appear in the upload's label, so a
/// generic label never satisfies a specific requirement.
fn satisfies_requirement(document_type: &str, requirement: &str) -> bool {
    let have = tokens(document_type);
    let want = tokens(requirement);
    !want.is_empty()
        && want.iter().all(|w| {
            have.iter()
                .any(|h| h == w || (!w.is_ascii() && h.contains(w.as_str())))
        })
}

/// Whether an upload labelled `document_type` satisfies `required`.
fn certificate_matches(document_type: &str, required: &RequiredDocument) -> bool {
    match BASE_CHECKLIST.iter().find(|e| e.id == required.id) {
        Some(entry) => entry
            .aliases
            .iter()
            .any(|alias| mentions(document_type, alias)),
        None => satisfies_requirement(document_type, &required.name),
    }
}

/// Builds the document checklist for a claim on `record` against `policies`.
///
/// A certificate counts as uploaded when its type matches and it is either
/// unattached or attached to one of the selected policies.
pub fn build_claim_context(
    record: &CanonicalMedicalRecord,
    policies: &[StoredRecord<CanonicalInsurancePolicy>],
    certificates: &[Certificate],
) -> ClaimContext {
    let mut documents: Vec<RequiredDocument> = BASE_CHECKLIST
        .iter()
        .map(|entry| RequiredDocument {
            id: entry.id.to_string(),
            name: entry.name.to_string(),
            required: true,
            description: entry.description.to_string(),
            uploaded: false,
            matched_existing_file_ref: None,
        })
        .collect();

    for policy in policies {
        for requirement in &policy.record.claim_requirements {
            if base_entry_named(requirement).is_some() {
                continue;
            }
            let id = requirement_id(requirement);
            if documents.iter().any(|d| d.id == id) {
                continue;
            }
            documents.push(RequiredDocument {
                id,
                name: requirement.trim().to_string(),
                required: true,
                description: format!(
                    "Required by {}.",
                    policy
                        .record
                        .policy_name
                        .as_deref()
                        .unwrap_or("the selected policy")
                ),
                uploaded: false,
                matched_existing_file_ref: None,
            });
        }
    }

    let selected: Vec<String> = policies.iter().map(|p| p.id.to_string()).collect();
    let usable: Vec<&Certificate> = certificates
        .iter()
        .filter(|c| match &c.policy_ref {
            None => true,
            Some(policy_ref) => selected.contains(policy_ref),
        })
        .collect();

    for document in &mut documents {
        if let Some(cert) = usable
            .iter()
            .find(|c| certificate_matches(&c.document_type, document))
        {
            document.uploaded = true;
            document.matched_existing_file_ref = Some(cert.file_ref.clone());
        }
    }

    let context = ClaimContext {
        total_estimated_amount: total_estimated_amount(policies.iter().map(|p| &p.record)),
        required_documents: documents,
        record_issues: record.missing_fields.clone(),
    };

    tracing::info!(
        "Claim context: {} document(s), {} already uploaded, estimated {}",
        context.required_documents.len(),
        context.required_documents.iter().filter(|d| d.uploaded).count(),
        context.total_estimated_amount
    );
    context
}

/// Sum of positive estimated amounts over every coverage item.
pub fn total_estimated_amount<'a>(
    policies: impl IntoIterator<Item = &'a CanonicalInsurancePolicy>,
) -> f64 {
    policies
        .into_iter()
        .flat_map(|p| p.coverage_items.iter())
        .map(|item| item.estimated_amount)
        .filter(|amount| *amount > 0.0)
        .sum()
}

/// `CLM-YYYYMMDD-NNNN`.
pub fn claim_id(at: DateTime<Utc>, sequence: u32) -> String {
    format!("CLM-{}-{:04}", at.format("%Y%m%d"), sequence % 10_000)
}

// ============ Workflow ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStep {
    SelectingRecord,
    SelectingPolicies,
    Documents,
    Submitted,
}

/// Claim submission state machine.
///
/// `SelectingRecord → SelectingPolicies → Documents → Submitted`. Submitted
/// is terminal.
#[derive(Debug)]
pub struct ClaimWorkflow {
    step: ClaimStep,
    record: Option<StoredRecord<CanonicalMedicalRecord>>,
    policies: Vec<StoredRecord<CanonicalInsurancePolicy>>,
    context: Option<ClaimContext>,
    draft: Option<ClaimDraft>,
}

impl Default for ClaimWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimWorkflow {
    pub fn new() -> Self {
        Self {
            step: ClaimStep::SelectingRecord,
            record: None,
            policies: Vec::new(),
            context: None,
            draft: None,
        }
    }

    pub fn step(&self) -> ClaimStep {
        self.step
    }

    pub fn context(&self) -> Option<&ClaimContext> {
        self.context.as_ref()
    }

    pub fn draft(&self) -> Option<&ClaimDraft> {
        self.draft.as_ref()
    }

    fn expect_step(&self, allowed: &[ClaimStep], action: &str) -> Result<(), AppError> {
        if allowed.contains(&self.step) {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "cannot {} while in step {:?}",
                action, self.step
            )))
        }
    }

    pub fn select_record(
        &mut self,
        record: StoredRecord<CanonicalMedicalRecord>,
    ) -> Result<(), AppError> {
        self.expect_step(
            &[ClaimStep::SelectingRecord, ClaimStep::SelectingPolicies],
            "select a medical record",
        )?;
        if record.record.has_data_issues {
            tracing::warn!(
                "Medical record {} selected with missing fields: {:?}",
                record.id,
                record.record.missing_fields
            );
        }
        self.record = Some(record);
        self.step = ClaimStep::SelectingPolicies;
        Ok(())
    }

    /// Selects the policies to claim against and computes the checklist.
    /// Can be repeated from the documents step to change the selection.
    pub fn select_policies(
        &mut self,
        policies: Vec<StoredRecord<CanonicalInsurancePolicy>>,
        certificates: &[Certificate],
    ) -> Result<&ClaimContext, AppError> {
        self.expect_step(
            &[ClaimStep::SelectingPolicies, ClaimStep::Documents],
            "select policies",
        )?;
        if policies.is_empty() {
            return Err(AppError::Validation(
                "at least one policy must be selected".to_string(),
            ));
        }
        let record = self
            .record
            .as_ref()
            .ok_or_else(|| AppError::Internal("workflow has no medical record".to_string()))?;

        let context = build_claim_context(&record.record, &policies, certificates);
        self.policies = policies;
        self.step = ClaimStep::Documents;
        Ok(self.context.insert(context))
    }

    /// Records a fresh upload for one checklist entry.
    pub fn mark_uploaded(&mut self, document_id: &str, file_ref: &str) -> Result<(), AppError> {
        self.expect_step(&[ClaimStep::Documents], "upload documents")?;
        let document = self
            .context
            .as_mut()
            .and_then(|c| c.required_documents.iter_mut().find(|d| d.id == document_id))
            .ok_or_else(|| {
                AppError::Validation(format!("unknown required document '{}'", document_id))
            })?;
        document.uploaded = true;
        document.matched_existing_file_ref = Some(file_ref.to_string());
        Ok(())
    }

    pub fn submit(&mut self) -> Result<ClaimDraft, AppError> {
        let sequence = (Uuid::new_v4().as_u128() % 10_000) as u32;
        self.submit_at(Utc::now(), sequence)
    }

    /// Submits the claim, producing a pending draft.
    pub fn submit_at(&mut self, now: DateTime<Utc>, sequence: u32) -> Result<ClaimDraft, AppError> {
        self.expect_step(&[ClaimStep::Documents], "submit")?;
        let (Some(record), Some(context)) = (&self.record, &self.context) else {
            return Err(AppError::Internal(
                "workflow reached documents step without a record".to_string(),
            ));
        };

        let outstanding: Vec<&str> = context
            .required_documents
            .iter()
            .filter(|d| d.required && !d.uploaded)
            .map(|d| d.name.as_str())
            .collect();
        if !outstanding.is_empty() {
            return Err(AppError::Validation(format!(
                "required documents not uploaded: {}",
                outstanding.join(", ")
            )));
        }

        let draft = ClaimDraft {
            id: claim_id(now, sequence),
            medical_record_ref: record.id.to_string(),
            policy_refs: self.policies.iter().map(|p| p.id.to_string()).collect(),
            total_estimated_amount: context.total_estimated_amount,
            created_at: now,
            status: ClaimStatus::Pending,
        };

        tracing::info!("✓ Claim {} submitted", draft.id);
        self.step = ClaimStep::Submitted;
        self.draft = Some(draft.clone());
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, CoverageItem};
    use chrono::TimeZone;

    fn policy(items: &[(f64, Confidence)], requirements: &[&str]) -> StoredRecord<CanonicalInsurancePolicy> {
        StoredRecord::new(
            "user-1",
            CanonicalInsurancePolicy {
                policy_name: Some("Hospital Care".to_string()),
                coverage_items: items
                    .iter()
                    .map(|(amount, confidence)| CoverageItem {
                        item_type: "Hospital daily".to_string(),
                        amount: *amount,
                        unit: "per day".to_string(),
                        confidence: *confidence,
                        estimated_amount: if *confidence == Confidence::Low { 0.0 } else { *amount },
                    })
                    .collect(),
                claim_requirements: requirements.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    fn cert(document_type: &str, policy_ref: Option<String>) -> Certificate {
        Certificate {
            id: format!("cert-{}", document_type),
            document_type: document_type.to_string(),
            file_ref: format!("files/{}.pdf", document_type),
            policy_ref,
        }
    }

    fn all_base_certificates() -> Vec<Certificate> {
        ["身分證", "診斷證明書", "receipt", "bank passbook", "application form"]
            .into_iter()
            .map(|t| cert(t, None))
            .collect()
    }

    #[test]
    fn test_base_checklist_always_present() {
        let context = build_claim_context(&CanonicalMedicalRecord::default(), &[], &[]);
        let ids: Vec<&str> = context.required_documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["identity-proof", "diagnosis-certificate", "receipt", "bank-account-proof", "application-form"]
        );
        assert!(context.required_documents.iter().all(|d| d.required && !d.uploaded));
        assert_eq!(context.total_estimated_amount, 0.0);
    }

    #[test]
    fn test_policy_requirements_deduplicated() {
        let a = policy(&[], &["Discharge summary", "Original receipt"]);
        let b = policy(&[], &["discharge summary"]);
        let context = build_claim_context(&CanonicalMedicalRecord::default(), &[a, b], &[]);
        assert_eq!(context.required_documents.len(), 6);
        assert_eq!(context.required_documents[5].id, "policy-discharge-summary");
    }

    #[test]
    fn test_requirements_only_fold_when_they_name_a_base_document() {
        let p = policy(
            &[],
            &[
                "Application for disability assessment",
                "Copy of receipt and diagnosis",
                "收據",
                "Certified copy of diagnosis certificate",
            ],
        );
        let context = build_claim_context(&CanonicalMedicalRecord::default(), &[p], &[]);
        let ids: Vec<&str> = context.required_documents[5..]
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                "policy-application-for-disability-assessment",
                "policy-copy-of-receipt-and-diagnosis"
            ]
        );
    }

    #[test]
    fn test_generic_label_does_not_satisfy_specific_requirement() {
        let p = policy(&[], &["X-ray report", "Certificate of hospitalization"]);
        let certificates = vec![cert("report", None), cert("certificate", None)];
        let context = build_claim_context(&CanonicalMedicalRecord::default(), &[p], &certificates);
        assert!(context.required_documents.iter().all(|d| !d.uploaded));
    }

    #[test]
    fn test_specific_label_satisfies_requirement() {
        let p = policy(&[], &["X-ray report", "住院證明"]);
        let certificates = vec![
            cert("X-ray report (left wrist)", None),
            cert("住院證明書", None),
        ];
        let context = build_claim_context(&CanonicalMedicalRecord::default(), &[p], &certificates);
        let uploaded: Vec<&str> = context
            .required_documents
            .iter()
            .filter(|d| d.uploaded)
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(uploaded, vec!["policy-x-ray-report", "policy-住院證明"]);
    }

    #[test]
    fn test_application_form_does_not_cover_other_applications() {
        let mut workflow = ClaimWorkflow::new();
        workflow
            .select_record(StoredRecord::new("user-1", CanonicalMedicalRecord::default()))
            .unwrap();
        let p = policy(&[], &["Application for disability assessment"]);
        let context = workflow.select_policies(vec![p], &all_base_certificates()).unwrap();
        let outstanding: Vec<&str> = context
            .required_documents
            .iter()
            .filter(|d| !d.uploaded)
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(outstanding, vec!["policy-application-for-disability-assessment"]);
        assert_eq!(workflow.submit().unwrap_err().kind(), "validation");
    }

    #[test]
    fn test_certificate_attached_to_other_policy_ignored() {
        let selected = policy(&[], &[]);
        let certificates = vec![cert("receipt", Some(Uuid::new_v4().to_string()))];
        let context = build_claim_context(&CanonicalMedicalRecord::default(), &[selected], &certificates);
        let receipt = context.required_documents.iter().find(|d| d.id == "receipt").unwrap();
        assert!(!receipt.uploaded);
    }

    #[test]
    fn test_totals_exclude_non_positive_estimates() {
        let p = policy(&[(3000.0, Confidence::High), (500.0, Confidence::Low)], &[]);
        let q = policy(&[(1000.0, Confidence::Medium)], &[]);
        assert_eq!(total_estimated_amount([&p.record, &q.record]), 4000.0);
    }

    #[test]
    fn test_claim_id_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(claim_id(at, 7), "CLM-20240309-0007");
        assert_eq!(claim_id(at, 12345), "CLM-20240309-2345");
    }

    #[test]
    fn test_workflow_happy_path() {
        let mut workflow = ClaimWorkflow::new();
        let record = StoredRecord::new("user-1", CanonicalMedicalRecord::default());
        let record_id = record.id.to_string();
        workflow.select_record(record).unwrap();

        let p = policy(&[(2000.0, Confidence::High)], &["Discharge summary"]);
        let context = workflow.select_policies(vec![p], &all_base_certificates()).unwrap();
        assert_eq!(context.required_documents.iter().filter(|d| !d.uploaded).count(), 1);

        assert_eq!(workflow.submit().unwrap_err().kind(), "validation");
        workflow
            .mark_uploaded("policy-discharge-summary", "files/discharge.pdf")
            .unwrap();

        let at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let draft = workflow.submit_at(at, 1).unwrap();
        assert_eq!(draft.id, "CLM-20240102-0001");
        assert_eq!(draft.medical_record_ref, record_id);
        assert_eq!(draft.status, ClaimStatus::Pending);
        assert_eq!(draft.total_estimated_amount, 2000.0);
        assert_eq!(workflow.step(), ClaimStep::Submitted);
    }

    #[test]
    fn test_workflow_rejects_invalid_transitions() {
        let mut workflow = ClaimWorkflow::new();
        assert!(workflow.select_policies(vec![policy(&[], &[])], &[]).is_err());
        assert!(workflow.submit().is_err());

        workflow
            .select_record(StoredRecord::new("u", CanonicalMedicalRecord::default()))
            .unwrap();
        let err = workflow.select_policies(Vec::new(), &[]).unwrap_err();
        assert!(err.to_string().contains("at least one policy"));
        assert_eq!(workflow.step(), ClaimStep::SelectingPolicies);

        workflow
            .select_policies(vec![policy(&[], &[])], &all_base_certificates())
            .unwrap();
        workflow.submit().unwrap();
        assert!(workflow
            .select_record(StoredRecord::new("u", CanonicalMedicalRecord::default()))
            .is_err());
        assert!(workflow.submit().is_err());
    }
}
