//! Field reconciliation: stage outputs → canonical records.
//!
//! Every canonical field has an ordered list of candidate locations
//! ([`FieldPath`]). The first candidate holding a real (non-empty,
//! non-placeholder) value wins and its location is kept as the field's
//! source. Fields with no winner are reported in `missing_fields`.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::models::{
    CanonicalInsurancePolicy, CanonicalMedicalRecord, CanonicalRecord, Confidence, CoverageItem,
    DocumentKind, FieldStatus, FieldTrace, StageResult,
};
use crate::prompts::{STAGE_ANALYZE, STAGE_STRUCTURE};

/// Completeness at or above which an item with an amount is `High`.
const HIGH_CONFIDENCE_COMPLETENESS: f64 = 0.7;

const PLACEHOLDER_SENTINELS: [&str; 20] = [
    "to be filled",
    "tbd",
    "unknown",
    "n/a",
    "na",
    "none",
    "null",
    "undefined",
    "-",
    "--",
    "—",
    "not provided",
    "not specified",
    "placeholder",
    "待填寫",
    "待補充",
    "未提供",
    "未知",
    "不詳",
    "?",
];

static ANGLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<[^<>]*>$").expect("placeholder pattern is valid"));

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*(萬|万)?").expect("amount pattern is valid")
});

/// One candidate location: a JSON pointer into the parsed output of a stage.
#[derive(Debug, Clone, Copy)]
pub struct FieldPath {
    pub stage: &'static str,
    pub pointer: &'static str,
}

const fn at(stage: &'static str, pointer: &'static str) -> FieldPath {
    FieldPath { stage, pointer }
}

pub struct FieldSpec {
    pub name: &'static str,
    pub paths: &'static [FieldPath],
}

pub const MEDICAL_FIELDS: [FieldSpec; 12] = [
    FieldSpec {
        name: "hospital",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/hospital"),
            at(STAGE_STRUCTURE, "/fullInfo/visit/hospital"),
            at(STAGE_STRUCTURE, "/hospital"),
        ],
    },
    FieldSpec {
        name: "department",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/department"),
            at(STAGE_STRUCTURE, "/fullInfo/visit/department"),
            at(STAGE_STRUCTURE, "/department"),
        ],
    },
    FieldSpec {
        name: "doctor",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/doctor"),
            at(STAGE_STRUCTURE, "/fullInfo/visit/doctor"),
            at(STAGE_STRUCTURE, "/doctor"),
        ],
    },
    FieldSpec {
        name: "visitDate",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/visitDate"),
            at(STAGE_STRUCTURE, "/fullInfo/visit/visitDate"),
            at(STAGE_STRUCTURE, "/fullInfo/visit/date"),
            at(STAGE_STRUCTURE, "/visitDate"),
        ],
    },
    FieldSpec {
        name: "diagnosis",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/diagnosis"),
            at(STAGE_STRUCTURE, "/fullInfo/diagnosis/description"),
            at(STAGE_STRUCTURE, "/diagnosis"),
            at(STAGE_ANALYZE, "/diagnosis"),
        ],
    },
    FieldSpec {
        name: "treatments",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/treatments"),
            at(STAGE_STRUCTURE, "/fullInfo/treatment/procedures"),
            at(STAGE_STRUCTURE, "/treatments"),
        ],
    },
    FieldSpec {
        name: "medications",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/medications"),
            at(STAGE_STRUCTURE, "/fullInfo/treatment/medications"),
            at(STAGE_STRUCTURE, "/medications"),
        ],
    },
    FieldSpec {
        name: "documentTitle",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/documentTitle"),
            at(STAGE_STRUCTURE, "/fullInfo/document/title"),
            at(STAGE_STRUCTURE, "/documentTitle"),
        ],
    },
    FieldSpec {
        name: "certificateType",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/certificateType"),
            at(STAGE_STRUCTURE, "/fullInfo/document/certificateType"),
            at(STAGE_STRUCTURE, "/certificateType"),
        ],
    },
    FieldSpec {
        name: "icdCode",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/icdCode"),
            at(STAGE_STRUCTURE, "/fullInfo/diagnosis/icdCode"),
            at(STAGE_STRUCTURE, "/icdCode"),
            at(STAGE_ANALYZE, "/icdCode"),
        ],
    },
    FieldSpec {
        name: "diseaseName",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/diseaseName"),
            at(STAGE_STRUCTURE, "/fullInfo/diagnosis/diseaseName"),
            at(STAGE_STRUCTURE, "/diseaseName"),
            at(STAGE_ANALYZE, "/diseaseName"),
        ],
    },
    FieldSpec {
        name: "restPeriod",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/restPeriod"),
            at(STAGE_STRUCTURE, "/fullInfo/restPeriod"),
            at(STAGE_STRUCTURE, "/restPeriod"),
            at(STAGE_ANALYZE, "/restPeriod"),
        ],
    },
];

const ACCIDENT_PATHS: &[FieldPath] = &[
    at(STAGE_STRUCTURE, "/flattenedFields/isAccidentRelated"),
    at(STAGE_STRUCTURE, "/fullInfo/accident"),
    at(STAGE_STRUCTURE, "/isAccidentRelated"),
    at(STAGE_ANALYZE, "/isAccidentRelated"),
];

pub const INSURANCE_FIELDS: [FieldSpec; 9] = [
    FieldSpec {
        name: "company",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/insuranceCompany"),
            at(STAGE_STRUCTURE, "/flattenedFields/company"),
            at(STAGE_STRUCTURE, "/fullInfo/basicInfo/company"),
            at(STAGE_STRUCTURE, "/insuranceCompany"),
            at(STAGE_STRUCTURE, "/company"),
        ],
    },
    FieldSpec {
        name: "policyType",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/policyType"),
            at(STAGE_STRUCTURE, "/fullInfo/basicInfo/policyType"),
            at(STAGE_STRUCTURE, "/policyType"),
        ],
    },
    FieldSpec {
        name: "policyName",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/policyName"),
            at(STAGE_STRUCTURE, "/fullInfo/basicInfo/policyName"),
            at(STAGE_STRUCTURE, "/policyName"),
        ],
    },
    FieldSpec {
        name: "policyNumber",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/policyNumber"),
            at(STAGE_STRUCTURE, "/fullInfo/basicInfo/policyNumber"),
            at(STAGE_STRUCTURE, "/policyNumber"),
        ],
    },
    FieldSpec {
        name: "effectiveDate",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/effectiveDate"),
            at(STAGE_STRUCTURE, "/fullInfo/basicInfo/effectiveDate"),
            at(STAGE_STRUCTURE, "/effectiveDate"),
        ],
    },
    FieldSpec {
        name: "expiryDate",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/expiryDate"),
            at(STAGE_STRUCTURE, "/fullInfo/basicInfo/expiryDate"),
            at(STAGE_STRUCTURE, "/expiryDate"),
        ],
    },
    FieldSpec {
        name: "insuredName",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/insuredName"),
            at(STAGE_STRUCTURE, "/fullInfo/parties/insured"),
            at(STAGE_STRUCTURE, "/insuredName"),
        ],
    },
    FieldSpec {
        name: "beneficiary",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/beneficiary"),
            at(STAGE_STRUCTURE, "/fullInfo/parties/beneficiary"),
            at(STAGE_STRUCTURE, "/beneficiary"),
        ],
    },
    FieldSpec {
        name: "coverageItems",
        paths: &[
            at(STAGE_STRUCTURE, "/flattenedFields/coverageItems"),
            at(STAGE_STRUCTURE, "/fullInfo/coverage"),
            at(STAGE_STRUCTURE, "/coverageItems"),
        ],
    },
];

const CLAIM_REQUIREMENT_PATHS: &[FieldPath] = &[
    at(STAGE_STRUCTURE, "/flattenedFields/claimDocuments"),
    at(STAGE_STRUCTURE, "/fullInfo/claimDocuments"),
    at(STAGE_STRUCTURE, "/claimDocuments"),
];

/// Canonical schema field names for a document kind, in record order.
pub fn schema_fields(kind: DocumentKind) -> Vec<&'static str> {
    let specs: &[FieldSpec] = match kind {
        DocumentKind::Medical => &MEDICAL_FIELDS,
        DocumentKind::Insurance => &INSURANCE_FIELDS,
    };
    specs.iter().map(|s| s.name).collect()
}

/// True when `value` is a recognized "unknown" marker rather than data.
pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    if ANGLE_PLACEHOLDER.is_match(trimmed) {
        return true;
    }

    let inner = trimmed
        .trim_start_matches(['(', '[', '（', '【'])
        .trim_end_matches([')', ']', '）', '】'])
        .trim()
        .to_lowercase();
    PLACEHOLDER_SENTINELS.contains(&inner.as_str())
}

/// Parses a monetary amount from a JSON number or text such as
/// `"NT$1,000,000"` or `"3 萬元"`. Only positive amounts are returned.
pub fn parse_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            if is_placeholder(s) {
                return None;
            }
            let caps = AMOUNT.captures(s)?;
            let number: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
            if caps.get(2).is_some() {
                number * 10_000.0
            } else {
                number
            }
        }
        _ => return None,
    };

    (amount.is_finite() && amount > 0.0).then_some(amount)
}

/// Deterministic claim success estimate from missing-field count alone:
/// 95 for a complete record, falling linearly to 40 when nothing resolved.
pub fn claim_success_rate(missing: usize, total: usize) -> u8 {
    let completeness = completeness(missing, total);
    (40.0 + 55.0 * completeness).round() as u8
}

fn completeness(missing: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    1.0 - (missing.min(total) as f64 / total as f64)
}

// ============ Resolution ============

/// Candidate values in priority order, tagged with their source.
struct Candidates<'a> {
    outputs: Vec<(&'a str, &'a Value)>,
}

impl<'a> Candidates<'a> {
    fn new(stage_results: &'a [StageResult]) -> Self {
        let outputs = stage_results
            .iter()
            .filter(|r| r.succeeded)
            .filter_map(|r| r.parsed.as_ref().map(|p| (r.stage_id.as_str(), p)))
            .collect();
        Self { outputs }
    }

    fn iter(
        &self,
        paths: &'static [FieldPath],
    ) -> impl Iterator<Item = (String, &'a Value)> + '_ {
        paths.iter().flat_map(move |path| {
            self.outputs
                .iter()
                .filter(move |&&(stage, _)| stage == path.stage)
                .filter_map(move |&(stage, parsed)| {
                    parsed
                        .pointer(path.pointer)
                        .filter(|v| !v.is_null())
                        .map(|v| (format!("{}:{}", stage, path.pointer), v))
                })
        })
    }
}

/// Records each field's trace and collects missing field names in schema order.
#[derive(Default)]
struct Tracker {
    sources: BTreeMap<String, FieldTrace>,
    missing: Vec<String>,
}

impl Tracker {
    fn record(&mut self, name: &str, trace: FieldTrace) {
        if trace.status != FieldStatus::Present {
            self.missing.push(name.to_string());
        }
        self.sources.insert(name.to_string(), trace);
    }
}

fn absent_or_placeholder(saw_placeholder: bool) -> FieldTrace {
    FieldTrace {
        status: if saw_placeholder {
            FieldStatus::Placeholder
        } else {
            FieldStatus::Absent
        },
        source: None,
    }
}

fn present(source: String) -> FieldTrace {
    FieldTrace {
        status: FieldStatus::Present,
        source: Some(source),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn resolve_text(
    candidates: &Candidates<'_>,
    paths: &'static [FieldPath],
) -> (Option<String>, FieldTrace) {
    let mut saw_placeholder = false;
    for (source, value) in candidates.iter(paths) {
        let Some(text) = scalar_text(value) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        if is_placeholder(&text) {
            saw_placeholder = true;
            continue;
        }
        return (Some(text), present(source));
    }
    (None, absent_or_placeholder(saw_placeholder))
}

fn list_entries(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
        Value::String(s) => s
            .split(['、', ',', '，', ';', '；', '\n'])
            .map(|part| part.trim().to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn resolve_list(
    candidates: &Candidates<'_>,
    paths: &'static [FieldPath],
) -> (Vec<String>, FieldTrace) {
    let mut saw_placeholder = false;
    for (source, value) in candidates.iter(paths) {
        let entries = list_entries(value);
        if entries.iter().any(|e| is_placeholder(e)) {
            saw_placeholder = true;
        }
        let real: Vec<String> = entries
            .into_iter()
            .filter(|e| !e.is_empty() && !is_placeholder(e))
            .collect();
        if !real.is_empty() {
            return (real, present(source));
        }
    }
    (Vec::new(), absent_or_placeholder(saw_placeholder))
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "是" | "意外" => Some(true),
            "false" | "no" | "n" | "否" | "非意外" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn resolve_flag(candidates: &Candidates<'_>, paths: &'static [FieldPath]) -> (bool, FieldTrace) {
    for (source, value) in candidates.iter(paths) {
        if let Some(flag) = parse_flag(value) {
            return (flag, present(source));
        }
    }
    (false, absent_or_placeholder(false))
}

/// Coverage entry before confidence is assigned.
struct RawCoverage {
    item_type: String,
    amount: Option<f64>,
    unit: String,
}

fn first_text(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| entry.get(*k))
        .filter_map(scalar_text)
        .find(|s| !s.is_empty() && !is_placeholder(s))
}

fn coverage_entries(value: &Value) -> (Vec<RawCoverage>, bool) {
    let Some(items) = value.as_array() else {
        return (Vec::new(), false);
    };

    let mut saw_placeholder = false;
    let mut out = Vec::new();
    for entry in items {
        let Some(item_type) = first_text(entry, &["type", "name", "item"]) else {
            saw_placeholder |= entry
                .get("type")
                .or_else(|| entry.get("name"))
                .and_then(Value::as_str)
                .is_some_and(is_placeholder);
            continue;
        };
        let amount = ["amount", "limit", "sumInsured"]
            .iter()
            .filter_map(|k| entry.get(*k))
            .find_map(parse_amount);
        let unit = first_text(entry, &["unit"]).unwrap_or_default();
        out.push(RawCoverage {
            item_type,
            amount,
            unit,
        });
    }
    (out, saw_placeholder)
}

fn resolve_coverage(
    candidates: &Candidates<'_>,
    paths: &'static [FieldPath],
) -> (Vec<RawCoverage>, FieldTrace) {
    let mut saw_placeholder = false;
    for (source, value) in candidates.iter(paths) {
        let (entries, placeholder) = coverage_entries(value);
        saw_placeholder |= placeholder;
        if !entries.is_empty() {
            return (entries, present(source));
        }
    }
    (Vec::new(), absent_or_placeholder(saw_placeholder))
}

/// Confidence of a coverage line given the policy's completeness.
pub fn coverage_confidence(amount: Option<f64>, completeness: f64) -> Confidence {
    match amount {
        Some(a) if a > 0.0 && completeness >= HIGH_CONFIDENCE_COMPLETENESS => Confidence::High,
        Some(a) if a > 0.0 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

// ============ Canonicalization ============

/// Reconciles stage outputs into the canonical record for `kind`.
///
/// Pure: the same stage results always produce the same record.
pub fn canonicalize(stage_results: &[StageResult], kind: DocumentKind) -> CanonicalRecord {
    match kind {
        DocumentKind::Medical => CanonicalRecord::Medical(canonicalize_medical(stage_results)),
        DocumentKind::Insurance => {
            CanonicalRecord::Insurance(canonicalize_insurance(stage_results))
        }
    }
}

pub fn canonicalize_medical(stage_results: &[StageResult]) -> CanonicalMedicalRecord {
    let candidates = Candidates::new(stage_results);
    let mut tracker = Tracker::default();
    let mut record = CanonicalMedicalRecord::default();

    for spec in &MEDICAL_FIELDS {
        match spec.name {
            "treatments" | "medications" => {
                let (values, trace) = resolve_list(&candidates, spec.paths);
                tracker.record(spec.name, trace);
                if spec.name == "treatments" {
                    record.treatments = values;
                } else {
                    record.medications = values;
                }
            }
            name => {
                let (value, trace) = resolve_text(&candidates, spec.paths);
                tracker.record(name, trace);
                let slot = match name {
                    "hospital" => &mut record.hospital,
                    "department" => &mut record.department,
                    "doctor" => &mut record.doctor,
                    "visitDate" => &mut record.visit_date,
                    "diagnosis" => &mut record.diagnosis,
                    "documentTitle" => &mut record.document_title,
                    "certificateType" => &mut record.certificate_type,
                    "icdCode" => &mut record.icd_code,
                    "diseaseName" => &mut record.disease_name,
                    _ => &mut record.rest_period,
                };
                *slot = value;
            }
        }
    }

    let (accident, accident_trace) = resolve_flag(&candidates, ACCIDENT_PATHS);
    record.is_accident_related = accident;

    record.claim_success_rate = claim_success_rate(tracker.missing.len(), MEDICAL_FIELDS.len());
    record.has_data_issues = !tracker.missing.is_empty();
    record.missing_fields = tracker.missing;
    record.field_sources = tracker.sources;
    record
        .field_sources
        .insert("isAccidentRelated".to_string(), accident_trace);

    tracing::debug!(
        "Canonical medical record: {} missing field(s) {:?}",
        record.missing_fields.len(),
        record.missing_fields
    );
    record
}

pub fn canonicalize_insurance(stage_results: &[StageResult]) -> CanonicalInsurancePolicy {
    let candidates = Candidates::new(stage_results);
    let mut tracker = Tracker::default();
    let mut policy = CanonicalInsurancePolicy::default();
    let mut raw_coverage = Vec::new();

    for spec in &INSURANCE_FIELDS {
        if spec.name == "coverageItems" {
            let (entries, trace) = resolve_coverage(&candidates, spec.paths);
            tracker.record(spec.name, trace);
            raw_coverage = entries;
            continue;
        }

        let (value, trace) = resolve_text(&candidates, spec.paths);
        tracker.record(spec.name, trace);
        let slot = match spec.name {
            "company" => &mut policy.company,
            "policyType" => &mut policy.policy_type,
            "policyName" => &mut policy.policy_name,
            "policyNumber" => &mut policy.policy_number,
            "effectiveDate" => &mut policy.effective_date,
            "expiryDate" => &mut policy.expiry_date,
            "insuredName" => &mut policy.insured_name,
            _ => &mut policy.beneficiary,
        };
        *slot = value;
    }

    let completeness = completeness(tracker.missing.len(), INSURANCE_FIELDS.len());
    policy.coverage_items = raw_coverage
        .into_iter()
        .map(|raw| {
            let confidence = coverage_confidence(raw.amount, completeness);
            let estimated_amount = match (confidence, raw.amount) {
                (Confidence::Low, _) | (_, None) => 0.0,
                (_, Some(amount)) => amount,
            };
            CoverageItem {
                item_type: raw.item_type,
                amount: raw.amount.unwrap_or(0.0),
                unit: raw.unit,
                confidence,
                estimated_amount,
            }
        })
        .collect();
    policy.total_estimated_amount = policy
        .coverage_items
        .iter()
        .map(|i| i.estimated_amount)
        .filter(|a| *a > 0.0)
        .sum();

    let (requirements, _) = resolve_list(&candidates, CLAIM_REQUIREMENT_PATHS);
    policy.claim_requirements = requirements;

    policy.has_data_issues = !tracker.missing.is_empty();
    policy.missing_fields = tracker.missing;
    policy.field_sources = tracker.sources;

    tracing::debug!(
        "Canonical policy: {} coverage item(s), {} missing field(s) {:?}",
        policy.coverage_items.len(),
        policy.missing_fields.len(),
        policy.missing_fields
    );
    policy
}
