//! Prompt builders and the standard stage sequences for each document kind.

use serde_json::Value;

use crate::errors::AppError;
use crate::llm_client::LlmRequest;
use crate::models::{DocumentKind, FileIngest, FileKind};
use crate::orchestrator::{PromptInput, ResponseFormat, StageInput, StageSpec};
use crate::scoring::rubric_instructions;

pub const STAGE_EXTRACT: &str = "extract";
pub const STAGE_STRUCTURE: &str = "structure";
pub const STAGE_ANALYZE: &str = "analyze";
pub const STAGE_EVALUATE: &str = "evaluate";

const MEDICAL_STRUCTURE_SCHEMA: &str = r#"{
  "fullInfo": {
    "visit": {"hospital": "", "department": "", "doctor": "", "visitDate": ""},
    "diagnosis": {"description": "", "icdCode": "", "diseaseName": ""},
    "treatment": {"procedures": [], "medications": []},
    "document": {"title": "", "certificateType": ""},
    "restPeriod": "",
    "accident": false
  },
  "flattenedFields": {
    "hospital": "", "department": "", "doctor": "", "visitDate": "",
    "diagnosis": "", "treatments": [], "medications": [],
    "documentTitle": "", "certificateType": "", "icdCode": "",
    "diseaseName": "", "restPeriod": "", "isAccidentRelated": false
  }
}"#;

const INSURANCE_STRUCTURE_SCHEMA: &str = r#"{
  "fullInfo": {
    "basicInfo": {"company": "", "policyType": "", "policyName": "", "policyNumber": "", "effectiveDate": "", "expiryDate": ""},
    "parties": {"insured": "", "beneficiary": ""},
    "coverage": [{"name": "", "amount": 0, "unit": ""}],
    "claimDocuments": []
  },
  "flattenedFields": {
    "insuranceCompany": "", "policyType": "", "policyName": "", "policyNumber": "",
    "effectiveDate": "", "expiryDate": "", "insuredName": "", "beneficiary": "",
    "coverageItems": [{"type": "", "amount": 0, "unit": ""}],
    "claimDocuments": []
  }
}"#;

const UNKNOWN_RULE: &str =
    "If a value is not stated in the input, write \"to be filled\". Never guess.";

/// Stage sequence for a document of the given kind.
pub fn stages_for(kind: DocumentKind) -> Vec<StageSpec> {
    match kind {
        DocumentKind::Medical => medical_stages(),
        DocumentKind::Insurance => insurance_stages(),
    }
}

pub fn medical_stages() -> Vec<StageSpec> {
    vec![
        StageSpec {
            id: STAGE_EXTRACT,
            input: StageInput::Ingest,
            format: ResponseFormat::FreeText,
            build_prompt: medical_extract_prompt,
        },
        StageSpec {
            id: STAGE_STRUCTURE,
            input: StageInput::Prior(STAGE_EXTRACT),
            format: ResponseFormat::JsonObject,
            build_prompt: medical_structure_prompt,
        },
        StageSpec {
            id: STAGE_ANALYZE,
            input: StageInput::Prior(STAGE_STRUCTURE),
            format: ResponseFormat::JsonObject,
            build_prompt: medical_analysis_prompt,
        },
    ]
}

pub fn insurance_stages() -> Vec<StageSpec> {
    vec![
        StageSpec {
            id: STAGE_EXTRACT,
            input: StageInput::Ingest,
            format: ResponseFormat::FreeText,
            build_prompt: insurance_extract_prompt,
        },
        StageSpec {
            id: STAGE_STRUCTURE,
            input: StageInput::Prior(STAGE_EXTRACT),
            format: ResponseFormat::JsonObject,
            build_prompt: insurance_structure_prompt,
        },
        StageSpec {
            id: STAGE_EVALUATE,
            input: StageInput::Prior(STAGE_STRUCTURE),
            format: ResponseFormat::JsonObject,
            build_prompt: policy_evaluation_prompt,
        },
    ]
}

/// Single-stage sequence used to score a policy from its text alone.
pub fn evaluation_only_stages() -> Vec<StageSpec> {
    vec![StageSpec {
        id: STAGE_EVALUATE,
        input: StageInput::Ingest,
        format: ResponseFormat::JsonObject,
        build_prompt: policy_evaluation_prompt,
    }]
}

fn ingest_request(system: String, instructions: &str, ingest: &FileIngest) -> LlmRequest {
    let user = match ingest.kind {
        FileKind::Text => format!(
            "{}\n\nDOCUMENT:\n{}",
            instructions,
            ingest.text.as_deref().unwrap_or_default()
        ),
        FileKind::Url => format!(
            "{}\n\nDOCUMENT URL: {}",
            instructions,
            ingest.text.as_deref().unwrap_or_default()
        ),
        FileKind::Image => format!("{}\n\nThe document is attached as an image.", instructions),
    };

    LlmRequest {
        system,
        user,
        image_data: ingest.image_data.clone(),
        json_mode: false,
    }
}

fn prior_request(system: String, instructions: String, prior: &Value) -> LlmRequest {
    let prior_text = match prior.get("text").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => serde_json::to_string_pretty(prior).unwrap_or_default(),
    };

    LlmRequest {
        system,
        user: format!("{}\n\nINPUT:\n{}", instructions, prior_text),
        image_data: None,
        json_mode: true,
    }
}

fn unexpected_input(stage: &str, got: PromptInput<'_>) -> AppError {
    let got = match got {
        PromptInput::Ingest(_) => "the raw ingest",
        PromptInput::Prior(_) => "a prior stage output",
    };
    AppError::Internal(format!(
        "prompt builder for stage '{}' cannot take {}",
        stage, got
    ))
}

fn medical_extract_prompt(input: PromptInput<'_>) -> Result<LlmRequest, AppError> {
    let PromptInput::Ingest(ingest) = input else {
        return Err(unexpected_input(STAGE_EXTRACT, input));
    };
    Ok(ingest_request(
        "You read medical documents (diagnosis certificates, receipts, discharge notes) \
         and list every fact relevant to an insurance claim."
            .to_string(),
        &format!(
            "List, as bullet points starting with '- ', the hospital, department, doctor, \
             visit date, diagnosis, ICD code, disease name, treatments, medications, \
             document title, certificate type, prescribed rest period, and whether the \
             condition is accident related. {}",
            UNKNOWN_RULE
        ),
        ingest,
    ))
}

fn medical_structure_prompt(input: PromptInput<'_>) -> Result<LlmRequest, AppError> {
    let PromptInput::Prior(prior) = input else {
        return Err(unexpected_input(STAGE_STRUCTURE, input));
    };
    Ok(prior_request(
        "You convert extracted medical facts into JSON. Respond with one JSON object only."
            .to_string(),
        format!(
            "Fill this JSON structure from the facts below. `fullInfo` and `flattenedFields` \
             carry the same data at different granularity. {}\n{}",
            UNKNOWN_RULE, MEDICAL_STRUCTURE_SCHEMA
        ),
        prior,
    ))
}

fn medical_analysis_prompt(input: PromptInput<'_>) -> Result<LlmRequest, AppError> {
    let PromptInput::Prior(prior) = input else {
        return Err(unexpected_input(STAGE_ANALYZE, input));
    };
    Ok(prior_request(
        "You are a claims analyst reviewing a structured medical record.".to_string(),
        "Return a JSON object with keys \"diseaseName\", \"icdCode\", \"diagnosis\", \
         \"restPeriod\", \"isAccidentRelated\" (boolean), \"claimableItems\" (array of \
         strings) and \"notes\". Prefer the values already present in the input."
            .to_string(),
        prior,
    ))
}

fn insurance_extract_prompt(input: PromptInput<'_>) -> Result<LlmRequest, AppError> {
    let PromptInput::Ingest(ingest) = input else {
        return Err(unexpected_input(STAGE_EXTRACT, input));
    };
    Ok(ingest_request(
        "You read insurance policies and list the terms relevant to making a claim."
            .to_string(),
        &format!(
            "List, as bullet points starting with '- ', the insurance company, policy type, \
             policy name, policy number, effective and expiry dates, insured person, \
             beneficiary, every coverage item with its amount and unit, and the documents \
             required to file a claim. {}",
            UNKNOWN_RULE
        ),
        ingest,
    ))
}

fn insurance_structure_prompt(input: PromptInput<'_>) -> Result<LlmRequest, AppError> {
    let PromptInput::Prior(prior) = input else {
        return Err(unexpected_input(STAGE_STRUCTURE, input));
    };
    Ok(prior_request(
        "You convert extracted policy terms into JSON. Respond with one JSON object only."
            .to_string(),
        format!(
            "Fill this JSON structure from the terms below. Amounts are plain numbers. \
             `fullInfo` and `flattenedFields` carry the same data at different \
             granularity. {}\n{}",
            UNKNOWN_RULE, INSURANCE_STRUCTURE_SCHEMA
        ),
        prior,
    ))
}

fn policy_evaluation_prompt(input: PromptInput<'_>) -> Result<LlmRequest, AppError> {
    let instructions = format!(
        "Score the policy on the rubric below. Each section has exactly 5 items, in this \
         order, and each item scores 0, 0.5 or 1 with a one-sentence reason.\n{}\n\
         Return a JSON object: {{\"totalScore\": number, \"recommendation\": string, \
         \"sections\": {{\"content\": {{\"items\": [{{\"name\", \"score\", \"reason\"}}]}}, \
         \"pricing\": .., \"company\": .., \"flexibility\": ..}}, \"strengths\": [], \
         \"weaknesses\": [], \"suggestions\": []}}",
        rubric_instructions()
    );
    let system = "You are an independent insurance policy reviewer.".to_string();

    Ok(match input {
        PromptInput::Ingest(ingest) => ingest_request(system, &instructions, ingest),
        PromptInput::Prior(prior) => prior_request(system, instructions, prior),
    })
}
