//! Sequential LLM stage runner.
//!
//! Stages run strictly in order. A stage reads either the raw ingest or the
//! parsed output of one earlier stage, never both, which keeps later prompts
//! small. Each call is isolated: failures are recorded on the stage's
//! [`StageResult`] and the run continues.

use serde_json::{Map, Value};

use crate::config::LlmSettings;
use crate::errors::AppError;
use crate::json_extract::parse_json_object;
use crate::llm_client::{LlmRequest, LlmService, OpenAiClient};
use crate::models::{FileIngest, StageResult};

/// What a stage's prompt is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInput {
    Ingest,
    /// Parsed output of the named earlier stage.
    Prior(&'static str),
}

/// Expected shape of a stage's raw completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Bullet points; parsed into `{"text": .., "bullets": [..]}`.
    FreeText,
    /// A JSON object, possibly surrounded by prose.
    JsonObject,
}

/// The single input handed to a prompt builder.
#[derive(Debug, Clone, Copy)]
pub enum PromptInput<'a> {
    Ingest(&'a FileIngest),
    Prior(&'a Value),
}

/// Builds a stage's request. Fails when handed the wrong kind of input.
pub type PromptBuilder = fn(PromptInput<'_>) -> Result<LlmRequest, AppError>;

#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub id: &'static str,
    pub input: StageInput,
    pub format: ResponseFormat,
    pub build_prompt: PromptBuilder,
}

pub struct Orchestrator<L> {
    llm: L,
}

impl Orchestrator<OpenAiClient> {
    /// Builds an orchestrator backed by the HTTP client. The credential in
    /// `settings` is read once, here.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, AppError> {
        Ok(Self::new(OpenAiClient::new(settings)?))
    }
}

impl<L: LlmService> Orchestrator<L> {
    pub fn new(llm: L) -> Self {
        Self { llm }
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    /// Runs `stages` against `ingest`, returning one result per stage.
    pub async fn run(&self, ingest: &FileIngest, stages: &[StageSpec]) -> Vec<StageResult> {
        let mut results: Vec<StageResult> = Vec::with_capacity(stages.len());
        let empty = Value::Object(Map::new());

        for stage in stages {
            let request = match stage.input {
                StageInput::Ingest => (stage.build_prompt)(PromptInput::Ingest(ingest)),
                StageInput::Prior(dependency) => {
                    match results.iter().find(|r| r.stage_id == dependency) {
                        Some(prior) if prior.succeeded => {
                            let input = prior.parsed.as_ref().unwrap_or(&empty);
                            (stage.build_prompt)(PromptInput::Prior(input))
                        }
                        _ => {
                            tracing::warn!(
                                "Skipping stage '{}': upstream stage '{}' did not succeed",
                                stage.id,
                                dependency
                            );
                            results.push(StageResult {
                                stage_id: stage.id.to_string(),
                                raw_output: String::new(),
                                parsed: Some(empty.clone()),
                                succeeded: false,
                                error: Some(format!(
                                    "skipped: upstream stage {} failed",
                                    dependency
                                )),
                            });
                            continue;
                        }
                    }
                }
            };

            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!("Stage '{}' has no usable prompt: {}", stage.id, e);
                    results.push(StageResult::failed(stage.id, String::new(), e.to_string()));
                    continue;
                }
            };

            tracing::info!("Running stage '{}'", stage.id);
            let result = match self.llm.complete(&request).await {
                Ok(raw) => match parse_stage_output(stage.format, &raw) {
                    Ok(parsed) => StageResult::ok(stage.id, raw, parsed),
                    Err(e) => {
                        tracing::warn!("Stage '{}' output unusable: {}", stage.id, e);
                        StageResult::failed(stage.id, raw, e.to_string())
                    }
                },
                Err(e) => {
                    tracing::warn!("Stage '{}' call failed: {}", stage.id, e);
                    StageResult::failed(stage.id, String::new(), e.to_string())
                }
            };
            results.push(result);
        }

        results
    }
}

/// Turns a raw completion into the value later stages consume.
pub fn parse_stage_output(format: ResponseFormat, raw: &str) -> Result<Value, AppError> {
    match format {
        ResponseFormat::JsonObject => parse_json_object(raw),
        ResponseFormat::FreeText => {
            let text = raw.trim();
            if text.is_empty() {
                return Err(AppError::Parse("Empty free-text response".to_string()));
            }
            let bullets = extract_bullets(text);
            Ok(serde_json::json!({ "text": text, "bullets": bullets }))
        }
    }
}

/// Bullet lines with their markers removed; every non-blank line when the
/// text has no bullet markers at all.
fn extract_bullets(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let bulleted: Vec<String> = lines
        .iter()
        .filter_map(|line| strip_bullet(line))
        .filter(|l| !l.is_empty())
        .collect();

    if bulleted.is_empty() {
        lines.into_iter().map(str::to_string).collect()
    } else {
        bulleted
    }
}

fn strip_bullet(line: &str) -> Option<String> {
    for marker in ["- ", "* ", "• ", "・"] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim().to_string());
        }
    }

    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim().to_string());
        }
    }

    None
}

/// Human-readable reason when any stage of a run failed.
pub fn degradation_reason(results: &[StageResult]) -> Option<String> {
    let failures: Vec<String> = results
        .iter()
        .filter(|r| !r.succeeded)
        .map(|r| {
            format!(
                "{}: {}",
                r.stage_id,
                r.error.as_deref().unwrap_or("failed")
            )
        })
        .collect();

    if failures.is_empty() {
        None
    } else {
        Some(failures.join("; "))
    }
}
