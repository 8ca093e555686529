//! Claims AI Document Pipeline Library
//!
//! Turns uploaded medical and insurance documents into canonical,
//! missing-field-aware records through a sequence of LLM stages, then scores
//! policies and checks claim readiness on top of those records.
//!
//! # Modules
//!
//! - `intake`: Upload normalization and size limits.
//! - `orchestrator`: Sequential LLM stage runner.
//! - `prompts`: Prompt builders and stage sequences per document kind.
//! - `llm_client`: OpenAI-compatible client behind the `LlmService` trait.
//! - `llm_cache`: Checksum-validated response cache.
//! - `circuit_breaker`: Circuit breaker for the LLM endpoint.
//! - `json_extract`: Balanced-brace JSON object extraction.
//! - `reconciler`: Stage outputs to canonical records.
//! - `scoring`: Policy-quality rubric scoring.
//! - `claims`: Claim checklist and submission workflow.
//! - `pipeline`: Single-document and batch processing, batch save.
//! - `db` / `db_storage`: PostgreSQL pool and record store.
//! - `handlers`: HTTP request handlers.
//! - `config`, `errors`, `models`: Configuration, error and data types.

pub mod circuit_breaker;
pub mod claims;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod intake;
pub mod json_extract;
pub mod llm_cache;
pub mod llm_client;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod reconciler;
pub mod scoring;
