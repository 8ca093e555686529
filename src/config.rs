use serde::Deserialize;

/// Default ceiling for a single uploaded document (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_MAX_DOCUMENTS_PER_REQUEST: usize = 10;

/// Room for the JSON envelope around the encoded documents.
const REQUEST_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Request body ceiling for a full batch: every document at the per-file
/// limit, base64-encoded, plus envelope overhead.
pub fn default_max_request_bytes(max_upload_bytes: u64, max_documents: usize) -> u64 {
    let encoded = max_upload_bytes.saturating_mul(4).div_ceil(3);
    encoded
        .saturating_mul(max_documents as u64)
        .saturating_add(REQUEST_OVERHEAD_BYTES)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    /// Per-document ceiling, checked after decoding.
    pub max_upload_bytes: u64,
    pub max_documents_per_request: usize,
    /// Whole HTTP body ceiling, enforced before the body is read.
    pub max_request_bytes: u64,
    /// `0` disables the response cache.
    pub llm_cache_ttl_secs: u64,
    pub llm_timeout_secs: Option<u64>,
}

/// Everything the LLM collaborator needs, handed to the client constructor.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub cache_ttl_secs: u64,
    pub timeout_secs: Option<u64>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            llm_api_key: std::env::var("LLM_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .map_err(|_| {
                    anyhow::anyhow!("LLM_API_KEY or OPENAI_API_KEY environment variable required")
                })
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("LLM_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            llm_model: std::env::var("LLM_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .ok()
                .map(|v| v.parse::<u64>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("MAX_UPLOAD_BYTES must be a positive integer"))?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            max_documents_per_request: std::env::var("MAX_DOCUMENTS_PER_REQUEST")
                .ok()
                .map(|v| v.parse::<usize>())
                .transpose()
                .map_err(|_| {
                    anyhow::anyhow!("MAX_DOCUMENTS_PER_REQUEST must be a positive integer")
                })?
                .unwrap_or(DEFAULT_MAX_DOCUMENTS_PER_REQUEST),
            max_request_bytes: 0,
            llm_cache_ttl_secs: std::env::var("LLM_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("LLM_CACHE_TTL_SECS must be a number of seconds"))?,
            llm_timeout_secs: std::env::var("LLM_TIMEOUT_SECS")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|v| v.parse::<u64>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("LLM_TIMEOUT_SECS must be a number of seconds"))?,
        };

        if !config.llm_base_url.starts_with("http://") && !config.llm_base_url.starts_with("https://")
        {
            anyhow::bail!("LLM_BASE_URL must start with http:// or https://");
        }
        if config.max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES must be greater than zero");
        }
        if config.max_documents_per_request == 0 {
            anyhow::bail!("MAX_DOCUMENTS_PER_REQUEST must be greater than zero");
        }
        config.max_request_bytes = std::env::var("MAX_REQUEST_BYTES")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|_| anyhow::anyhow!("MAX_REQUEST_BYTES must be a positive integer"))?
            .unwrap_or_else(|| {
                default_max_request_bytes(config.max_upload_bytes, config.max_documents_per_request)
            });
        if config.max_request_bytes < config.max_upload_bytes {
            anyhow::bail!("MAX_REQUEST_BYTES must be at least MAX_UPLOAD_BYTES");
        }

        // Never log the API key
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("LLM Base URL: {}", config.llm_base_url);
        tracing::debug!("LLM Model: {}", config.llm_model);
        tracing::debug!("Max upload bytes: {}", config.max_upload_bytes);
        tracing::debug!(
            "Max request: {} bytes, {} document(s)",
            config.max_request_bytes,
            config.max_documents_per_request
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            api_key: self.llm_api_key.clone(),
            base_url: self.llm_base_url.clone(),
            model: self.llm_model.clone(),
            cache_ttl_secs: self.llm_cache_ttl_secs,
            timeout_secs: self.llm_timeout_secs,
        }
    }
}
