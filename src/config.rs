use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded explicitly at startup.
///
/// Every external handle (model client, store pool) is constructed from this
/// and passed down through `AppState`; nothing is initialized at import time.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub openrouter_api_key: String,
    pub completion_model: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub static_dir: PathBuf,
    pub retrieval_top_k: usize,
    pub llm_timeout: Duration,
    pub embed_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL not set"))?;
        let openrouter_api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;

        Ok(Self {
            database_url,
            openrouter_api_key,
            completion_model: env_or("COMPLETION_MODEL", "openai/gpt-4o-mini"),
            port: parse_env("PORT", 3000),
            data_dir: PathBuf::from(env_or("DATA_DIR", "data")),
            static_dir: PathBuf::from(env_or("STATIC_DIR", "static")),
            retrieval_top_k: parse_env("RETRIEVAL_TOP_K", 4),
            llm_timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 120)),
            embed_timeout: Duration::from_secs(parse_env("EMBED_TIMEOUT_SECS", 60)),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
