use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Panics at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub embeddings_url: String,
    pub embeddings_api_key: String,
    pub embeddings_model: String,
    /// Selects the deterministic keyword extractor instead of the LLM one.
    /// This is a construction-time choice, not a runtime fallback.
    pub test_extractor: bool,
    /// Skips the pgvector index in favour of an empty in-memory one.
    pub offline_index: bool,
    pub taxonomy_snapshot: String,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            embeddings_url: std::env::var("EMBEDDINGS_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embeddings_api_key: std::env::var("EMBEDDINGS_API_KEY").unwrap_or_default(),
            embeddings_model: std::env::var("EMBEDDINGS_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-large".to_string()),
            test_extractor: std::env::var("GAPWISE_TEST_EXTRACTOR")
                .map(|v| v == "1")
                .unwrap_or(false),
            offline_index: std::env::var("GAPWISE_OFFLINE_INDEX")
                .map(|v| v == "1")
                .unwrap_or(false),
            taxonomy_snapshot: std::env::var("TAXONOMY_SNAPSHOT")
                .unwrap_or_else(|_| "onet-28.2".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}
