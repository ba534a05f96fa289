//! Process configuration loaded once at startup.
//!
//! All knobs come from the environment (optionally via a `.env` file); the
//! resulting [`Settings`] value is handed to [`crate::ask::AppContext`] so no
//! component reads the environment on its own.

use std::env;
use std::time::Duration;

use crate::types::AssistError;

/// Default per-call timeout for page fetches.
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(12);

/// Default per-call timeout for LLM invocations.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct Settings {
    /// SQLite file backing both the vector store and session tables.
    pub database_path: String,
    /// Bind address for the HTTP transport.
    pub bind_addr: String,
    /// OpenAI-compatible chat-completions endpoint.
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: String,
    /// OpenAI-compatible embeddings endpoint (must serve a 384-dim model).
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub embedding_api_key: String,
    /// SearXNG-style JSON search endpoint.
    pub search_base_url: String,
    pub scrape_timeout: Duration,
    pub llm_timeout: Duration,
}

impl Settings {
    /// Reads settings from the environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, AssistError> {
        // Missing .env is fine; explicit environment still applies.
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_path: var_or("SHOPSIGHT_DB", "shopsight.db"),
            bind_addr: var_or("SHOPSIGHT_BIND", "127.0.0.1:8080"),
            llm_base_url: var_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_model: var_or("LLM_MODEL", "gpt-4o-mini"),
            llm_api_key: required("LLM_API_KEY")?,
            embedding_base_url: var_or("EMBEDDING_BASE_URL", "https://api.openai.com/v1"),
            embedding_model: var_or("EMBEDDING_MODEL", "all-MiniLM-L6-v2"),
            embedding_api_key: var_or("EMBEDDING_API_KEY", ""),
            search_base_url: required("SEARCH_BASE_URL")?,
            scrape_timeout: duration_var("SCRAPE_TIMEOUT_SECS", DEFAULT_SCRAPE_TIMEOUT),
            llm_timeout: duration_var("LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT),
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn required(key: &str) -> Result<String, AssistError> {
    env::var(key).map_err(|_| AssistError::InvalidInput(format!("{key} must be set")))
}

fn duration_var(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
