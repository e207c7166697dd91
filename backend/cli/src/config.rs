use std::time::Duration;

use serde::Deserialize;

use atlas_planner::providers::openai_compat::DEFAULT_OLLAMA_URL;

/// Atlas runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server bind address
    pub bind_address: String,
    /// HTTP server port
    pub port: u16,
    /// Log level
    pub log_level: String,
    /// Directory for the rolling JSON log
    pub log_dir: String,

    // Providers
    pub ollama_url: String,
    pub ollama_model: Option<String>,
    pub fallback_api_base: String,
    pub fallback_api_key: Option<String>,
    pub fallback_model: Option<String>,
    /// Providers in the order they are tried
    pub provider_order: Vec<String>,
    pub provider_timeout_ms: u64,

    // Engine
    pub intent_cache_size: usize,
    pub intent_cache_ttl_ms: u64,
    pub max_refinement_cycles: u32,
    pub session_idle_ttl_secs: u64,
    pub heuristic_fallback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_or = |key: &str, default: u64| {
            get(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        Self {
            bind_address: non_empty("ORCH_BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get("ORCH_PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(5101),
            log_level: non_empty("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_dir: non_empty("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            ollama_url: non_empty("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            ollama_model: non_empty("OLLAMA_MODEL"),
            fallback_api_base: non_empty("FALLBACK_API_BASE")
                .unwrap_or_else(|| "http://127.0.0.1:3010/v1".to_string()),
            fallback_api_key: non_empty("FALLBACK_API_KEY"),
            fallback_model: non_empty("FALLBACK_MODEL"),
            provider_order: non_empty("PROVIDER_ORDER")
                .map(|raw| parse_list(&raw))
                .unwrap_or_else(|| vec!["ollama".to_string(), "fallback".to_string()]),
            provider_timeout_ms: parse_or("PROVIDER_TIMEOUT_MS", 20_000),
            intent_cache_size: parse_or("INTENT_CACHE_SIZE", 64) as usize,
            intent_cache_ttl_ms: parse_or("INTENT_CACHE_TTL_MS", 300_000),
            max_refinement_cycles: parse_or("ORCH_MAX_REFINEMENT_CYCLES", 3) as u32,
            session_idle_ttl_secs: parse_or("SESSION_IDLE_TTL_SECS", 3_600),
            heuristic_fallback: get("INTENT_HEURISTIC_FALLBACK")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
