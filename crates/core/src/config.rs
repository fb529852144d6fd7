use std::env;

use serde::{Deserialize, Serialize};

use crate::message::Locale;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            session: SessionConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  api:     base_url={}", self.api.base_url);
        tracing::info!(
            "  session: max_rounds={}, language={}, connect_timeout={}s",
            self.session.max_rounds,
            self.session.language,
            self.session.connect_timeout_secs
        );
    }
}

// ── API endpoint ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the debate backend, without trailing slash.
    pub base_url: String,
    /// Timeout for plain (non-streaming) API calls.
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    fn from_env() -> Self {
        let mut base_url = env_or("AGORA_API_URL", "http://localhost:8000");
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            request_timeout_secs: env_u64("AGORA_REQUEST_TIMEOUT_SECS", 15),
        }
    }
}

// ── Session defaults ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_rounds: u32,
    pub language: Locale,
    /// Connection-phase timeout; disarmed once the first event arrives.
    pub connect_timeout_secs: u64,
    /// How many entries the sidebar history cache keeps.
    pub history_limit: usize,
}

impl SessionConfig {
    fn from_env() -> Self {
        Self {
            max_rounds: env_u32("AGORA_MAX_ROUNDS", 3),
            language: env_opt("AGORA_LANGUAGE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(Locale::Zh),
            connect_timeout_secs: env_u64("AGORA_CONNECT_TIMEOUT_SECS", 30),
            history_limit: env_u32("AGORA_HISTORY_LIMIT", 5) as usize,
        }
    }
}
