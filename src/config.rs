//! Environment-driven configuration, read once at startup.

use std::time::Duration;

/// Tunables for the orchestration engine, all overridable via environment
/// variables with the defaults from the design notes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub run_timeout: Duration,
    pub subscriber_queue_cap: usize,
    pub keepalive_interval: Duration,
    pub query_truncate_chars: usize,
    pub response_truncate_chars: usize,
    pub max_live_sessions: usize,
    pub persist_cancelled: bool,
    pub db_path: String,
    pub port: u16,
    pub cors_origin: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            run_timeout: Duration::from_secs(600),
            subscriber_queue_cap: 256,
            keepalive_interval: Duration::from_secs(15),
            query_truncate_chars: 1000,
            response_truncate_chars: 5000,
            max_live_sessions: 1000,
            persist_cancelled: true,
            db_path: "orchestrator.db".to_string(),
            port: 8080,
            cors_origin: None,
        }
    }
}

impl EngineConfig {
    /// Build configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_u32("ENGINE_MAX_RETRIES", defaults.max_retries),
            run_timeout: Duration::from_secs(env_u64("ENGINE_RUN_TIMEOUT_S", 600)),
            subscriber_queue_cap: env_usize(
                "ENGINE_SUBSCRIBER_QUEUE_CAP",
                defaults.subscriber_queue_cap,
            ),
            keepalive_interval: Duration::from_secs(env_u64("ENGINE_KEEPALIVE_INTERVAL_S", 15)),
            query_truncate_chars: env_usize(
                "ENGINE_QUERY_TRUNCATE_CHARS",
                defaults.query_truncate_chars,
            ),
            response_truncate_chars: env_usize(
                "ENGINE_RESPONSE_TRUNCATE_CHARS",
                defaults.response_truncate_chars,
            ),
            max_live_sessions: env_usize("ENGINE_MAX_LIVE_SESSIONS", defaults.max_live_sessions),
            persist_cancelled: env_bool("ENGINE_PERSIST_CANCELLED", defaults.persist_cancelled),
            db_path: std::env::var("ENGINE_DB_PATH").unwrap_or(defaults.db_path),
            port: env_u32("ENGINE_PORT", u32::from(defaults.port)) as u16,
            cors_origin: std::env::var("ENGINE_CORS_ORIGIN").ok(),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
