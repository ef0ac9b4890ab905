//! Environment-driven configuration: a plain struct with a `Default` impl
//! and an `from_env()` constructor, no config-loading crate.

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub nats_url: String,
    pub log_level: String,
    pub log_format: String,
    pub service_name: String,
    /// Defaults to 30s; overridable per deployment.
    pub cooldown_duration_secs: i64,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self {
            nats_url: std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "agent-service".into()),
            cooldown_duration_secs: std::env::var("COOLDOWN_DURATION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(crate::core::DEFAULT_COOLDOWN_DURATION_SECS),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".into(),
            log_level: "info".into(),
            log_format: "text".into(),
            service_name: "agent-service".into(),
            cooldown_duration_secs: crate::core::DEFAULT_COOLDOWN_DURATION_SECS,
        }
    }
}
