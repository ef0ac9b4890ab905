//! Environment-driven configuration: a plain struct with a `Default` impl
//! and an `from_env()` constructor, rather than a config-loading crate.

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub nats_url: String,
    pub addr: String,
    pub tick_interval_ms: u64,
    pub log_level: String,
    pub log_format: String,
    pub service_name: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            nats_url: std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".into()),
            addr: std::env::var("ADDR").unwrap_or_else(|_| "0.0.0.0:8081".into()),
            tick_interval_ms: std::env::var("TICK_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "simulation-engine".into()),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".into(),
            addr: "0.0.0.0:8081".into(),
            tick_interval_ms: 100,
            log_level: "info".into(),
            log_format: "text".into(),
            service_name: "simulation-engine".into(),
        }
    }
}
