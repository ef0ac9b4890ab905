//! Environment-driven configuration: a plain struct with a `Default` impl
//! and an `from_env()` constructor, no config-loading crate.

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub nats_url: String,
    pub log_level: String,
    pub log_format: String,
    pub service_name: String,
}

impl SignalConfig {
    pub fn from_env() -> Self {
        Self {
            nats_url: std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "signal-service".into()),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".into(),
            log_level: "info".into(),
            log_format: "text".into(),
            service_name: "signal-service".into(),
        }
    }
}
