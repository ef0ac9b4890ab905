use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown scenario {0:?}")]
    UnknownScenario(String),
    #[error(transparent)]
    Bus(#[from] microcloud_bus::BusError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
