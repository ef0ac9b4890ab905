use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Bus(#[from] microcloud_bus::BusError),
    #[error(transparent)]
    Repo(#[from] microcloud_repo::RepoError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
