use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Bus(#[from] microcloud_bus::BusError),
    #[error(transparent)]
    Repo(#[from] microcloud_repo::RepoError),
    #[error("action {0} not found")]
    NotFound(uuid::Uuid),
    #[error("action {id} is {actual}, not PENDING")]
    NotPending {
        id: uuid::Uuid,
        actual: microcloud_proto::ActionStatus,
    },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
