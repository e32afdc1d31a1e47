use connector_drive::DriveError;
use connector_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("{0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
