use connector_auth::AuthError;
use connector_transport::{ErrorDetail, TransportError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Drive API returned {status}")]
    Api { status: u16, detail: ErrorDetail },

    #[error("Drive API request failed after {attempts} attempts (last status {status})")]
    RetriesExhausted {
        attempts: u32,
        status: u16,
        detail: ErrorDetail,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl DriveError {
    /// Upstream HTTP status, when one was observed.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth(auth) => Some(auth.status()),
            Self::Api { status, .. } | Self::RetriesExhausted { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }

    /// Upstream error payload, when one was captured.
    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            Self::Api { detail, .. } | Self::RetriesExhausted { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriveError>;
