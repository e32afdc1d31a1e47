use connector_store::StoreError;
use connector_transport::{ErrorDetail, TransportError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no refresh token configured for account {0}")]
    MissingRefreshToken(String),

    #[error("token endpoint rejected the exchange for account {account} (status {status})")]
    ExchangeRejected {
        account: String,
        status: u16,
        detail: ErrorDetail,
    },

    #[error("service account configuration error: {0}")]
    Configuration(String),

    #[error("token assertion signing failed: {0}")]
    Signing(String),

    #[error("transport error during token exchange: {0}")]
    Transport(#[from] TransportError),

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Upstream HTTP status equivalent for collaborators building error
    /// envelopes. Missing credentials carry 401 semantics.
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingRefreshToken(_) => 401,
            Self::ExchangeRejected { status, .. } => *status,
            Self::Configuration(_) | Self::Signing(_) => 500,
            Self::Transport(_) | Self::Store(_) => 502,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
