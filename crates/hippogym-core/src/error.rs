//! Error taxonomy shared by the core and the server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HippoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("user {user_id:?} already has an active trial")]
    DuplicateSession { user_id: String },

    #[error("handshake did not carry a usable userId")]
    MissingUserId,

    #[error("failed to serialize outbound message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("trial is {actual}, expected {expected}")]
    TrialState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("experiment failure: {0}")]
    Experiment(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HippoError>;
