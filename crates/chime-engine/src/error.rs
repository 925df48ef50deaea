use thiserror::Error;

use chime_store::StoreError;

/// Errors that can occur within the alarm engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A durable store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The engine was constructed with unusable timer parameters.
    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
