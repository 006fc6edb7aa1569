//! Turn errors

use thiserror::Error;

use crate::providers::ProviderError;
use crate::store::StoreError;

/// Ways a chat turn can end without completing
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// No usable model, or its stream failed mid-turn
    #[error("Model stream failed: {0}")]
    ModelStream(ProviderError),

    #[error("Failed to persist conversation: {0}")]
    Persistence(#[from] StoreError),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => OrchestratorError::Cancelled,
            other => OrchestratorError::ModelStream(other),
        }
    }
}

impl OrchestratorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestratorError::Cancelled)
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
