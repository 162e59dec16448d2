use std::sync::PoisonError;

use thiserror::Error;

pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("unable to dispatch the task after {attempts} attempts")]
    DispatchExhausted { attempts: usize },
    #[error("the processor is closed")]
    Closed,
    #[error("internal error: {0}")]
    Internal(String),
}

impl<T> From<PoisonError<T>> for ProcessorError {
    fn from(error: PoisonError<T>) -> Self {
        ProcessorError::Internal(error.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ProcessorError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ProcessorError::Closed
    }
}
