use crate::value::Value;

use thiserror::Error;

/// Errors that a chain step can raise, and the forms they take once escalated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
  #[error("Step failed: {0}")]
  StepFailed(String),

  #[error("Step threw a value: {0:?}")]
  Thrown(Value),

  #[error("Step panicked: {0}")]
  StepPanicked(String),

  #[error("Continuation was dropped before the thenable settled")]
  ContinuationDropped,

  #[error("Unhandled chain rejection: {0}")]
  Unhandled(Box<ChainError>),
}

impl ChainError {
  /// Shorthand for a `StepFailed` error built from any message.
  pub fn failed(message: impl Into<String>) -> Self {
    ChainError::StepFailed(message.into())
  }

  /// Builds a `StepPanicked` error from a `catch_unwind` payload.
  pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "non-string panic payload".to_string()
    };
    ChainError::StepPanicked(message)
  }
}
