//! Error taxonomy shared by every cohort primitive.

use std::any::Any;

use thiserror::Error;

/// Outcome error of driving a unit of work or pulling a sequence.
///
/// Errors raised by the wrapped operation or producer travel unchanged in
/// [`WorkError::Operation`], so callers can match on their own error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError<E> {
  /// The work or sequence was cancelled before or while it ran.
  #[error("execution cancelled")]
  Cancelled,

  /// The operation or producer failed.
  #[error("{0}")]
  Operation(E),

  /// The operation or producer panicked.
  #[error("operation panicked: {message}")]
  Panicked { message: String },
}

impl<E> WorkError<E> {
  /// Build a [`WorkError::Panicked`] from a caught panic payload.
  pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "unknown panic payload".to_string()
    };
    Self::Panicked { message }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }

  /// The operation's own error, if that is what this is.
  pub fn operation(&self) -> Option<&E> {
    match self {
      Self::Operation(e) => Some(e),
      _ => None,
    }
  }

  pub fn into_operation(self) -> Option<E> {
    match self {
      Self::Operation(e) => Some(e),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_panic_payloads() {
    let err: WorkError<()> = WorkError::from_panic(Box::new("boom"));
    assert_eq!(
      err,
      WorkError::Panicked {
        message: "boom".to_string()
      }
    );

    let err: WorkError<String> = WorkError::from_panic(Box::new(format!("code {}", 7)));
    assert_eq!(err.to_string(), "operation panicked: code 7");

    let err: WorkError<()> = WorkError::from_panic(Box::new(42_u8));
    assert!(matches!(err, WorkError::Panicked { .. }));
  }

  #[test]
  fn test_operation_error_is_carried_verbatim() {
    let err = WorkError::Operation("disk full".to_string());
    assert_eq!(err.to_string(), "disk full");
    assert_eq!(err.operation().map(String::as_str), Some("disk full"));
    assert!(!err.is_cancelled());
    assert_eq!(err.into_operation(), Some("disk full".to_string()));

    let cancelled: WorkError<String> = WorkError::Cancelled;
    assert!(cancelled.is_cancelled());
    assert_eq!(cancelled.into_operation(), None);
  }
}
