use thiserror::Error;

use crate::key::CacheKey;

/// Errors that can occur during cache lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  /// The key already holds a value of another type.
  #[error("cache entry {key} is not a {expected}")]
  TypeMismatch {
    key: CacheKey,
    expected: &'static str,
  },
}
