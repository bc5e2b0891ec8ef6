//! Cache key derivation.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;

/// Opaque cache key: a stable hash of whatever discriminators the caller
/// supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(u64);

impl CacheKey {
  /// Key derived from explicit hashable values.
  ///
  /// Tuples work for several discriminators: `CacheKey::of(&("user", 42))`.
  pub fn of<K: Hash + ?Sized>(discriminators: &K) -> Self {
    let mut hasher = DefaultHasher::new();
    discriminators.hash(&mut hasher);
    Self(hasher.finish())
  }

  /// Key identifying the source location that called this function.
  #[track_caller]
  pub fn caller() -> Self {
    let location = Location::caller();
    Self::of(&(location.file(), location.line(), location.column()))
  }

  pub fn as_u64(self) -> u64 {
    self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:016x}", self.0)
  }
}

/// A call-site discriminator: file, enclosing module, line and column.
///
/// Build one with [`call_site!`](crate::call_site).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
  pub file: &'static str,
  pub module: &'static str,
  pub line: u32,
  pub column: u32,
}

impl CallSite {
  pub const fn new(file: &'static str, module: &'static str, line: u32, column: u32) -> Self {
    Self {
      file,
      module,
      line,
      column,
    }
  }
}

impl From<CallSite> for CacheKey {
  fn from(site: CallSite) -> Self {
    CacheKey::of(&site)
  }
}

/// The [`CallSite`] of the macro invocation.
#[macro_export]
macro_rules! call_site {
  () => {
    $crate::CallSite::new(file!(), module_path!(), line!(), column!())
  };
}
