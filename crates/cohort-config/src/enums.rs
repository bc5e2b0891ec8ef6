use serde::{Deserialize, Serialize};

/// How a unit of work treats repeated drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
  /// Every drive spawns a fresh invocation.
  #[default]
  Plain,
  /// The operation runs at most once; its outcome is kept forever.
  Lazy,
  /// Drives attach to the in-flight invocation; a new one starts after it settles.
  Shared,
}

/// When the keyed cache forgets an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStrategy {
  /// Drop the entry as soon as the cached value reaches a terminal state.
  #[default]
  RemoveOnTerminal,
  /// Entries only leave through an explicit `remove` or `clear`.
  Manual,
}
