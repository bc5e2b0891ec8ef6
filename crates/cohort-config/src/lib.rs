//! Cohort Config
//!
//! Serializable settings for a cohort host. The library crates take plain
//! values (a [`Discipline`], an [`EvictionStrategy`]); this crate is where
//! those values come from when they are read from a JSON file.

mod config;
mod enums;
mod error;

pub use config::{CacheConfig, CohortConfig, LoggingConfig, WorkConfig};
pub use enums::{Discipline, EvictionStrategy};
pub use error::ConfigError;
