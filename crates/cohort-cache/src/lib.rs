//! Cohort Cache
//!
//! [`KeyedCache`] makes concurrent identical work run once. Requests are
//! keyed by a [`CacheKey`]; the first request for a key builds the work and
//! everyone else asking for the same key while it is live gets that same
//! work back. Anything that implements [`OnTerminal`](cohort_core::OnTerminal)
//! can be cached, which covers both `UnitOfWork` and `BroadcastSequence`.
//!
//! ```ignore
//! let cache = KeyedCache::new();
//! let work: UnitOfWork<Profile, FetchError> = cache.retrieve_or_create(
//!   CacheKey::of(&("profile", user_id)),
//!   || UnitOfWork::from_future_fn(move || fetch_profile(user_id)).lazy(),
//! )?;
//! let profile = work.execute().await?;
//! ```

mod cache;
mod error;
mod key;

pub use cache::{Cacheable, KeyedCache};
pub use cohort_config::EvictionStrategy;
pub use error::CacheError;
pub use key::{CacheKey, CallSite};
