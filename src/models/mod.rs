//! Persisted records owned or updated by the relay.
//!
//! - [`CacheEntry`]: one stored upstream payload, append-only
//! - [`FetchAttempt`]: one audit/ledger row per fetch decision, append-only
//! - [`ProviderLink`]: per-account session state, upserted

pub mod cache_entry;
pub mod fetch_attempt;
pub mod provider_link;

pub use cache_entry::{CacheEntry, NewCacheEntry};
pub use fetch_attempt::{AttemptWindow, FetchAttempt, NewFetchAttempt};
pub use provider_link::{FetchLinkUpdate, LinkError, ProviderLink, SessionArtifacts, SessionBlob};
