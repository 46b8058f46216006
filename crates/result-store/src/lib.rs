//! Durable key/value persistence for ContextAware.
//!
//! Two partitions are kept: per-page [`PageResult`]s (at most
//! [`DEFAULT_MAX_RESULTS`], evicted oldest first) and per-site
//! [`SiteContext`]s (each holding at most [`DEFAULT_MAX_RECENT_PER_SITE`]
//! recent results), plus the [`Preferences`] singleton. Backend failures
//! never reach callers: losing a cached summary must not block delivering a
//! freshly computed one.
//!
//! [`PageResult`]: contextaware_protocol::PageResult
//! [`SiteContext`]: contextaware_protocol::SiteContext
//! [`Preferences`]: contextaware_protocol::Preferences

pub mod backend;
pub mod clock;
pub mod error;
pub mod store;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, StoreError};
pub use store::{ResultStore, StoreLimits};

pub const DEFAULT_MAX_RESULTS: usize = 100;
pub const DEFAULT_MAX_RECENT_PER_SITE: usize = 10;

/// Storage key holding the [`Preferences`](contextaware_protocol::Preferences).
pub const SETTINGS_KEY: &str = "settings";
/// Storage key holding the `{pageKey -> PageResult}` map.
pub const SUMMARIES_KEY: &str = "summaries";
/// Storage key holding the `{siteKey -> SiteContext}` map.
pub const CONTEXT_KEY: &str = "context";
