//! Element model caches for Arbor.
//!
//! Handles are cheap identities; the data behind them lives here:
//! - [`InfoCache`] holds computed [`ElementInfo`] records in three LRU tiers and
//!   cascades eviction to cached descendants.
//! - [`BufferCache`] holds opened [`TextBuffer`]s for content-bearing elements.
//! - [`ModelManager`] opens elements through a [`StructureBuilder`], staging
//!   everything a build discovers in an [`OpenContext`] and committing it in one
//!   short critical section (first writer wins).
//!
//! Evictions never run close logic under a cache lock. Mutating operations hand
//! back a [`PendingClose`] batch which the manager drains in a close pass.

mod buffer;
mod buffer_cache;
mod error;
mod info;
mod info_cache;
mod manager;
mod staging;

pub use buffer::{BufferListener, TextBuffer};
pub use buffer_cache::BufferCache;
pub use error::{CloseError, ModelError, Result, StructuralError};
pub use info::{ElementFlags, ElementInfo, InfoPayload, SourceRange};
pub use info_cache::{CacheTier, Evicted, InfoCache, InfoCacheConfig, InfoCacheStats, PendingClose};
pub use manager::{CloseListener, CloseReport, ModelConfig, ModelManager};
pub use staging::{OpenContext, Staging, StructureBuilder};
