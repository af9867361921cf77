//! Two-generation cache for data produced by background scans.
//!
//! Readers always get an immutable [`IndexSnapshot`]; a scan records per-unit
//! deltas on the side and publishes a new snapshot once, when it ends.

mod cache;
mod error;
mod snapshot;

pub use cache::{IndexCache, ScanHandle, ScanRecorder};
pub use error::{IndexError, Result};
pub use snapshot::IndexSnapshot;
