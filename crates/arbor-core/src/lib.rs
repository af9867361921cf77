//! Core shared types for Arbor.
//!
//! Everything here is cheap to clone and free of cache state: element handles,
//! cancellation tokens, injectable clocks and the lock helpers used by the
//! cache crates.

mod cancel;
mod clock;
mod handle;
pub mod sync;

pub use cancel::{Cancelled, CancellationToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use handle::{Ancestors, ElementKind, Handle};
