//! Archive access with cached validity.
//!
//! Opening a broken jar is expensive and tends to be retried from many
//! places, so the outcome of every open is remembered for a short TTL by the
//! [`ValidityCache`]. Archives opened during one logical operation can be
//! pooled in an [`ArchiveSession`] owned by the caller that started it.

mod error;
mod manager;
mod opener;
mod session;
mod validity;

pub use error::{ArchiveError, Result};
pub use manager::ArchiveManager;
pub use opener::{ArchiveOpener, OpenArchive, ZipOpener};
pub use session::{ArchiveSession, SessionOwner};
pub use validity::{ArchiveValidity, ValidityCache};
