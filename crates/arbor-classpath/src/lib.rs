//! Memoized classpath container and variable resolution.
//!
//! Resolution itself belongs to an external [`Initializer`]; this crate only
//! remembers the outcome per `(owner, key)` with an explicit in-progress state,
//! so a resolver that reenters the cache for a key it is already resolving
//! gets an immediate answer instead of recursing or deadlocking.

mod container;
mod error;
mod lazy;
mod persist;

pub use container::{
    ClasspathContainer, ClasspathEntry, ContainerCache, ContainerKind, ContainerPath, ProjectName,
    VariableCache,
};
pub use error::{ClasspathError, ResolutionError, Result};
pub use lazy::{InitContext, Initializer, LazyCacheStats, LazyResourceCache, Lookup};
pub use persist::{
    load_snapshot, save_snapshot, ClasspathSnapshot, SNAPSHOT_FILE_NAME, SNAPSHOT_SCHEMA_VERSION,
};
