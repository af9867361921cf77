//! Lock helpers shared by the cache crates.

use std::sync::{Mutex, MutexGuard};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Cache state stays structurally valid across a panic in caller code (every
/// mutation is a single map operation), so a poisoned lock is logged and reused
/// instead of taking the whole process down.
#[track_caller]
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, target: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => {
            let loc = std::panic::Location::caller();
            tracing::error!(
                target = target,
                file = loc.file(),
                line = loc.line(),
                column = loc.column(),
                error = %err,
                "mutex poisoned; continuing with recovered guard"
            );
            err.into_inner()
        }
    }
}
