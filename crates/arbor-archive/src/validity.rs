use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arbor_core::sync::lock_or_recover;
use arbor_core::{Clock, SystemClock};

/// Last known outcome of opening an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveValidity {
    Valid,
    Invalid { reason: String },
}

impl ArchiveValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, ArchiveValidity::Valid)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    validity: ArchiveValidity,
    expires_at: Instant,
}

/// Remembers whether archives could be opened, for a fixed time-to-live.
///
/// Valid and invalid outcomes expire alike. Once an entry has expired the next
/// [`is_valid`](Self::is_valid) checks again; callers racing with that check
/// may still see the expired answer or check themselves. No lock is held while
/// checking.
#[derive(Debug)]
pub struct ValidityCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<PathBuf, Entry>>,
    checks: AtomicU64,
}

impl ValidityCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached outcome for `path`, if it has not expired yet.
    pub fn validity(&self, path: &Path) -> Option<ArchiveValidity> {
        let now = self.clock.now();
        let entries = lock_or_recover(&self.entries, "arbor.archive");
        entries
            .get(path)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.validity.clone())
    }

    /// Cached answer while fresh; otherwise runs `check` once and caches its
    /// outcome with a new TTL.
    pub fn is_valid<E, F>(&self, path: &Path, check: F) -> bool
    where
        E: std::fmt::Display,
        F: FnOnce(&Path) -> Result<(), E>,
    {
        if let Some(validity) = self.validity(path) {
            return validity.is_valid();
        }

        self.checks.fetch_add(1, Ordering::Relaxed);
        match check(path) {
            Ok(()) => {
                self.mark_valid(path);
                true
            }
            Err(err) => {
                self.mark_invalid(path, err.to_string());
                false
            }
        }
    }

    pub fn mark_valid(&self, path: &Path) {
        self.insert(path, ArchiveValidity::Valid);
    }

    pub fn mark_invalid(&self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(
            target = "arbor.archive",
            path = %path.display(),
            reason = %reason,
            ttl_ms = self.ttl.as_millis() as u64,
            "caching invalid archive"
        );
        self.insert(path, ArchiveValidity::Invalid { reason });
    }

    /// Forgets a cached invalid outcome, e.g. after the file changed. Valid
    /// entries are kept. Returns whether an entry was removed.
    pub fn remove_invalid(&self, path: &Path) -> bool {
        let mut entries = lock_or_recover(&self.entries, "arbor.archive");
        match entries.get(path) {
            Some(entry) if !entry.validity.is_valid() => {
                entries.remove(path);
                true
            }
            _ => false,
        }
    }

    /// Drops expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = lock_or_recover(&self.entries, "arbor.archive");
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    pub fn clear(&self) {
        lock_or_recover(&self.entries, "arbor.archive").clear();
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        lock_or_recover(&self.entries, "arbor.archive").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of real checks run by [`is_valid`](Self::is_valid).
    pub fn check_count(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    fn insert(&self, path: &Path, validity: ArchiveValidity) {
        let expires_at = self.clock.now() + self.ttl;
        lock_or_recover(&self.entries, "arbor.archive").insert(
            path.to_path_buf(),
            Entry {
                validity,
                expires_at,
            },
        );
    }
}

impl Default for ValidityCache {
    fn default() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL)
    }
}
