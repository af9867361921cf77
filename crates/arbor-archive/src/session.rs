use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of whoever opened a caching session.
///
/// Every call to [`new`](Self::new) yields a distinct owner, so only the
/// holder of an owner (or a copy of it) can flush its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionOwner(u64);

impl SessionOwner {
    pub fn new() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl Default for SessionOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Archives opened during one logical operation, kept open until its owner
/// flushes them.
///
/// Nested [`enter`](Self::enter) calls by the same owner share the pool; only
/// the matching number of [`leave`](Self::leave) calls ends it.
pub struct ArchiveSession<A> {
    owner: SessionOwner,
    depth: usize,
    archives: HashMap<PathBuf, Arc<A>>,
    deferred_closes: usize,
}

impl<A> ArchiveSession<A> {
    pub fn new(owner: SessionOwner) -> Self {
        Self {
            owner,
            depth: 0,
            archives: HashMap::new(),
            deferred_closes: 0,
        }
    }

    pub fn owner(&self) -> SessionOwner {
        self.owner
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// Returns the new nesting depth.
    pub fn enter(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    /// Returns `true` once the outermost scope has been left.
    pub fn leave(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub fn get(&self, path: &Path) -> Option<Arc<A>> {
        self.archives.get(path).cloned()
    }

    /// Pools `archive` unless one is already pooled for `path`; returns the
    /// pooled instance.
    pub fn insert(&mut self, path: &Path, archive: Arc<A>) -> Arc<A> {
        Arc::clone(
            self.archives
                .entry(path.to_path_buf())
                .or_insert(archive),
        )
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.archives.contains_key(path)
    }

    /// Records a close request for a pooled archive. The archive stays open
    /// until the pool is drained.
    pub fn defer_close(&mut self, path: &Path) -> bool {
        if self.contains(path) {
            self.deferred_closes += 1;
            true
        } else {
            false
        }
    }

    pub fn deferred_closes(&self) -> usize {
        self.deferred_closes
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }

    /// Empties the pool. Archives still referenced elsewhere stay open until
    /// their last user drops them.
    pub fn drain(&mut self) -> Vec<(PathBuf, Arc<A>)> {
        self.deferred_closes = 0;
        self.archives.drain().collect()
    }
}

impl<A> fmt::Debug for ArchiveSession<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveSession")
            .field("owner", &self.owner)
            .field("depth", &self.depth)
            .field("archives", &self.archives.len())
            .finish()
    }
}
