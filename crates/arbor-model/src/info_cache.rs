use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arbor_core::sync::lock_or_recover;
use arbor_core::{ElementKind, Handle};
use lru::LruCache;

use crate::info::ElementInfo;

/// LRU tier an element's info is accounted against.
///
/// Tiers keep a handful of large content-bearing entries from starving the
/// structural entries and vice versa. Every handle maps to exactly one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// Model, projects, roots and packages.
    Container,
    /// Compilation units and class files.
    Source,
    /// Types, members and everything else discovered inside a source.
    Member,
}

impl CacheTier {
    pub const ALL: [CacheTier; 3] = [CacheTier::Container, CacheTier::Source, CacheTier::Member];

    pub fn of(handle: &Handle) -> CacheTier {
        Self::of_kind(handle.kind())
    }

    pub const fn of_kind(kind: ElementKind) -> CacheTier {
        if kind.has_buffer() {
            CacheTier::Source
        } else if kind.is_openable() {
            CacheTier::Container
        } else {
            CacheTier::Member
        }
    }

    const fn index(self) -> usize {
        match self {
            CacheTier::Container => 0,
            CacheTier::Source => 1,
            CacheTier::Member => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoCacheConfig {
    pub container_slots: usize,
    pub source_slots: usize,
    pub member_slots: usize,
}

impl InfoCacheConfig {
    pub const DEFAULT_CONTAINER_SLOTS: usize = 500;
    pub const DEFAULT_SOURCE_SLOTS: usize = 60;
    pub const DEFAULT_MEMBER_SLOTS: usize = 1_200;

    /// Slots available to `tier`. A tier always has room for at least one entry.
    pub fn capacity(&self, tier: CacheTier) -> usize {
        let slots = match tier {
            CacheTier::Container => self.container_slots,
            CacheTier::Source => self.source_slots,
            CacheTier::Member => self.member_slots,
        };
        slots.max(1)
    }

    pub fn total_capacity(&self) -> usize {
        CacheTier::ALL.iter().map(|tier| self.capacity(*tier)).sum()
    }
}

impl Default for InfoCacheConfig {
    fn default() -> Self {
        Self {
            container_slots: Self::DEFAULT_CONTAINER_SLOTS,
            source_slots: Self::DEFAULT_SOURCE_SLOTS,
            member_slots: Self::DEFAULT_MEMBER_SLOTS,
        }
    }
}

/// An entry unlinked from the cache that still needs its close callbacks run.
#[derive(Debug, Clone)]
pub struct Evicted {
    pub handle: Handle,
    pub info: Arc<ElementInfo>,
}

/// Entries removed from an [`InfoCache`] by the operation that returned this batch.
///
/// Each removed entry appears in exactly one batch. Pass it to
/// [`ModelManager::close_pass`](crate::ModelManager::close_pass) once no cache
/// lock is held.
#[derive(Debug, Default)]
#[must_use = "evicted entries must be passed through a close pass"]
pub struct PendingClose {
    entries: Vec<Evicted>,
}

impl PendingClose {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Evicted> {
        self.entries.iter()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.entries.iter().map(|entry| entry.handle.clone()).collect()
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.entries.iter().any(|entry| &entry.handle == handle)
    }

    pub fn merge(&mut self, other: PendingClose) {
        self.entries.extend(other.entries);
    }
}

impl IntoIterator for PendingClose {
    type Item = Evicted;
    type IntoIter = std::vec::IntoIter<Evicted>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InfoCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub containers: usize,
    pub sources: usize,
    pub members: usize,
}

pub(crate) struct CommitOutcome {
    pub(crate) requested: Option<Arc<ElementInfo>>,
    pub(crate) pending: PendingClose,
    pub(crate) inserted: usize,
    pub(crate) discarded: usize,
}

/// Bounded, tiered LRU map from handle to computed info.
///
/// `get` and `put` move entries to the most-recently-used position; `peek` and
/// `contains` leave the order alone. After any mutating call returns, every
/// tier is within its capacity.
pub struct InfoCache {
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct Inner {
    config: InfoCacheConfig,
    tiers: [LruCache<Handle, Arc<ElementInfo>>; 3],
}

impl InfoCache {
    pub fn new(config: InfoCacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                tiers: [
                    LruCache::unbounded(),
                    LruCache::unbounded(),
                    LruCache::unbounded(),
                ],
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[track_caller]
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        lock_or_recover(&self.inner, "arbor.model")
    }

    pub fn config(&self) -> InfoCacheConfig {
        self.lock_inner().config
    }

    /// Cached info for `handle`, promoting it to most-recently-used. Never computes.
    pub fn get(&self, handle: &Handle) -> Option<Arc<ElementInfo>> {
        let found = {
            let mut inner = self.lock_inner();
            inner.tier_mut(CacheTier::of(handle)).get(handle).cloned()
        };
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Cached info for `handle` without touching LRU order or statistics.
    pub fn peek(&self, handle: &Handle) -> Option<Arc<ElementInfo>> {
        let inner = self.lock_inner();
        inner.tier(CacheTier::of(handle)).peek(handle).cloned()
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        let inner = self.lock_inner();
        inner.tier(CacheTier::of(handle)).contains(handle)
    }

    /// Inserts or refreshes `handle`. Entries pushed out of the tier, along with
    /// their cached descendants, are returned for closing.
    ///
    /// Refreshing an entry also closes the cached subtrees of children the new
    /// info no longer lists.
    pub fn put(&self, handle: Handle, info: impl Into<Arc<ElementInfo>>) -> PendingClose {
        let info = info.into();
        let mut pending = Vec::new();
        {
            let mut inner = self.lock_inner();
            let tier = CacheTier::of(&handle);
            if let Some(previous) = inner.tier_mut(tier).put(handle, Arc::clone(&info)) {
                for child in previous.children() {
                    if !info.children().contains(child) {
                        inner.remove_cascade(child, &mut pending);
                    }
                }
            }
            inner.enforce_capacity(tier, &mut pending);
        }
        self.finish(pending)
    }

    /// Removes `handle` and every cached descendant reachable through the
    /// removed infos' children. Uncached children are not materialized.
    pub fn remove(&self, handle: &Handle) -> PendingClose {
        let mut pending = Vec::new();
        self.lock_inner().remove_cascade(handle, &mut pending);
        PendingClose { entries: pending }
    }

    /// Applies `update` to the cached info for `handle` under the cache lock.
    ///
    /// Readers that already hold the previous `Arc` keep seeing the old value.
    pub fn update(&self, handle: &Handle, update: impl FnOnce(&mut ElementInfo)) -> bool {
        let mut inner = self.lock_inner();
        match inner.tier_mut(CacheTier::of(handle)).peek_mut(handle) {
            Some(info) => {
                update(Arc::make_mut(info));
                true
            }
            None => false,
        }
    }

    /// Unlinks everything, e.g. on shutdown.
    pub fn clear(&self) -> PendingClose {
        let mut entries = Vec::new();
        let mut inner = self.lock_inner();
        for tier in inner.tiers.iter_mut() {
            while let Some((handle, info)) = tier.pop_lru() {
                entries.push(Evicted { handle, info });
            }
        }
        PendingClose { entries }
    }

    pub fn len(&self) -> usize {
        self.lock_inner().tiers.iter().map(LruCache::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_of(&self, tier: CacheTier) -> usize {
        self.lock_inner().tier(tier).len()
    }

    /// Share of `tier`'s slots currently in use, in `[0, 1]`.
    pub fn fill_ratio(&self, tier: CacheTier) -> f64 {
        let inner = self.lock_inner();
        inner.tier(tier).len() as f64 / inner.config.capacity(tier) as f64
    }

    /// Handles in `tier` from least to most recently used.
    pub fn lru_order(&self, tier: CacheTier) -> Vec<Handle> {
        let inner = self.lock_inner();
        inner
            .tier(tier)
            .iter()
            .rev()
            .map(|(handle, _)| handle.clone())
            .collect()
    }

    pub fn stats(&self) -> InfoCacheStats {
        let inner = self.lock_inner();
        InfoCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            containers: inner.tier(CacheTier::Container).len(),
            sources: inner.tier(CacheTier::Source).len(),
            members: inner.tier(CacheTier::Member).len(),
        }
    }

    /// Publishes a staged batch in a single critical section.
    ///
    /// Staged entries never overwrite a value another thread already
    /// committed, except for `forced`: its cached subtree is removed first and
    /// the staged value replaces it. A staged child whose staged parent lost
    /// to a cached value only goes in if the cached parent lists it. Archive
    /// containers go in first, then everything else from the shallowest
    /// handle down.
    pub(crate) fn commit(
        &self,
        mut entries: Vec<(Handle, ElementInfo)>,
        forced: Option<&Handle>,
        requested: &Handle,
    ) -> CommitOutcome {
        entries.sort_by_key(|(handle, _)| (!handle.kind().is_archive_container(), handle.depth()));

        let mut pending = Vec::new();
        let mut requested_info = None;
        let mut inserted = 0;
        let mut discarded = 0;
        {
            let mut inner = self.lock_inner();
            if let Some(forced) = forced {
                inner.remove_cascade(forced, &mut pending);
            }
            let admitted = inner.admissible(&entries);

            for (handle, info) in entries {
                let tier = CacheTier::of(&handle);
                if !admitted.contains(&handle) {
                    discarded += 1;
                    if &handle == requested {
                        requested_info = inner.tier_mut(tier).get(&handle).cloned();
                    }
                    continue;
                }

                let info = Arc::new(info);
                if &handle == requested {
                    requested_info = Some(Arc::clone(&info));
                }
                inner.tier_mut(tier).put(handle, info);
                inner.enforce_capacity(tier, &mut pending);
                inserted += 1;
            }

            if requested_info.is_none() {
                requested_info = inner
                    .tier_mut(CacheTier::of(requested))
                    .get(requested)
                    .cloned();
            }
        }

        CommitOutcome {
            requested: requested_info,
            pending: self.finish(pending),
            inserted,
            discarded,
        }
    }

    fn finish(&self, pending: Vec<Evicted>) -> PendingClose {
        if !pending.is_empty() {
            self.evictions
                .fetch_add(pending.len() as u64, Ordering::Relaxed);
        }
        PendingClose { entries: pending }
    }
}

impl std::fmt::Debug for InfoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfoCache")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn tier(&self, tier: CacheTier) -> &LruCache<Handle, Arc<ElementInfo>> {
        &self.tiers[tier.index()]
    }

    fn tier_mut(&mut self, tier: CacheTier) -> &mut LruCache<Handle, Arc<ElementInfo>> {
        &mut self.tiers[tier.index()]
    }

    fn pop(&mut self, handle: &Handle) -> Option<Arc<ElementInfo>> {
        self.tier_mut(CacheTier::of(handle)).pop(handle)
    }

    /// Staged handles that may be inserted: not cached yet, and reachable
    /// from a parent that is outside the batch, admitted itself, or a cached
    /// info listing them as a child.
    fn admissible(&self, entries: &[(Handle, ElementInfo)]) -> HashSet<Handle> {
        let staged: HashSet<&Handle> = entries.iter().map(|(handle, _)| handle).collect();
        let mut by_depth: Vec<&Handle> = staged.iter().copied().collect();
        by_depth.sort_by_key(|handle| handle.depth());

        let mut admitted = HashSet::new();
        for handle in by_depth {
            if self.tier(CacheTier::of(handle)).contains(handle) {
                continue;
            }
            let reachable = match handle.parent() {
                Some(parent) if staged.contains(parent) => {
                    admitted.contains(parent)
                        || self
                            .tier(CacheTier::of(parent))
                            .peek(parent)
                            .is_some_and(|info| info.children().contains(handle))
                }
                _ => true,
            };
            if reachable {
                admitted.insert(handle.clone());
            }
        }
        admitted
    }

    fn enforce_capacity(&mut self, tier: CacheTier, out: &mut Vec<Evicted>) {
        let capacity = self.config.capacity(tier);
        while self.tier(tier).len() > capacity {
            let Some((handle, info)) = self.tier_mut(tier).pop_lru() else {
                break;
            };
            self.close_subtree(handle, info, out);
        }
    }

    fn remove_cascade(&mut self, handle: &Handle, out: &mut Vec<Evicted>) {
        if let Some(info) = self.pop(handle) {
            self.close_subtree(handle.clone(), info, out);
        }
    }

    fn close_subtree(&mut self, handle: Handle, info: Arc<ElementInfo>, out: &mut Vec<Evicted>) {
        let mut stack = vec![(handle, info)];
        while let Some((handle, info)) = stack.pop() {
            for child in info.children() {
                if let Some(child_info) = self.pop(child) {
                    stack.push((child.clone(), child_info));
                }
            }
            out.push(Evicted { handle, info });
        }
    }
}
