use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{ClasspathError, ResolutionError, Result};

/// Answer to a lookup in a [`LazyResourceCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    Absent,
    /// Someone is resolving this key right now. Use the previous session's
    /// value if a usable answer is needed.
    InProgress,
    Resolved(V),
    /// The initializer failed and this is its memoized failure value.
    Failed(V),
}

impl<V> Lookup<V> {
    pub fn value(&self) -> Option<&V> {
        match self {
            Lookup::Resolved(value) | Lookup::Failed(value) => Some(value),
            Lookup::Absent | Lookup::InProgress => None,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Lookup::Resolved(value) | Lookup::Failed(value) => Some(value),
            Lookup::Absent | Lookup::InProgress => None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Lookup::InProgress)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Lookup::Failed(_))
    }
}

/// External resolver for one kind of lazily computed value.
///
/// `initialize` runs without any cache lock held and may call back into the
/// cache through `cx`; a lookup of a key that is still being initialized
/// answers [`Lookup::InProgress`] immediately.
pub trait Initializer<O, P, V> {
    /// `Ok(None)` means the initializer produced nothing (and did not publish
    /// a value through `cx` either).
    fn initialize(
        &self,
        owner: &O,
        path: &P,
        cx: &InitContext<'_, O, P, V>,
    ) -> Result<Option<V>, ResolutionError>;

    /// Value memoized when initialization fails or produces nothing. `None`
    /// leaves the key absent so the next lookup retries.
    fn failure_value(&self, _owner: &O, _path: &P) -> Option<V> {
        None
    }
}

impl<O, P, V, F> Initializer<O, P, V> for F
where
    F: Fn(&O, &P, &InitContext<'_, O, P, V>) -> Result<Option<V>, ResolutionError>,
{
    fn initialize(
        &self,
        owner: &O,
        path: &P,
        cx: &InitContext<'_, O, P, V>,
    ) -> Result<Option<V>, ResolutionError> {
        self(owner, path, cx)
    }
}

/// What an initializer can do with the cache that is initializing it.
pub struct InitContext<'a, O, P, V> {
    cache: &'a LazyResourceCache<O, P, V>,
}

impl<'a, O, P, V> InitContext<'a, O, P, V>
where
    O: Clone + Eq + Hash + fmt::Debug,
    P: Clone + Eq + Hash + fmt::Debug,
    V: Clone,
{
    /// The cache, for reentrant lookups.
    pub fn cache(&self) -> &'a LazyResourceCache<O, P, V> {
        self.cache
    }

    /// Publishes `value` for a key that is currently in progress, typically a
    /// sibling in the same batch. Returns `false` if the key is not in progress.
    pub fn publish(&self, owner: &O, path: &P, value: V) -> bool {
        self.cache.publish(owner, path, value)
    }

    pub fn previous_session_value(&self, owner: &O, path: &P) -> Option<V> {
        self.cache.previous_session_value(owner, path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LazyCacheStats {
    pub initializations: u64,
    pub failures: u64,
    pub in_progress_hits: u64,
}

#[derive(Debug, Clone)]
enum Slot<V> {
    InProgress,
    Resolved(V),
    Failed(V),
}

impl<V: Clone> Slot<V> {
    fn to_lookup(&self) -> Lookup<V> {
        match self {
            Slot::InProgress => Lookup::InProgress,
            Slot::Resolved(value) => Lookup::Resolved(value.clone()),
            Slot::Failed(value) => Lookup::Failed(value.clone()),
        }
    }
}

struct Inner<O, P, V> {
    slots: HashMap<O, HashMap<P, Slot<V>>>,
    previous: HashMap<O, HashMap<P, V>>,
}

impl<O, P, V> Inner<O, P, V>
where
    O: Clone + Eq + Hash,
    P: Clone + Eq + Hash,
{
    fn slot(&self, owner: &O, path: &P) -> Option<&Slot<V>> {
        self.slots.get(owner)?.get(path)
    }

    fn set(&mut self, owner: &O, path: &P, slot: Slot<V>) {
        self.slots
            .entry(owner.clone())
            .or_default()
            .insert(path.clone(), slot);
    }

    fn take(&mut self, owner: &O, path: &P) -> Option<Slot<V>> {
        let per_owner = self.slots.get_mut(owner)?;
        let slot = per_owner.remove(path);
        if per_owner.is_empty() {
            self.slots.remove(owner);
        }
        slot
    }

    fn previous(&self, owner: &O, path: &P) -> Option<&V> {
        self.previous.get(owner)?.get(path)
    }

    fn set_previous(&mut self, owner: &O, path: &P, value: V) {
        self.previous
            .entry(owner.clone())
            .or_default()
            .insert(path.clone(), value);
    }

    fn clear_previous(&mut self, owner: &O, path: &P) {
        if let Some(per_owner) = self.previous.get_mut(owner) {
            per_owner.remove(path);
            if per_owner.is_empty() {
                self.previous.remove(owner);
            }
        }
    }
}

/// Per-`(owner, path)` memo of an expensive external resolution.
///
/// Each key moves `Absent -> InProgress -> Resolved | Failed`, or back to
/// `Absent` when the initializer fails without a failure value or panics. The
/// lock only guards these transitions; initializers always run unlocked.
///
/// Values from the previous session (a loaded snapshot, or values displaced by
/// [`invalidate`](Self::invalidate)) are kept separately and served to callers
/// that hit an in-progress key.
pub struct LazyResourceCache<O, P, V> {
    inner: Mutex<Inner<O, P, V>>,
    initializations: AtomicU64,
    failures: AtomicU64,
    in_progress_hits: AtomicU64,
}

impl<O, P, V> Default for LazyResourceCache<O, P, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                previous: HashMap::new(),
            }),
            initializations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            in_progress_hits: AtomicU64::new(0),
        }
    }
}

impl<O, P, V> LazyResourceCache<O, P, V>
where
    O: Clone + Eq + Hash + fmt::Debug,
    P: Clone + Eq + Hash + fmt::Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of the key. Never initializes and never blocks on an
    /// in-progress initialization.
    pub fn get(&self, owner: &O, path: &P) -> Lookup<V> {
        let lookup = self.current(owner, path);
        if lookup.is_in_progress() {
            self.in_progress_hits.fetch_add(1, Ordering::Relaxed);
        }
        lookup
    }

    /// Returns the memoized value, running `initializer` once if the key is
    /// absent.
    ///
    /// An in-progress key, including one this thread is initializing further
    /// up the stack, answers [`Lookup::InProgress`] without calling the
    /// initializer.
    pub fn get_or_initialize<I>(&self, owner: &O, path: &P, initializer: &I) -> Result<Lookup<V>>
    where
        I: Initializer<O, P, V> + ?Sized,
    {
        {
            let mut inner = self.inner.lock();
            if let Some(slot) = inner.slot(owner, path) {
                let lookup = slot.to_lookup();
                if lookup.is_in_progress() {
                    self.in_progress_hits.fetch_add(1, Ordering::Relaxed);
                }
                return Ok(lookup);
            }
            inner.set(owner, path, Slot::InProgress);
        }

        let _unwind = UnwindGuard {
            cache: self,
            owner,
            paths: vec![path.clone()],
        };
        let outcome = self.run_initializer(owner, path, initializer);
        self.finish(owner, path, initializer, outcome)
    }

    /// Like [`get_or_initialize`](Self::get_or_initialize), falling back to the
    /// previous session's value while the key is in progress.
    pub fn resolve<I>(&self, owner: &O, path: &P, initializer: &I) -> Result<Option<V>>
    where
        I: Initializer<O, P, V> + ?Sized,
    {
        Ok(match self.get_or_initialize(owner, path, initializer)? {
            Lookup::InProgress => self.previous_session_value(owner, path),
            lookup => lookup.into_value(),
        })
    }

    /// Initializes several keys of one owner together.
    ///
    /// Every absent key is marked in progress before the first initializer
    /// call, so an initializer asking for a sibling sees [`Lookup::InProgress`]
    /// rather than starting a nested resolution. A sibling published through
    /// [`InitContext::publish`] is not initialized again.
    pub fn initialize_batch<I>(
        &self,
        owner: &O,
        paths: &[P],
        initializer: &I,
    ) -> Vec<(P, Result<Lookup<V>>)>
    where
        I: Initializer<O, P, V> + ?Sized,
    {
        let marked: HashSet<P> = {
            let mut inner = self.inner.lock();
            let mut marked = HashSet::new();
            for path in paths {
                if inner.slot(owner, path).is_none() {
                    inner.set(owner, path, Slot::InProgress);
                    marked.insert(path.clone());
                }
            }
            marked
        };
        let _unwind = UnwindGuard {
            cache: self,
            owner,
            paths: marked.iter().cloned().collect(),
        };

        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            if !marked.contains(path) {
                results.push((path.clone(), Ok(self.get(owner, path))));
                continue;
            }
            if let Lookup::Resolved(value) = self.current(owner, path) {
                results.push((path.clone(), Ok(Lookup::Resolved(value))));
                continue;
            }
            let outcome = self.run_initializer(owner, path, initializer);
            results.push((path.clone(), self.finish(owner, path, initializer, outcome)));
        }
        results
    }

    /// Sets the value explicitly. `None` removes the key. Either way the
    /// previous session's value for the key is dropped.
    pub fn put(&self, owner: &O, path: &P, value: Option<V>) {
        let mut inner = self.inner.lock();
        match value {
            Some(value) => inner.set(owner, path, Slot::Resolved(value)),
            None => {
                inner.take(owner, path);
            }
        }
        inner.clear_previous(owner, path);
    }

    /// Drops the key. A resolved value moves into the previous session so
    /// reentrant readers during the next resolution still get an answer.
    /// Nothing is recomputed here.
    pub fn invalidate(&self, owner: &O, path: &P) -> bool {
        let mut inner = self.inner.lock();
        match inner.take(owner, path) {
            Some(Slot::Resolved(value)) => {
                inner.set_previous(owner, path, value);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Forgets every key and previous-session value of `owner`.
    pub fn remove_owner(&self, owner: &O) -> usize {
        let mut inner = self.inner.lock();
        inner.previous.remove(owner);
        inner
            .slots
            .remove(owner)
            .map_or(0, |per_owner| per_owner.len())
    }

    /// Moves every resolved value into the previous session and drops all
    /// keys, as at a session restart.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let slots = std::mem::take(&mut inner.slots);
        for (owner, per_owner) in slots {
            for (path, slot) in per_owner {
                if let Slot::Resolved(value) = slot {
                    inner.set_previous(&owner, &path, value);
                }
            }
        }
    }

    pub fn previous_session_value(&self, owner: &O, path: &P) -> Option<V> {
        self.inner.lock().previous(owner, path).cloned()
    }

    /// The memoized value if there is one, otherwise the previous session's.
    pub fn get_default_to_previous_session(&self, owner: &O, path: &P) -> Option<V> {
        let inner = self.inner.lock();
        match inner.slot(owner, path) {
            Some(Slot::Resolved(value)) | Some(Slot::Failed(value)) => Some(value.clone()),
            Some(Slot::InProgress) | None => inner.previous(owner, path).cloned(),
        }
    }

    /// Seeds previous-session values, e.g. from a loaded snapshot. Keys that
    /// are already resolved keep their current value.
    pub fn restore_previous_session(&self, entries: impl IntoIterator<Item = (O, P, V)>) {
        let mut inner = self.inner.lock();
        for (owner, path, value) in entries {
            if !matches!(inner.slot(&owner, &path), Some(Slot::Resolved(_))) {
                inner.set_previous(&owner, &path, value);
            }
        }
    }

    /// Everything worth persisting: resolved values, plus previous-session
    /// values for keys that have not been resolved in this session. Failure
    /// values and in-progress keys are skipped.
    pub fn snapshot(&self) -> Vec<(O, P, V)> {
        let inner = self.inner.lock();
        let mut entries = Vec::new();
        for (owner, per_owner) in &inner.slots {
            for (path, slot) in per_owner {
                if let Slot::Resolved(value) = slot {
                    entries.push((owner.clone(), path.clone(), value.clone()));
                }
            }
        }
        for (owner, per_owner) in &inner.previous {
            for (path, value) in per_owner {
                if !matches!(inner.slot(owner, path), Some(Slot::Resolved(_))) {
                    entries.push((owner.clone(), path.clone(), value.clone()));
                }
            }
        }
        entries
    }

    /// Number of keys in any state.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LazyCacheStats {
        LazyCacheStats {
            initializations: self.initializations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            in_progress_hits: self.in_progress_hits.load(Ordering::Relaxed),
        }
    }

    fn current(&self, owner: &O, path: &P) -> Lookup<V> {
        self.inner
            .lock()
            .slot(owner, path)
            .map_or(Lookup::Absent, Slot::to_lookup)
    }

    fn publish(&self, owner: &O, path: &P, value: V) -> bool {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot(owner, path), Some(Slot::InProgress)) {
            return false;
        }
        inner.set(owner, path, Slot::Resolved(value));
        inner.clear_previous(owner, path);
        true
    }

    fn run_initializer<I>(
        &self,
        owner: &O,
        path: &P,
        initializer: &I,
    ) -> Result<Option<V>, ResolutionError>
    where
        I: Initializer<O, P, V> + ?Sized,
    {
        self.initializations.fetch_add(1, Ordering::Relaxed);
        initializer.initialize(owner, path, &InitContext { cache: self })
    }

    fn finish<I>(
        &self,
        owner: &O,
        path: &P,
        initializer: &I,
        outcome: Result<Option<V>, ResolutionError>,
    ) -> Result<Lookup<V>>
    where
        I: Initializer<O, P, V> + ?Sized,
    {
        match outcome {
            Ok(Some(value)) => {
                let mut inner = self.inner.lock();
                if inner.slot(owner, path).is_some() {
                    inner.set(owner, path, Slot::Resolved(value.clone()));
                    inner.clear_previous(owner, path);
                } else {
                    tracing::debug!(
                        target = "arbor.classpath",
                        owner = ?owner,
                        path = ?path,
                        "key invalidated during initialization; result not memoized"
                    );
                }
                Ok(Lookup::Resolved(value))
            }
            Ok(None) => {
                // Published through the context, or invalidated meanwhile.
                let current = self.current(owner, path);
                if !current.is_in_progress() {
                    return Ok(current);
                }
                Ok(self.record_failure(owner, path, initializer))
            }
            Err(source) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target = "arbor.classpath",
                    owner = ?owner,
                    path = ?path,
                    error = %source,
                    "initializer failed"
                );
                let _ = self.record_failure(owner, path, initializer);
                Err(ClasspathError::Resolution {
                    key: format!("{owner:?}/{path:?}"),
                    source,
                })
            }
        }
    }

    fn record_failure<I>(&self, owner: &O, path: &P, initializer: &I) -> Lookup<V>
    where
        I: Initializer<O, P, V> + ?Sized,
    {
        let fallback = initializer.failure_value(owner, path);
        let mut inner = self.inner.lock();
        if !matches!(inner.slot(owner, path), Some(Slot::InProgress)) {
            return inner
                .slot(owner, path)
                .map_or(Lookup::Absent, Slot::to_lookup);
        }
        match fallback {
            Some(value) => {
                inner.set(owner, path, Slot::Failed(value.clone()));
                Lookup::Failed(value)
            }
            None => {
                inner.take(owner, path);
                Lookup::Absent
            }
        }
    }
}

/// Resets keys left in progress when an initializer panics, so later lookups
/// retry instead of seeing [`Lookup::InProgress`] forever.
struct UnwindGuard<'a, O, P, V>
where
    O: Clone + Eq + Hash + fmt::Debug,
    P: Clone + Eq + Hash + fmt::Debug,
{
    cache: &'a LazyResourceCache<O, P, V>,
    owner: &'a O,
    paths: Vec<P>,
}

impl<O, P, V> Drop for UnwindGuard<'_, O, P, V>
where
    O: Clone + Eq + Hash + fmt::Debug,
    P: Clone + Eq + Hash + fmt::Debug,
{
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut inner = self.cache.inner.lock();
        for path in &self.paths {
            if matches!(inner.slot(self.owner, path), Some(Slot::InProgress)) {
                inner.take(self.owner, path);
                self.cache.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target = "arbor.classpath",
                    owner = ?self.owner,
                    path = ?path,
                    "initializer panicked; key reset"
                );
            }
        }
    }
}

impl<O, P, V> fmt::Debug for LazyResourceCache<O, P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LazyResourceCache")
            .field("owners", &inner.slots.len())
            .field("previous_owners", &inner.previous.len())
            .finish()
    }
}
