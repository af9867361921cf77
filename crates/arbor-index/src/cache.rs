use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use arbor_core::CancellationToken;
use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};

use crate::error::{IndexError, Result};
use crate::snapshot::IndexSnapshot;

/// Identifies one scan. Copies may be handed to several workers that record
/// into the same scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanHandle {
    id: u64,
}

impl ScanHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Contributions of one unit during a scan. `None` means the unit is gone and
/// its entries are only purged.
type UnitDelta<K, V> = Option<HashMap<K, V>>;

struct InFlight<U, K, V> {
    id: u64,
    units: HashMap<U, UnitDelta<K, V>>,
}

struct ScanState<U, K, V> {
    next_id: u64,
    active: Option<InFlight<U, K, V>>,
}

/// A stable snapshot plus the in-flight results of at most one background scan.
///
/// Readers only see the stable generation. [`end_scan`](Self::end_scan)
/// builds the next generation from the current one and the scan's per-unit
/// deltas, then publishes it in a single swap: a reader sees all of a unit's
/// new entries or none of them, and a reader holding an older snapshot keeps
/// seeing exactly that snapshot.
pub struct IndexCache<U, K, V> {
    stable: ArcSwap<IndexSnapshot<U, K, V>>,
    scan: Mutex<ScanState<U, K, V>>,
    scan_done: Condvar,
    poll_interval: Duration,
}

impl<U, K, V> IndexCache<U, K, V>
where
    U: Clone + Eq + Hash + fmt::Debug,
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new() -> Self {
        Self::with_poll_interval(Self::DEFAULT_POLL_INTERVAL)
    }

    /// `poll_interval` bounds how long a waiting reader takes to notice
    /// cancellation.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            stable: ArcSwap::from_pointee(IndexSnapshot::default()),
            scan: Mutex::new(ScanState {
                next_id: 1,
                active: None,
            }),
            scan_done: Condvar::new(),
            poll_interval,
        }
    }

    /// The current stable generation.
    pub fn snapshot(&self) -> Arc<IndexSnapshot<U, K, V>> {
        self.stable.load_full()
    }

    pub fn read(&self, key: &K) -> Option<V> {
        self.stable.load().get(key).cloned()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.lock().active.is_some()
    }

    pub fn begin_scan(&self) -> Result<ScanHandle> {
        let mut state = self.scan.lock();
        if let Some(active) = &state.active {
            return Err(IndexError::ScanInProgress { active: active.id });
        }
        let id = state.next_id;
        state.next_id += 1;
        state.active = Some(InFlight {
            id,
            units: HashMap::new(),
        });
        tracing::debug!(target = "arbor.index", scan = id, "scan started");
        Ok(ScanHandle { id })
    }

    pub fn record(&self, scan: &ScanHandle, unit: U, key: K, value: V) -> Result<()> {
        self.with_inflight(scan, |inflight| {
            inflight
                .units
                .entry(unit)
                .or_insert_with(|| Some(HashMap::new()))
                .get_or_insert_with(HashMap::new)
                .insert(key, value);
        })
    }

    /// Forgets what this scan recorded for `unit` so far. The unit's stable
    /// entries are still replaced at [`end_scan`](Self::end_scan).
    pub fn restart_unit(&self, scan: &ScanHandle, unit: U) -> Result<()> {
        self.with_inflight(scan, |inflight| {
            inflight.units.insert(unit, Some(HashMap::new()));
        })
    }

    /// Records that `unit` no longer exists: its stable entries are purged and
    /// nothing replaces them.
    pub fn remove_unit(&self, scan: &ScanHandle, unit: U) -> Result<()> {
        self.with_inflight(scan, |inflight| {
            inflight.units.insert(unit, None);
        })
    }

    /// Folds the scan into a new stable generation and publishes it.
    pub fn end_scan(&self, scan: ScanHandle) -> Result<Arc<IndexSnapshot<U, K, V>>> {
        let published = {
            let mut state = self.scan.lock();
            let inflight = match state.active.take() {
                Some(inflight) if inflight.id == scan.id => inflight,
                other => {
                    state.active = other;
                    return Err(IndexError::StaleScan { scan: scan.id });
                }
            };

            let mut next = IndexSnapshot::clone(&self.stable.load());
            let mut purged = 0;
            let mut inserted = 0;
            for (unit, delta) in inflight.units {
                purged += next.purge_unit(&unit);
                for (key, value) in delta.into_iter().flatten() {
                    next.insert(unit.clone(), key, value);
                    inserted += 1;
                }
            }
            next.bump_generation();

            let published = Arc::new(next);
            self.stable.store(Arc::clone(&published));
            tracing::debug!(
                target = "arbor.index",
                scan = scan.id,
                generation = published.generation(),
                purged,
                inserted,
                "scan merged"
            );
            published
        };
        self.scan_done.notify_all();
        Ok(published)
    }

    /// Drops the scan's in-flight results. The stable generation is untouched.
    pub fn abort_scan(&self, scan: ScanHandle) -> Result<()> {
        {
            let mut state = self.scan.lock();
            match &state.active {
                Some(inflight) if inflight.id == scan.id => state.active = None,
                _ => return Err(IndexError::StaleScan { scan: scan.id }),
            }
        }
        tracing::debug!(target = "arbor.index", scan = scan.id, "scan aborted");
        self.scan_done.notify_all();
        Ok(())
    }

    /// Waits until no scan is in flight, then returns the stable snapshot.
    ///
    /// A cancelled wait returns the current stable snapshot instead; stale
    /// data is always an acceptable answer.
    pub fn wait_for_scan(&self, cancel: &CancellationToken) -> Arc<IndexSnapshot<U, K, V>> {
        let mut state = self.scan.lock();
        while state.active.is_some() {
            if cancel.is_cancelled() {
                tracing::debug!(
                    target = "arbor.index",
                    "wait for scan cancelled; answering from the stable snapshot"
                );
                break;
            }
            self.scan_done.wait_for(&mut state, self.poll_interval);
        }
        drop(state);
        self.snapshot()
    }

    /// [`read`](Self::read) after waiting for an in-flight scan.
    pub fn read_fresh(&self, key: &K, cancel: &CancellationToken) -> Option<V> {
        self.wait_for_scan(cancel).get(key).cloned()
    }

    /// Runs a whole scan: each unit's entries come from `scan_unit`, an empty
    /// result purges the unit. Cancellation is checked before every unit and
    /// aborts the scan, leaving the stable generation as it was.
    pub fn run_scan<I, F>(
        &self,
        units: I,
        cancel: &CancellationToken,
        mut scan_unit: F,
    ) -> Result<Arc<IndexSnapshot<U, K, V>>>
    where
        I: IntoIterator<Item = U>,
        F: FnMut(&U) -> Vec<(K, V)>,
    {
        let mut recorder = self.recorder(self.begin_scan()?);
        for unit in units {
            if let Err(err) = cancel.check() {
                recorder.abort()?;
                return Err(err.into());
            }
            let entries = scan_unit(&unit);
            if entries.is_empty() {
                recorder.remove_unit(unit)?;
                continue;
            }
            recorder.restart_unit(unit.clone())?;
            for (key, value) in entries {
                recorder.record(unit.clone(), key, value)?;
            }
        }
        recorder.finish()
    }

    /// Wraps `scan` in a guard that aborts it unless it is finished.
    pub fn recorder(&self, scan: ScanHandle) -> ScanRecorder<'_, U, K, V> {
        ScanRecorder {
            cache: self,
            scan,
            done: false,
        }
    }

    fn with_inflight(
        &self,
        scan: &ScanHandle,
        f: impl FnOnce(&mut InFlight<U, K, V>),
    ) -> Result<()> {
        let mut state = self.scan.lock();
        match state.active.as_mut() {
            Some(inflight) if inflight.id == scan.id => {
                f(inflight);
                Ok(())
            }
            _ => Err(IndexError::StaleScan { scan: scan.id }),
        }
    }
}

impl<U, K, V> Default for IndexCache<U, K, V>
where
    U: Clone + Eq + Hash + fmt::Debug,
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<U, K, V> fmt::Debug for IndexCache<U, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexCache")
            .field("stable", &self.stable.load())
            .field("scanning", &self.scan.lock().active.is_some())
            .finish()
    }
}

/// Records into one scan. Dropping an unfinished recorder aborts the scan.
pub struct ScanRecorder<'a, U, K, V>
where
    U: Clone + Eq + Hash + fmt::Debug,
    K: Clone + Eq + Hash,
    V: Clone,
{
    cache: &'a IndexCache<U, K, V>,
    scan: ScanHandle,
    done: bool,
}

impl<'a, U, K, V> ScanRecorder<'a, U, K, V>
where
    U: Clone + Eq + Hash + fmt::Debug,
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn handle(&self) -> ScanHandle {
        self.scan
    }

    pub fn record(&mut self, unit: U, key: K, value: V) -> Result<()> {
        self.cache.record(&self.scan, unit, key, value)
    }

    pub fn restart_unit(&mut self, unit: U) -> Result<()> {
        self.cache.restart_unit(&self.scan, unit)
    }

    pub fn remove_unit(&mut self, unit: U) -> Result<()> {
        self.cache.remove_unit(&self.scan, unit)
    }

    pub fn finish(mut self) -> Result<Arc<IndexSnapshot<U, K, V>>> {
        self.done = true;
        self.cache.end_scan(self.scan)
    }

    pub fn abort(mut self) -> Result<()> {
        self.done = true;
        self.cache.abort_scan(self.scan)
    }
}

impl<U, K, V> Drop for ScanRecorder<'_, U, K, V>
where
    U: Clone + Eq + Hash + fmt::Debug,
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.done {
            let _ = self.cache.abort_scan(self.scan);
        }
    }
}
