use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arbor_core::sync::lock_or_recover;
use arbor_core::{CancellationToken, Handle};

use crate::buffer_cache::BufferCache;
use crate::error::{CloseError, ModelError, Result};
use crate::info::ElementInfo;
use crate::info_cache::{Evicted, InfoCache, InfoCacheConfig, PendingClose};
use crate::staging::{OpenContext, Staging, StructureBuilder};

/// Callback run for every info removed from the cache, outside any cache lock.
///
/// A listener may see an element whose descendants were already closed in the
/// same pass and must cope with that.
pub trait CloseListener: Send + Sync {
    fn closed(&self, handle: &Handle, info: &ElementInfo) -> Result<(), CloseError>;
}

/// Outcome of a close pass. Failures are collected, never raised.
#[derive(Debug, Default)]
pub struct CloseReport {
    pub closed: usize,
    pub buffers_closed: usize,
    pub failures: Vec<(Handle, CloseError)>,
}

impl CloseReport {
    pub fn merge(&mut self, other: CloseReport) {
        self.closed += other.closed;
        self.buffers_closed += other.buffers_closed;
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    pub info: InfoCacheConfig,
    pub buffer_slots: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            info: InfoCacheConfig::default(),
            buffer_slots: BufferCache::DEFAULT_CAPACITY,
        }
    }
}

/// Owns the info and buffer caches of one model instance.
///
/// Opening an element stages everything its builder produces in an
/// [`OpenContext`] and commits the batch in one critical section, so slow
/// structure computation never runs under a cache lock. Two threads opening
/// the same element may both build it; the first commit wins and the loser's
/// result is dropped.
pub struct ModelManager {
    infos: InfoCache,
    buffers: BufferCache,
    builder: Arc<dyn StructureBuilder>,
    listeners: Mutex<Vec<Arc<dyn CloseListener>>>,
    shut_down: AtomicBool,
}

impl ModelManager {
    pub fn new(config: ModelConfig, builder: Arc<dyn StructureBuilder>) -> Self {
        Self {
            infos: InfoCache::new(config.info),
            buffers: BufferCache::new(config.buffer_slots),
            builder,
            listeners: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn infos(&self) -> &InfoCache {
        &self.infos
    }

    pub fn buffers(&self) -> &BufferCache {
        &self.buffers
    }

    pub fn add_close_listener(&self, listener: Arc<dyn CloseListener>) {
        lock_or_recover(&self.listeners, "arbor.model").push(listener);
    }

    /// Cached info for `handle`; never computes.
    pub fn get_info(&self, handle: &Handle) -> Option<Arc<ElementInfo>> {
        self.infos.get(handle)
    }

    pub fn is_open(&self, handle: &Handle) -> bool {
        self.infos.contains(handle)
    }

    /// Info for `handle`, computing it (and any unopened ancestors) on a miss.
    pub fn open(&self, handle: &Handle) -> Result<Arc<ElementInfo>> {
        self.open_in(handle, &mut OpenContext::new())
    }

    pub fn open_with_cancellation(
        &self,
        handle: &Handle,
        cancel: CancellationToken,
    ) -> Result<Arc<ElementInfo>> {
        self.open_in(handle, &mut OpenContext::with_cancellation(cancel))
    }

    /// Opens `handle` using `cx` as the staging area. `cx` is empty again when
    /// this returns, whether the open succeeded or not.
    pub fn open_in(&self, handle: &Handle, cx: &mut OpenContext) -> Result<Arc<ElementInfo>> {
        self.ensure_running()?;
        if let Some(info) = self.infos.get(handle) {
            return Ok(info);
        }
        self.stage_and_commit(handle, cx, false)
    }

    /// Recomputes the openable enclosing `handle` even if it is cached. Its
    /// cached subtree is closed and replaced by the fresh build.
    pub fn reopen(&self, handle: &Handle) -> Result<Arc<ElementInfo>> {
        self.ensure_running()?;
        self.stage_and_commit(handle, &mut OpenContext::new(), true)
    }

    /// Removes `handle` and its cached descendants, then closes them.
    pub fn close(&self, handle: &Handle) -> CloseReport {
        let pending = self.infos.remove(handle);
        let mut report = self.close_pass(pending);
        if handle.kind().has_buffer() && self.buffers.close_buffer(handle) {
            report.buffers_closed += 1;
        }
        report
    }

    /// Applies `update` to the cached info for `handle` under the cache lock.
    pub fn update_info(&self, handle: &Handle, update: impl FnOnce(&mut ElementInfo)) -> bool {
        self.infos.update(handle, update)
    }

    /// Runs buffer closes and close listeners for every entry in `pending`.
    ///
    /// Each entry is closed independently: a failing listener is logged and
    /// recorded, and the pass moves on.
    pub fn close_pass(&self, pending: PendingClose) -> CloseReport {
        let mut report = CloseReport::default();
        if pending.is_empty() {
            return report;
        }
        let listeners = lock_or_recover(&self.listeners, "arbor.model").clone();
        for Evicted { handle, info } in pending {
            if handle.kind().has_buffer() && self.buffers.close_buffer(&handle) {
                report.buffers_closed += 1;
            }
            for listener in &listeners {
                if let Err(err) = listener.closed(&handle, &info) {
                    tracing::warn!(
                        target = "arbor.model",
                        handle = %handle,
                        error = %err,
                        "close callback failed; continuing close pass"
                    );
                    report.failures.push((handle.clone(), err));
                }
            }
            report.closed += 1;
        }
        tracing::trace!(
            target = "arbor.model",
            closed = report.closed,
            buffers_closed = report.buffers_closed,
            failures = report.failures.len(),
            "close pass finished"
        );
        report
    }

    /// Closes every cached info and buffer. Later opens fail with
    /// [`ModelError::ShutDown`].
    pub fn shutdown(&self) -> CloseReport {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return CloseReport::default();
        }
        let mut report = self.close_pass(self.infos.clear());
        report.buffers_closed += self.buffers.clear().len();
        tracing::debug!(
            target = "arbor.model",
            closed = report.closed,
            buffers_closed = report.buffers_closed,
            "model manager shut down"
        );
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(ModelError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn stage_and_commit(
        &self,
        handle: &Handle,
        cx: &mut OpenContext,
        force: bool,
    ) -> Result<Arc<ElementInfo>> {
        let openable = match handle.openable() {
            Some(openable) => openable,
            None => return Err(ModelError::NotFound(handle.clone())),
        };

        // The openable is cached but this descendant was evicted on its own:
        // rebuild the openable and let the commit refill what it lists.
        let refill = !force && &openable != handle && self.infos.contains(&openable);
        if refill {
            tracing::trace!(
                target = "arbor.model",
                handle = %handle,
                openable = %openable,
                "rebuilding cached openable for an evicted descendant"
            );
        }

        if let Err(err) = self.stage(&openable, cx, force || refill) {
            let dropped = cx.discard();
            tracing::debug!(
                target = "arbor.model",
                handle = %handle,
                dropped,
                error = %err,
                "discarding staged infos after failed open"
            );
            return Err(err);
        }

        let (infos, buffers) = cx.take();
        let forced = force.then_some(&openable);
        let outcome = self.infos.commit(infos, forced, handle);
        tracing::trace!(
            target = "arbor.model",
            handle = %handle,
            inserted = outcome.inserted,
            discarded = outcome.discarded,
            evicted = outcome.pending.len(),
            "committed staged infos"
        );
        self.close_pass(outcome.pending);

        for buffer in buffers {
            if force {
                let _ = self.buffers.add_buffer(buffer);
            } else if let Err(existing) = self.buffers.try_add_buffer(Arc::clone(&buffer)) {
                if !Arc::ptr_eq(&existing, &buffer) {
                    buffer.close();
                }
            }
        }

        outcome
            .requested
            .ok_or_else(|| ModelError::NotFound(handle.clone()))
    }

    /// Builds `openable` and every uncached openable ancestor, outermost first.
    /// With `rebuild`, `openable` itself is built even when it is cached.
    fn stage(&self, openable: &Handle, cx: &mut OpenContext, rebuild: bool) -> Result<()> {
        let mut chain = Vec::new();
        let mut cursor = Some(openable.clone());
        while let Some(current) = cursor {
            let rebuilt_here = rebuild && &current == openable;
            if !rebuilt_here && (self.infos.contains(&current) || cx.staged(&current).is_some()) {
                break;
            }
            cursor = current.parent().and_then(Handle::openable);
            chain.push(current);
        }

        for current in chain.into_iter().rev() {
            cx.cancellation().check()?;
            // An ancestor's build may already have produced this one.
            if cx.staged(&current).is_some() && !(rebuild && &current == openable) {
                continue;
            }
            self.builder
                .build(&current, &mut Staging::new(cx))
                .map_err(|err| ModelError::from_structural(&current, err))?;
            if cx.staged(&current).is_none() {
                return Err(ModelError::NotFound(current));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("infos", &self.infos)
            .field("buffers", &self.buffers)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
