use std::sync::{Arc, Mutex, MutexGuard};

use arbor_core::sync::lock_or_recover;
use arbor_core::Handle;
use lru::LruCache;

use crate::buffer::TextBuffer;

/// Bounded LRU of opened buffers, at most one per owner handle.
///
/// Buffers pushed out for space or replaced by a newer buffer for the same
/// owner are closed after the cache lock is released. Eviction picks the
/// least-recently-used buffer without unsaved changes; a dirty buffer is only
/// evicted when nothing clean is left.
pub struct BufferCache {
    capacity: usize,
    inner: Mutex<LruCache<Handle, Arc<TextBuffer>>>,
}

impl BufferCache {
    pub const DEFAULT_CAPACITY: usize = 60;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LruCache::unbounded()),
        }
    }

    #[track_caller]
    fn lock_inner(&self) -> MutexGuard<'_, LruCache<Handle, Arc<TextBuffer>>> {
        lock_or_recover(&self.inner, "arbor.model")
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock_inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Share of the capacity currently in use, in `[0, 1]`.
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Registers `buffer` under its owner, replacing any previous buffer for
    /// that owner. Returns the owners of every buffer this call closed.
    pub fn add_buffer(&self, buffer: Arc<TextBuffer>) -> Vec<Handle> {
        let to_close = {
            let mut lru = self.lock_inner();
            let mut to_close = Vec::new();
            if let Some(previous) = lru.put(buffer.owner().clone(), Arc::clone(&buffer)) {
                if !Arc::ptr_eq(&previous, &buffer) {
                    to_close.push(previous);
                }
            }
            self.evict_over_capacity(&mut lru, &buffer, &mut to_close);
            to_close
        };
        close_all(to_close)
    }

    /// Registers `buffer` unless its owner already has one.
    ///
    /// `Err` carries the buffer that stays registered; the rejected candidate
    /// is left open for the caller to dispose of.
    pub fn try_add_buffer(&self, buffer: Arc<TextBuffer>) -> Result<Vec<Handle>, Arc<TextBuffer>> {
        let to_close = {
            let mut lru = self.lock_inner();
            if let Some(existing) = lru.get(buffer.owner()) {
                return Err(Arc::clone(existing));
            }
            lru.put(buffer.owner().clone(), Arc::clone(&buffer));
            let mut to_close = Vec::new();
            self.evict_over_capacity(&mut lru, &buffer, &mut to_close);
            to_close
        };
        Ok(close_all(to_close))
    }

    pub fn get_buffer(&self, owner: &Handle) -> Option<Arc<TextBuffer>> {
        self.lock_inner().get(owner).cloned()
    }

    /// Unregisters `buffer` if it is the one registered for its owner. The
    /// buffer itself is not closed.
    pub fn remove_buffer(&self, buffer: &Arc<TextBuffer>) -> bool {
        let mut lru = self.lock_inner();
        let registered = lru
            .peek(buffer.owner())
            .is_some_and(|registered| Arc::ptr_eq(registered, buffer));
        if registered {
            lru.pop(buffer.owner());
        }
        registered
    }

    /// Unregisters and closes the buffer owned by `owner`, if any.
    pub fn close_buffer(&self, owner: &Handle) -> bool {
        let removed = self.lock_inner().pop(owner);
        match removed {
            Some(buffer) => {
                buffer.close();
                true
            }
            None => false,
        }
    }

    /// Snapshot of every open buffer, most recently used first.
    ///
    /// Buffers closed behind the cache's back are dropped from the index first,
    /// so the snapshot only holds live buffers.
    pub fn all_open_buffers(&self) -> Vec<Arc<TextBuffer>> {
        let mut lru = self.lock_inner();
        let stale: Vec<Handle> = lru
            .iter()
            .filter(|(_, buffer)| buffer.is_closed())
            .map(|(owner, _)| owner.clone())
            .collect();
        for owner in stale {
            lru.pop(&owner);
        }
        lru.iter().map(|(_, buffer)| Arc::clone(buffer)).collect()
    }

    /// Closes every buffer, e.g. on shutdown.
    pub fn clear(&self) -> Vec<Handle> {
        let to_close = {
            let mut lru = self.lock_inner();
            let mut to_close = Vec::with_capacity(lru.len());
            while let Some((_, buffer)) = lru.pop_lru() {
                to_close.push(buffer);
            }
            to_close
        };
        close_all(to_close)
    }

    fn evict_over_capacity(
        &self,
        lru: &mut LruCache<Handle, Arc<TextBuffer>>,
        inserted: &Arc<TextBuffer>,
        to_close: &mut Vec<Arc<TextBuffer>>,
    ) {
        while lru.len() > self.capacity {
            let Some((owner, dirty)) = pick_victim(lru, inserted) else {
                break;
            };
            if dirty {
                tracing::warn!(
                    target = "arbor.model",
                    owner = %owner,
                    "evicting buffer with unsaved changes; every buffer in the cache is dirty"
                );
            }
            if let Some(buffer) = lru.pop(&owner) {
                to_close.push(buffer);
            }
        }
    }
}

fn pick_victim(
    lru: &LruCache<Handle, Arc<TextBuffer>>,
    inserted: &Arc<TextBuffer>,
) -> Option<(Handle, bool)> {
    let mut fallback = None;
    for (owner, buffer) in lru.iter().rev() {
        if Arc::ptr_eq(buffer, inserted) {
            continue;
        }
        if !buffer.has_unsaved_changes() {
            return Some((owner.clone(), false));
        }
        if fallback.is_none() {
            fallback = Some((owner.clone(), true));
        }
    }
    fallback
}

fn close_all(buffers: Vec<Arc<TextBuffer>>) -> Vec<Handle> {
    buffers
        .into_iter()
        .map(|buffer| {
            buffer.close();
            buffer.owner().clone()
        })
        .collect()
}

impl std::fmt::Debug for BufferCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
