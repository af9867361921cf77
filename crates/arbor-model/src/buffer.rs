use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arbor_core::sync::lock_or_recover;
use arbor_core::Handle;

/// Notified when a buffer's content stops being resident.
pub trait BufferListener: Send + Sync {
    fn buffer_closed(&self, owner: &Handle);
}

/// Opened text content of a content-bearing element.
///
/// A closed buffer drops its text and ignores further edits. Closing twice is
/// a no-op, so close callbacks may race with explicit closes.
pub struct TextBuffer {
    owner: Handle,
    contents: Mutex<Option<Arc<str>>>,
    listeners: Mutex<Vec<Arc<dyn BufferListener>>>,
    dirty: AtomicBool,
    closed: AtomicBool,
}

impl TextBuffer {
    pub fn new(owner: Handle, contents: impl Into<Arc<str>>) -> Self {
        Self {
            owner,
            contents: Mutex::new(Some(contents.into())),
            listeners: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> &Handle {
        &self.owner
    }

    /// Current text, or `None` once the buffer is closed.
    pub fn contents(&self) -> Option<Arc<str>> {
        lock_or_recover(&self.contents, "arbor.model").clone()
    }

    /// Replaces the text and marks the buffer as having unsaved changes.
    /// Returns `false` if the buffer is already closed.
    pub fn set_contents(&self, text: impl Into<Arc<str>>) -> bool {
        let mut contents = lock_or_recover(&self.contents, "arbor.model");
        if self.is_closed() {
            return false;
        }
        *contents = Some(text.into());
        self.dirty.store(true, Ordering::SeqCst);
        true
    }

    pub fn mark_saved(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: Arc<dyn BufferListener>) {
        lock_or_recover(&self.listeners, "arbor.model").push(listener);
    }

    /// Releases the content and notifies listeners. Returns `true` for the
    /// call that actually closed the buffer.
    pub fn close(&self) -> bool {
        {
            let mut contents = lock_or_recover(&self.contents, "arbor.model");
            if self.closed.swap(true, Ordering::SeqCst) {
                return false;
            }
            *contents = None;
        }
        let listeners = std::mem::take(&mut *lock_or_recover(&self.listeners, "arbor.model"));
        for listener in listeners {
            listener.buffer_closed(&self.owner);
        }
        tracing::trace!(target = "arbor.model", owner = %self.owner, "buffer closed");
        true
    }
}

impl fmt::Debug for TextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextBuffer")
            .field("owner", &self.owner)
            .field("dirty", &self.has_unsaved_changes())
            .field("closed", &self.is_closed())
            .finish()
    }
}
