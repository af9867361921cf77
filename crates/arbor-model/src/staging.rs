use std::sync::Arc;

use arbor_core::{Cancelled, CancellationToken, Handle};
use indexmap::IndexMap;

use crate::buffer::TextBuffer;
use crate::error::StructuralError;
use crate::info::ElementInfo;

/// Computes the structure of an openable element.
///
/// The builder stages the info for `openable` itself plus anything it
/// discovers on the way (children, nested members, a text buffer for
/// content-bearing elements). It never sees the shared caches. Returning an
/// error discards everything staged for the whole open operation.
pub trait StructureBuilder: Send + Sync {
    fn build(&self, openable: &Handle, staging: &mut Staging<'_>) -> Result<(), StructuralError>;
}

/// Scratch state for one open operation.
///
/// Staged infos stay private to the operation until
/// [`ModelManager::open_in`](crate::ModelManager::open_in) commits them; a
/// failed or cancelled open leaves the context empty again.
#[derive(Debug, Default)]
pub struct OpenContext {
    cancel: CancellationToken,
    infos: IndexMap<Handle, ElementInfo>,
    buffers: IndexMap<Handle, Arc<TextBuffer>>,
}

impl OpenContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn staged(&self, handle: &Handle) -> Option<&ElementInfo> {
        self.infos.get(handle)
    }

    pub fn staged_buffer(&self, owner: &Handle) -> Option<&Arc<TextBuffer>> {
        self.buffers.get(owner)
    }

    /// Number of staged infos.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty() && self.buffers.is_empty()
    }

    pub(crate) fn take(&mut self) -> (Vec<(Handle, ElementInfo)>, Vec<Arc<TextBuffer>>) {
        let infos = std::mem::take(&mut self.infos).into_iter().collect();
        let buffers = std::mem::take(&mut self.buffers).into_values().collect();
        (infos, buffers)
    }

    /// Drops everything staged so far. Staged buffers never became visible,
    /// so they are closed here. Returns the number of dropped infos.
    pub(crate) fn discard(&mut self) -> usize {
        let dropped = self.infos.len();
        self.infos.clear();
        for (_, buffer) in self.buffers.drain(..) {
            buffer.close();
        }
        dropped
    }
}

/// The builder-facing view of an [`OpenContext`].
pub struct Staging<'a> {
    cx: &'a mut OpenContext,
}

impl<'a> Staging<'a> {
    pub(crate) fn new(cx: &'a mut OpenContext) -> Self {
        Self { cx }
    }

    /// Stages `info` for `handle`. Staging the same handle twice keeps the
    /// later value.
    pub fn stage(&mut self, handle: Handle, info: ElementInfo) {
        self.cx.infos.insert(handle, info);
    }

    /// Stages an opened buffer for a content-bearing element. A previously
    /// staged buffer for the same owner is closed.
    pub fn stage_buffer(&mut self, buffer: Arc<TextBuffer>) {
        if let Some(previous) = self.cx.buffers.insert(buffer.owner().clone(), buffer) {
            previous.close();
        }
    }

    pub fn get(&self, handle: &Handle) -> Option<&ElementInfo> {
        self.cx.infos.get(handle)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cx.cancel
    }

    /// Builders call this between sub-units of work.
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        self.cx.cancel.check()
    }
}
