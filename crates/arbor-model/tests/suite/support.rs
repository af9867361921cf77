use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use arbor_core::{ElementKind, Handle};
use arbor_model::{
    CloseError, CloseListener, ElementInfo, InfoPayload, ModelConfig, ModelManager, Staging,
    StructuralError, StructureBuilder, TextBuffer,
};

/// A builder backed by an in-memory tree.
///
/// Openable children are listed but not staged (they are opened on their own);
/// every other child is staged recursively with its parent.
#[derive(Default)]
pub struct TreeBuilder {
    tree: Mutex<HashMap<Handle, Vec<Handle>>>,
    failures: Mutex<HashMap<Handle, usize>>,
    calls: Mutex<Vec<Handle>>,
    stamps: AtomicU64,
    source_barrier: Option<Barrier>,
    buffers: Mutex<Vec<Arc<TextBuffer>>>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source builds rendezvous on a barrier of `threads` before staging.
    pub fn with_source_barrier(threads: usize) -> Self {
        Self {
            source_barrier: Some(Barrier::new(threads)),
            ..Self::default()
        }
    }

    pub fn add(&self, parent: &Handle, children: &[Handle]) -> &Self {
        self.tree
            .lock()
            .unwrap()
            .entry(parent.clone())
            .or_default()
            .extend(children.iter().cloned());
        self
    }

    pub fn fail_next(&self, handle: &Handle, times: usize) {
        self.failures.lock().unwrap().insert(handle.clone(), times);
    }

    pub fn calls(&self) -> Vec<Handle> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, handle: &Handle) -> usize {
        self.calls().iter().filter(|h| *h == handle).count()
    }

    pub fn created_buffers(&self) -> Vec<Arc<TextBuffer>> {
        self.buffers.lock().unwrap().clone()
    }

    fn children_of(&self, handle: &Handle) -> Option<Vec<Handle>> {
        self.tree.lock().unwrap().get(handle).cloned()
    }

    fn stage_members(&self, parent: &Handle, staging: &mut Staging<'_>) {
        for child in self.children_of(parent).unwrap_or_default() {
            if child.kind().is_openable() {
                continue;
            }
            self.stage_members(&child, staging);
            let grandchildren = self.children_of(&child).unwrap_or_default();
            staging.stage(
                child,
                ElementInfo::new()
                    .with_children(grandchildren)
                    .with_payload(InfoPayload::Member {
                        signature: None,
                        name_range: None,
                    }),
            );
        }
    }
}

impl StructureBuilder for TreeBuilder {
    fn build(&self, openable: &Handle, staging: &mut Staging<'_>) -> Result<(), StructuralError> {
        self.calls.lock().unwrap().push(openable.clone());
        staging.check_cancelled()?;

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(openable) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StructuralError::Malformed {
                        handle: openable.clone(),
                        message: "unexpected token".to_owned(),
                    });
                }
            }
        }

        let children = self
            .children_of(openable)
            .ok_or_else(|| StructuralError::NotFound(openable.clone()))?;

        if openable.kind().has_buffer() {
            if let Some(barrier) = &self.source_barrier {
                barrier.wait();
            }
        }

        let stamp = self.stamps.fetch_add(1, Ordering::SeqCst);
        self.stage_members(openable, staging);
        let payload = if openable.kind().has_buffer() {
            let buffer = Arc::new(TextBuffer::new(openable.clone(), format!("// {openable}")));
            self.buffers.lock().unwrap().push(Arc::clone(&buffer));
            staging.stage_buffer(buffer);
            InfoPayload::Source {
                timestamp: Some(stamp),
                is_structure_known: true,
            }
        } else {
            InfoPayload::Container {
                non_source_resources: Vec::new(),
            }
        };
        staging.stage(
            openable.clone(),
            ElementInfo::new().with_children(children).with_payload(payload),
        );
        Ok(())
    }
}

pub fn stamp(info: &ElementInfo) -> Option<u64> {
    match info.payload() {
        InfoPayload::Source { timestamp, .. } => *timestamp,
        _ => None,
    }
}

/// Records every closed handle; optionally fails for one of them.
#[derive(Default)]
pub struct RecordingListener {
    closed: Mutex<Vec<Handle>>,
    fail_for: Option<Handle>,
    calls: AtomicUsize,
}

impl RecordingListener {
    pub fn failing_for(handle: Handle) -> Self {
        Self {
            fail_for: Some(handle),
            ..Self::default()
        }
    }

    pub fn closed(&self) -> Vec<Handle> {
        self.closed.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CloseListener for RecordingListener {
    fn closed(&self, handle: &Handle, _info: &ElementInfo) -> Result<(), CloseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_for.as_ref() == Some(handle) {
            return Err(CloseError::new("resource already released"));
        }
        self.closed.lock().unwrap().push(handle.clone());
        Ok(())
    }
}

pub fn unit(name: &str) -> Handle {
    Handle::model().child(ElementKind::CompilationUnit, name)
}

/// Model root with compilation unit `A` holding types `A/x` and `A/y`.
pub fn single_unit_tree() -> (Arc<TreeBuilder>, Handle) {
    let builder = Arc::new(TreeBuilder::new());
    let a = unit("A");
    builder.add(&Handle::model(), &[a.clone()]);
    builder.add(
        &a,
        &[a.child(ElementKind::Type, "x"), a.child(ElementKind::Type, "y")],
    );
    (builder, a)
}

pub fn manager(builder: Arc<TreeBuilder>, config: ModelConfig) -> ModelManager {
    ModelManager::new(config, builder)
}
