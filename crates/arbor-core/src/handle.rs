use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use smol_str::SmolStr;

/// The kind of node a [`Handle`] names.
///
/// Kinds replace per-type dispatch: the cache crates only ask a kind whether
/// it is openable, owns a text buffer, or is backed by an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Model,
    Project,
    Root,
    ArchiveRoot,
    Package,
    CompilationUnit,
    ClassFile,
    Type,
    Field,
    Method,
    Initializer,
    Import,
    LocalVariable,
}

impl ElementKind {
    /// Openable kinds get their info computed by the structure builder; every
    /// other kind is discovered while its enclosing openable is built.
    pub const fn is_openable(self) -> bool {
        matches!(
            self,
            ElementKind::Model
                | ElementKind::Project
                | ElementKind::Root
                | ElementKind::ArchiveRoot
                | ElementKind::Package
                | ElementKind::CompilationUnit
                | ElementKind::ClassFile
        )
    }

    /// Content-bearing kinds, backed by an external byte source.
    pub const fn has_buffer(self) -> bool {
        matches!(self, ElementKind::CompilationUnit | ElementKind::ClassFile)
    }

    pub const fn is_archive_container(self) -> bool {
        matches!(self, ElementKind::ArchiveRoot)
    }

    /// Openable nodes that only group other nodes.
    pub const fn is_container(self) -> bool {
        self.is_openable() && !self.has_buffer()
    }
}

/// Immutable, value-equal identity for a node in the element tree.
///
/// A handle carries its parent by value, so two handles built independently
/// for the same node compare equal and hash identically. Handles never look
/// anything up; cached data lives in the model caches keyed by handle.
#[derive(Clone)]
pub struct Handle(Arc<HandleData>);

struct HandleData {
    kind: ElementKind,
    name: SmolStr,
    parent: Option<Handle>,
    occurrence: u32,
    depth: u32,
    hash: OnceLock<u64>,
}

impl Handle {
    /// The root of every element tree.
    pub fn model() -> Handle {
        Handle(Arc::new(HandleData {
            kind: ElementKind::Model,
            name: SmolStr::default(),
            parent: None,
            occurrence: 1,
            depth: 0,
            hash: OnceLock::new(),
        }))
    }

    pub fn child(&self, kind: ElementKind, name: impl Into<SmolStr>) -> Handle {
        self.child_with_occurrence(kind, name, 1)
    }

    /// Child handle for the `occurrence`-th sibling with the same name and
    /// kind. Occurrences are 1-based; zero is treated as one.
    pub fn child_with_occurrence(
        &self,
        kind: ElementKind,
        name: impl Into<SmolStr>,
        occurrence: u32,
    ) -> Handle {
        Handle(Arc::new(HandleData {
            kind,
            name: name.into(),
            parent: Some(self.clone()),
            occurrence: occurrence.max(1),
            depth: self.0.depth + 1,
            hash: OnceLock::new(),
        }))
    }

    #[inline]
    pub fn kind(&self) -> ElementKind {
        self.0.kind
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn parent(&self) -> Option<&Handle> {
        self.0.parent.as_ref()
    }

    #[inline]
    pub fn occurrence(&self) -> u32 {
        self.0.occurrence
    }

    /// Distance from the model root (the root itself has depth 0).
    #[inline]
    pub fn depth(&self) -> u32 {
        self.0.depth
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent(),
        }
    }

    pub fn is_ancestor_of(&self, other: &Handle) -> bool {
        if other.depth() <= self.depth() {
            return false;
        }
        other.ancestors().any(|ancestor| ancestor == self)
    }

    /// Nearest openable handle, starting with `self`.
    pub fn openable(&self) -> Option<Handle> {
        if self.kind().is_openable() {
            return Some(self.clone());
        }
        self.ancestors()
            .find(|ancestor| ancestor.kind().is_openable())
            .cloned()
    }

    /// Nearest ancestor-or-self of the given kind.
    pub fn ancestor_of_kind(&self, kind: ElementKind) -> Option<Handle> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        self.ancestors()
            .find(|ancestor| ancestor.kind() == kind)
            .cloned()
    }

    fn structural_hash(&self) -> u64 {
        *self.0.hash.get_or_init(|| {
            let mut hasher = DefaultHasher::new();
            self.0.kind.hash(&mut hasher);
            self.0.name.hash(&mut hasher);
            self.0.occurrence.hash(&mut hasher);
            match &self.0.parent {
                Some(parent) => parent.structural_hash().hash(&mut hasher),
                None => 0u64.hash(&mut hasher),
            }
            hasher.finish()
        })
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.depth == other.0.depth
            && self.0.kind == other.0.kind
            && self.0.occurrence == other.0.occurrence
            && self.structural_hash() == other.structural_hash()
            && self.0.name == other.0.name
            && self.0.parent == other.0.parent
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            if parent.parent().is_some() {
                write!(f, "{parent}/")?;
            }
        }
        f.write_str(self.name())?;
        if self.occurrence() > 1 {
            write!(f, "#{}", self.occurrence())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({self})", self.kind())
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a Handle>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Handle;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
