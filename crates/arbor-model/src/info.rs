use std::sync::Arc;

use arbor_core::Handle;

/// Half-open `[offset, offset + length)` range into an element's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceRange {
    pub offset: u32,
    pub length: u32,
}

impl SourceRange {
    #[inline]
    pub const fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    #[inline]
    pub const fn end(&self) -> u32 {
        self.offset.saturating_add(self.length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ElementFlags(u32);

impl ElementFlags {
    pub const PUBLIC: ElementFlags = ElementFlags(1 << 0);
    pub const PRIVATE: ElementFlags = ElementFlags(1 << 1);
    pub const PROTECTED: ElementFlags = ElementFlags(1 << 2);
    pub const STATIC: ElementFlags = ElementFlags(1 << 3);
    pub const FINAL: ElementFlags = ElementFlags(1 << 4);
    pub const ABSTRACT: ElementFlags = ElementFlags(1 << 5);
    pub const DEPRECATED: ElementFlags = ElementFlags(1 << 6);

    pub const fn empty() -> Self {
        ElementFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: ElementFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ElementFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for ElementFlags {
    type Output = ElementFlags;

    fn bitor(self, rhs: ElementFlags) -> ElementFlags {
        ElementFlags(self.0 | rhs.0)
    }
}

/// Kind-specific part of an [`ElementInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InfoPayload {
    #[default]
    None,
    /// Project, source root or package.
    Container { non_source_resources: Vec<Arc<str>> },
    /// Archive-backed root.
    Archive { entry_count: usize },
    /// Compilation unit or class file.
    Source {
        /// Modification stamp of the backing resource when the info was computed.
        timestamp: Option<u64>,
        is_structure_known: bool,
    },
    /// Type, field, method, initializer, import or local variable.
    Member {
        signature: Option<Arc<str>>,
        name_range: Option<SourceRange>,
    },
}

/// The computed data behind a handle.
///
/// Children are stored by handle value; resolving a child's own info is a
/// separate cache lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementInfo {
    children: Vec<Handle>,
    source_range: Option<SourceRange>,
    flags: ElementFlags,
    payload: InfoPayload,
}

impl ElementInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Handle>) -> Self {
        self.children = children.into_iter().collect();
        self
    }

    pub fn with_source_range(mut self, range: SourceRange) -> Self {
        self.source_range = Some(range);
        self
    }

    pub fn with_flags(mut self, flags: ElementFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_payload(mut self, payload: InfoPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn children(&self) -> &[Handle] {
        &self.children
    }

    pub fn push_child(&mut self, child: Handle) {
        self.children.push(child);
    }

    pub fn remove_child(&mut self, child: &Handle) -> bool {
        let before = self.children.len();
        self.children.retain(|existing| existing != child);
        self.children.len() != before
    }

    pub fn source_range(&self) -> Option<SourceRange> {
        self.source_range
    }

    pub fn flags(&self) -> ElementFlags {
        self.flags
    }

    pub fn payload(&self) -> &InfoPayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut InfoPayload {
        &mut self.payload
    }
}
