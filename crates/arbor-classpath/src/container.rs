use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::lazy::LazyResourceCache;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectName(String);

impl ProjectName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container path such as `JRE_CONTAINER/JavaSE-17`. The first segment names
/// the container kind, the rest is interpreted by its resolver.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerPath(String);

impl ContainerPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First path segment, which selects the resolver.
    pub fn container_id(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }
}

impl fmt::Display for ContainerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClasspathEntry {
    ClassDir(PathBuf),
    Jar(PathBuf),
    Jmod(PathBuf),
    Project(ProjectName),
}

impl ClasspathEntry {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ClasspathEntry::ClassDir(p) | ClasspathEntry::Jar(p) | ClasspathEntry::Jmod(p) => {
                Some(p)
            }
            ClasspathEntry::Project(_) => None,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, ClasspathEntry::Jar(_) | ClasspathEntry::Jmod(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    Application,
    DefaultSystem,
    System,
}

/// A resolved classpath container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClasspathContainer {
    pub path: ContainerPath,
    pub description: String,
    pub kind: ContainerKind,
    pub entries: Vec<ClasspathEntry>,
}

impl ClasspathContainer {
    pub fn new(path: ContainerPath, kind: ContainerKind, entries: Vec<ClasspathEntry>) -> Self {
        Self {
            description: path.to_string(),
            path,
            kind,
            entries,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Placeholder returned for containers whose resolver failed.
    pub fn unresolved(path: ContainerPath) -> Self {
        Self {
            description: format!("Unresolved container: {path}"),
            path,
            kind: ContainerKind::Application,
            entries: Vec::new(),
        }
    }
}

/// Containers per project.
pub type ContainerCache = LazyResourceCache<ProjectName, ContainerPath, ClasspathContainer>;

/// Classpath variables are workspace-wide, so they have a single unit owner.
pub type VariableCache = LazyResourceCache<(), String, PathBuf>;
