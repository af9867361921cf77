//! One explicitly constructed Arbor instance.
//!
//! [`Workspace`] owns every cache: element infos and buffers, classpath
//! containers and variables, archive validity, and the type index. Nothing is
//! process-global, so tests can run any number of isolated workspaces side by
//! side.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arbor_archive::{ArchiveManager, ArchiveOpener, SessionOwner, ValidityCache, ZipOpener};
use arbor_classpath::{
    load_snapshot, save_snapshot, ClasspathContainer, ClasspathError, ClasspathSnapshot,
    ContainerCache, ContainerPath, Initializer, ProjectName, VariableCache,
};
use arbor_config::ArborConfig;
use arbor_core::sync::lock_or_recover;
use arbor_core::{CancellationToken, ElementKind, Handle};
use arbor_index::{IndexCache, IndexError, IndexSnapshot};
use arbor_model::{CloseReport, ElementInfo, ModelError, ModelManager, StructureBuilder};
use thiserror::Error;

/// Fully qualified type name to the handle declaring it, attributed to the
/// root (source folder or archive path) it was found in.
pub type TypeIndex = IndexCache<String, String, Handle>;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Classpath(#[from] ClasspathError),
    #[error(transparent)]
    Archive(#[from] arbor_archive::ArchiveError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("workspace has been shut down")]
    ShutDown,
}

pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;

pub struct Workspace<P: ArchiveOpener = ZipOpener> {
    config: ArborConfig,
    model: ModelManager,
    containers: ContainerCache,
    variables: VariableCache,
    archives: Arc<ArchiveManager<P>>,
    /// Archive sessions entered through this workspace.
    sessions: Mutex<HashSet<SessionOwner>>,
    types: TypeIndex,
    shut_down: AtomicBool,
}

impl Workspace<ZipOpener> {
    /// A workspace reading archives from the local file system.
    pub fn new(config: ArborConfig, builder: Arc<dyn StructureBuilder>) -> Self {
        let archives = Arc::new(ArchiveManager::zip(ValidityCache::with_ttl(
            config.archive_ttl(),
        )));
        Self::with_archives(config, builder, archives)
    }
}

impl<P: ArchiveOpener> Workspace<P> {
    /// Wires a workspace around an existing archive manager, which the
    /// structure builder may share. A classpath snapshot at the configured
    /// location seeds the previous-session values of both classpath caches.
    pub fn with_archives(
        config: ArborConfig,
        builder: Arc<dyn StructureBuilder>,
        archives: Arc<ArchiveManager<P>>,
    ) -> Self {
        let workspace = Self {
            model: ModelManager::new(config.model_config(), builder),
            containers: ContainerCache::new(),
            variables: VariableCache::new(),
            archives,
            sessions: Mutex::new(HashSet::new()),
            types: TypeIndex::with_poll_interval(config.index_poll_interval()),
            shut_down: AtomicBool::new(false),
            config,
        };
        workspace.load_classpath_snapshot();
        workspace
    }

    pub fn config(&self) -> &ArborConfig {
        &self.config
    }

    pub fn model(&self) -> &ModelManager {
        &self.model
    }

    pub fn containers(&self) -> &ContainerCache {
        &self.containers
    }

    pub fn variables(&self) -> &VariableCache {
        &self.variables
    }

    pub fn archives(&self) -> &ArchiveManager<P> {
        &self.archives
    }

    pub fn types(&self) -> &TypeIndex {
        &self.types
    }

    pub fn open(&self, handle: &Handle) -> Result<Arc<ElementInfo>> {
        self.ensure_running()?;
        Ok(self.model.open(handle)?)
    }

    pub fn open_with_cancellation(
        &self,
        handle: &Handle,
        cancel: CancellationToken,
    ) -> Result<Arc<ElementInfo>> {
        self.ensure_running()?;
        Ok(self.model.open_with_cancellation(handle, cancel)?)
    }

    pub fn close(&self, handle: &Handle) -> Result<CloseReport> {
        self.ensure_running()?;
        Ok(self.model.close(handle))
    }

    /// The classpath container `path` of `project`, resolving it on first use.
    /// While it is being resolved, callers get the previous session's value.
    pub fn resolve_container<I>(
        &self,
        project: &ProjectName,
        path: &ContainerPath,
        initializer: &I,
    ) -> Result<Option<ClasspathContainer>>
    where
        I: Initializer<ProjectName, ContainerPath, ClasspathContainer> + ?Sized,
    {
        self.ensure_running()?;
        Ok(self.containers.resolve(project, path, initializer)?)
    }

    pub fn resolve_variable<I>(&self, name: &str, initializer: &I) -> Result<Option<PathBuf>>
    where
        I: Initializer<(), String, PathBuf> + ?Sized,
    {
        self.ensure_running()?;
        Ok(self.variables.resolve(&(), &name.to_owned(), initializer)?)
    }

    /// Drops everything cached for a deleted project: its element subtree
    /// and its resolved containers.
    pub fn remove_project(&self, project: &ProjectName) -> Result<CloseReport> {
        self.ensure_running()?;
        let handle = Handle::model().child(ElementKind::Project, project.as_str());
        let report = self.model.close(&handle);
        let containers = self.containers.remove_owner(project);
        tracing::debug!(
            target = "arbor.workspace",
            project = %project,
            closed = report.closed,
            containers,
            "removed project"
        );
        Ok(report)
    }

    pub fn archive_is_valid(&self, path: &Path) -> Result<bool> {
        self.ensure_running()?;
        Ok(self.archives.is_valid(path))
    }

    /// Opens an archive, reusing the one pooled for `session` if there is one.
    pub fn open_archive(
        &self,
        path: &Path,
        session: Option<SessionOwner>,
    ) -> Result<Arc<P::Archive>> {
        self.ensure_running()?;
        Ok(self.archives.open(path, session)?)
    }

    /// Rebuilds the type index for `roots`. `scan_root` returns the types
    /// declared in one root; an empty result drops the root from the index.
    pub fn rescan_types<I, F>(
        &self,
        roots: I,
        cancel: &CancellationToken,
        scan_root: F,
    ) -> Result<Arc<IndexSnapshot<String, String, Handle>>>
    where
        I: IntoIterator<Item = String>,
        F: FnMut(&String) -> Vec<(String, Handle)>,
    {
        self.ensure_running()?;
        Ok(self.types.run_scan(roots, cancel, scan_root)?)
    }

    /// Looks `name` up in the stable type index without waiting for a scan.
    pub fn find_type(&self, name: &str) -> Result<Option<Handle>> {
        self.ensure_running()?;
        Ok(self.types.read(&name.to_owned()))
    }

    /// Like [`find_type`](Self::find_type), but waits for an in-flight scan
    /// unless `cancel` fires first.
    pub fn find_type_fresh(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Handle>> {
        self.ensure_running()?;
        Ok(self.types.read_fresh(&name.to_owned(), cancel))
    }

    /// Enters `owner`'s archive session. Returns the nesting depth.
    pub fn enter_archive_session(&self, owner: SessionOwner) -> Result<usize> {
        self.ensure_running()?;
        let mut sessions = lock_or_recover(&self.sessions, "arbor.workspace");
        sessions.insert(owner);
        Ok(self.archives.enter_session(owner))
    }

    /// Leaves one level of `owner`'s archive session. Returns the number of
    /// archives released.
    pub fn flush_archive_session(&self, owner: SessionOwner) -> Result<usize> {
        self.ensure_running()?;
        let mut sessions = lock_or_recover(&self.sessions, "arbor.workspace");
        let released = self.archives.flush(owner);
        if self.archives.session_depth(owner) == 0 {
            sessions.remove(&owner);
        }
        Ok(released)
    }

    /// Writes the classpath caches to the configured snapshot file. Returns
    /// `false` when no state directory is configured.
    pub fn save_classpath_snapshot(&self) -> Result<bool> {
        let Some(path) = self.config.snapshot_path() else {
            return Ok(false);
        };
        let snapshot = ClasspathSnapshot::capture(&self.containers, &self.variables);
        save_snapshot(&path, &snapshot)?;
        Ok(true)
    }

    /// Saves the classpath snapshot, then closes every info and buffer and
    /// ends the archive sessions entered through this workspace. Sessions
    /// other users opened on a shared archive manager stay untouched. Later
    /// calls do nothing.
    ///
    /// Everything is closed even if saving fails; the save error is returned
    /// afterwards.
    pub fn shutdown(&self) -> Result<CloseReport> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(CloseReport::default());
        }
        let saved = self.save_classpath_snapshot();
        let report = self.model.shutdown();
        let owned = std::mem::take(&mut *lock_or_recover(&self.sessions, "arbor.workspace"));
        let released: usize = owned
            .into_iter()
            .map(|owner| self.archives.end_session(owner))
            .sum();
        tracing::debug!(
            target = "arbor.workspace",
            closed = report.closed,
            buffers_closed = report.buffers_closed,
            failures = report.failures.len(),
            archives_released = released,
            "workspace shut down"
        );
        saved?;
        Ok(report)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(WorkspaceError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn load_classpath_snapshot(&self) {
        let Some(path) = self.config.snapshot_path() else {
            return;
        };
        match load_snapshot(&path) {
            Ok(Some(snapshot)) => {
                tracing::debug!(
                    target = "arbor.workspace",
                    path = %path.display(),
                    containers = snapshot.containers.len(),
                    variables = snapshot.variables.len(),
                    "restored classpath snapshot"
                );
                snapshot.restore(&self.containers, &self.variables);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    target = "arbor.workspace",
                    path = %path.display(),
                    error = %err,
                    "failed to load classpath snapshot; starting without previous values"
                );
            }
        }
    }
}

impl<P: ArchiveOpener> std::fmt::Debug for Workspace<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("model", &self.model)
            .field("containers", &self.containers)
            .field("types", &self.types)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
