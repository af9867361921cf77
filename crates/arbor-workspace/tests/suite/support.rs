use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arbor_archive::{ArchiveManager, OpenArchive, ValidityCache};
use arbor_classpath::{
    ClasspathContainer, ClasspathEntry, ContainerKind, ContainerPath, InitContext, Initializer,
    ProjectName, ResolutionError,
};
use arbor_config::ArborConfig;
use arbor_core::{ElementKind, Handle};
use arbor_model::{ElementInfo, InfoPayload, Staging, StructuralError, StructureBuilder, TextBuffer};
use arbor_workspace::Workspace;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const PROJECT: &str = "app";

pub fn project() -> Handle {
    Handle::model().child(ElementKind::Project, PROJECT)
}

pub fn archive_root(jar: &Path) -> Handle {
    project().child(ElementKind::ArchiveRoot, jar.display().to_string())
}

pub fn write_jar(path: &Path, entries: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, text) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(text.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Builds a project whose only roots are jar files, reading them through the
/// workspace's own archive manager.
pub struct JarBuilder {
    archives: Arc<ArchiveManager>,
    jars: Vec<PathBuf>,
    builds: AtomicUsize,
}

impl JarBuilder {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn open(&self, root: &Handle) -> Result<Arc<OpenArchive>, StructuralError> {
        self.archives
            .open(Path::new(root.name()), None)
            .map_err(|err| StructuralError::Unreadable {
                handle: root.clone(),
                source: std::io::Error::other(err.to_string()),
            })
    }

    fn root_of(handle: &Handle) -> Result<Handle, StructuralError> {
        handle
            .ancestor_of_kind(ElementKind::ArchiveRoot)
            .ok_or_else(|| StructuralError::NotFound(handle.clone()))
    }

    fn classes(archive: &OpenArchive) -> Vec<(String, String)> {
        archive
            .entry_names()
            .into_iter()
            .filter_map(|name| {
                let stem = name.strip_suffix(".class")?.to_owned();
                Some(match stem.rsplit_once('/') {
                    Some((dir, simple)) => (dir.replace('/', "."), simple.to_owned()),
                    None => (String::new(), stem),
                })
            })
            .collect()
    }
}

impl StructureBuilder for JarBuilder {
    fn build(&self, openable: &Handle, staging: &mut Staging<'_>) -> Result<(), StructuralError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        match openable.kind() {
            ElementKind::Model => {
                staging.stage(openable.clone(), ElementInfo::new().with_children([project()]));
            }
            ElementKind::Project => {
                let roots = self.jars.iter().map(|jar| archive_root(jar));
                staging.stage(openable.clone(), ElementInfo::new().with_children(roots));
            }
            ElementKind::ArchiveRoot => {
                let archive = self.open(openable)?;
                let packages: BTreeSet<String> =
                    Self::classes(&archive).into_iter().map(|(p, _)| p).collect();
                let children = packages
                    .into_iter()
                    .map(|p| openable.child(ElementKind::Package, p));
                staging.stage(
                    openable.clone(),
                    ElementInfo::new()
                        .with_children(children)
                        .with_payload(InfoPayload::Archive {
                            entry_count: archive.entry_count(),
                        }),
                );
            }
            ElementKind::Package => {
                let archive = self.open(&Self::root_of(openable)?)?;
                let children = Self::classes(&archive)
                    .into_iter()
                    .filter(|(p, _)| p == openable.name())
                    .map(|(_, simple)| openable.child(ElementKind::ClassFile, format!("{simple}.class")));
                staging.stage(
                    openable.clone(),
                    ElementInfo::new()
                        .with_children(children)
                        .with_payload(InfoPayload::Container {
                            non_source_resources: Vec::new(),
                        }),
                );
            }
            ElementKind::ClassFile => {
                staging.check_cancelled()?;
                let archive = self.open(&Self::root_of(openable)?)?;
                let package = openable.parent().map(Handle::name).unwrap_or_default();
                let entry = if package.is_empty() {
                    openable.name().to_owned()
                } else {
                    format!("{}/{}", package.replace('.', "/"), openable.name())
                };
                let bytes = archive
                    .read(&entry)
                    .map_err(|err| StructuralError::Malformed {
                        handle: openable.clone(),
                        message: err.to_string(),
                    })?
                    .ok_or_else(|| StructuralError::NotFound(openable.clone()))?;
                let simple = openable.name().trim_end_matches(".class");
                let ty = openable.child(ElementKind::Type, simple);
                staging.stage(
                    ty.clone(),
                    ElementInfo::new().with_payload(InfoPayload::Member {
                        signature: None,
                        name_range: None,
                    }),
                );
                staging.stage(
                    openable.clone(),
                    ElementInfo::new()
                        .with_children([ty])
                        .with_payload(InfoPayload::Source {
                            timestamp: None,
                            is_structure_known: true,
                        }),
                );
                staging.stage_buffer(Arc::new(TextBuffer::new(
                    openable.clone(),
                    String::from_utf8_lossy(&bytes).into_owned(),
                )));
            }
            _ => return Err(StructuralError::NotFound(openable.clone())),
        }
        Ok(())
    }
}

pub fn jar_workspace(config: ArborConfig, jars: Vec<PathBuf>) -> (Workspace, Arc<JarBuilder>) {
    let archives = Arc::new(ArchiveManager::zip(ValidityCache::with_ttl(
        config.archive_ttl(),
    )));
    let builder = Arc::new(JarBuilder {
        archives: Arc::clone(&archives),
        jars,
        builds: AtomicUsize::new(0),
    });
    let workspace = Workspace::with_archives(config, builder.clone(), archives);
    (workspace, builder)
}

pub fn jre() -> ContainerPath {
    ContainerPath::new("JRE_CONTAINER/JavaSE-17")
}

/// Resolves every container to a single jmod and counts its calls.
#[derive(Default)]
pub struct JreResolver {
    pub calls: AtomicUsize,
}

impl Initializer<ProjectName, ContainerPath, ClasspathContainer> for JreResolver {
    fn initialize(
        &self,
        _owner: &ProjectName,
        path: &ContainerPath,
        _cx: &InitContext<'_, ProjectName, ContainerPath, ClasspathContainer>,
    ) -> Result<Option<ClasspathContainer>, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ClasspathContainer::new(
            path.clone(),
            ContainerKind::DefaultSystem,
            vec![ClasspathEntry::Jmod(PathBuf::from("/jdk/jmods/java.base.jmod"))],
        )))
    }
}
