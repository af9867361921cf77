use std::error::Error as _;
use std::sync::Arc;

use arbor_archive::{ArchiveValidity, SessionOwner};
use arbor_config::ArborConfig;
use arbor_core::ElementKind;
use arbor_model::ModelError;
use arbor_workspace::WorkspaceError;
use pretty_assertions::assert_eq;

use super::support::{archive_root, jar_workspace, project, write_jar};

#[test]
fn opening_a_class_file_builds_the_jar_chain() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("widgets.jar");
    write_jar(
        &jar,
        &[
            ("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\n"),
            ("com/acme/Widget.class", "widget-bytes"),
            ("com/acme/Gadget.class", "gadget-bytes"),
        ],
    );
    let (workspace, builder) = jar_workspace(ArborConfig::default(), vec![jar.clone()]);

    let root = archive_root(&jar);
    let package = root.child(ElementKind::Package, "com.acme");
    let widget = package.child(ElementKind::ClassFile, "Widget.class");

    let info = workspace.open(&widget).unwrap();
    assert_eq!(info.children(), &[widget.child(ElementKind::Type, "Widget")]);
    for ancestor in [&project(), &root, &package] {
        assert!(workspace.model().is_open(ancestor), "{ancestor} should be open");
    }
    assert_eq!(
        workspace.model().get_info(&package).unwrap().children().len(),
        2
    );

    let buffer = workspace.model().buffers().get_buffer(&widget).unwrap();
    assert_eq!(buffer.contents().as_deref(), Some("widget-bytes"));
    assert_eq!(
        workspace.archives().validity().validity(&jar),
        Some(ArchiveValidity::Valid)
    );

    let builds = builder.builds();
    workspace.open(&widget).unwrap();
    assert_eq!(builder.builds(), builds);
}

#[test]
fn corrupt_jar_fails_without_caching_anything() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("broken.jar");
    std::fs::write(&jar, b"definitely not a zip").unwrap();
    let (workspace, _builder) = jar_workspace(ArborConfig::default(), vec![jar.clone()]);
    let root = archive_root(&jar);

    let err = workspace.open(&root).unwrap_err();
    assert!(
        matches!(err, WorkspaceError::Model(ModelError::Structural { .. })),
        "{err:?}"
    );
    assert!(!workspace.model().is_open(&root));
    assert!(!workspace.model().is_open(&project()));
    assert!(matches!(
        workspace.archives().validity().validity(&jar),
        Some(ArchiveValidity::Invalid { .. })
    ));

    // The cached failure answers the retry without reading the file again.
    let err = workspace.open(&root).unwrap_err();
    let cause = err.source().and_then(|model| model.source()).unwrap();
    assert!(cause.to_string().contains("known to be invalid"), "{cause}");
    assert!(!workspace.archive_is_valid(&jar).unwrap());
}

#[test]
fn archive_sessions_pool_until_flushed() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("lib.jar");
    write_jar(&jar, &[("p/A.class", "a")]);
    let (workspace, _builder) = jar_workspace(ArborConfig::default(), vec![jar.clone()]);
    let owner = SessionOwner::new();

    assert_eq!(workspace.enter_archive_session(owner).unwrap(), 1);
    let first = workspace.open_archive(&jar, Some(owner)).unwrap();
    let second = workspace.open_archive(&jar, Some(owner)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.read("p/A.class").unwrap().as_deref(), Some(&b"a"[..]));

    assert_eq!(workspace.flush_archive_session(SessionOwner::new()).unwrap(), 0);
    assert_eq!(workspace.flush_archive_session(owner).unwrap(), 1);

    let third = workspace.open_archive(&jar, None).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
}

#[test]
fn shutdown_ends_only_the_workspace_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("lib.jar");
    write_jar(&jar, &[("p/A.class", "a")]);
    let (workspace, _builder) = jar_workspace(ArborConfig::default(), vec![jar.clone()]);
    let archives = workspace.archives();
    let (mine, theirs) = (SessionOwner::new(), SessionOwner::new());

    workspace.enter_archive_session(mine).unwrap();
    workspace.open_archive(&jar, Some(mine)).unwrap();
    archives.enter_session(theirs);
    archives.open(&jar, Some(theirs)).unwrap();

    workspace.shutdown().unwrap();
    assert_eq!(archives.session_depth(mine), 0);
    assert_eq!(archives.session_depth(theirs), 1);
    assert_eq!(archives.pooled(theirs), 1);

    assert!(matches!(
        workspace.enter_archive_session(SessionOwner::new()),
        Err(WorkspaceError::ShutDown)
    ));
    assert!(matches!(
        workspace.flush_archive_session(theirs),
        Err(WorkspaceError::ShutDown)
    ));
    assert!(matches!(
        workspace.archive_is_valid(&jar),
        Err(WorkspaceError::ShutDown)
    ));
    assert_eq!(archives.flush(theirs), 1);
}
