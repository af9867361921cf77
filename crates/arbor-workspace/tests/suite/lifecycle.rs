use std::path::PathBuf;

use arbor_classpath::{
    ClasspathContainer, ContainerPath, InitContext, ProjectName, ResolutionError,
};
use arbor_config::ArborConfig;
use arbor_core::{CancellationToken, ElementKind, Handle};
use arbor_workspace::WorkspaceError;
use pretty_assertions::assert_eq;

use super::support::{archive_root, jar_workspace, jre, project, write_jar, JreResolver, PROJECT};

fn persistent_config(dir: &std::path::Path) -> ArborConfig {
    let mut config = ArborConfig::default();
    config.classpath.state_dir = Some(dir.to_path_buf());
    config
}

/// Looks itself up while resolving and keeps whatever that lookup found.
fn refresh_from_previous(
    owner: &ProjectName,
    path: &ContainerPath,
    cx: &InitContext<'_, ProjectName, ContainerPath, ClasspathContainer>,
) -> Result<Option<ClasspathContainer>, ResolutionError> {
    assert!(cx.cache().get(owner, path).is_in_progress());
    Ok(cx
        .cache()
        .get_default_to_previous_session(owner, path)
        .map(|container| container.with_description("refreshed")))
}

fn gradle_home(
    _: &(),
    _: &String,
    _: &InitContext<'_, (), String, PathBuf>,
) -> Result<Option<PathBuf>, ResolutionError> {
    Ok(Some(PathBuf::from("/opt/gradle")))
}

#[test]
fn classpath_survives_a_restart() {
    let state = tempfile::tempdir().unwrap();
    let app = ProjectName::new(PROJECT);
    let resolver = JreResolver::default();

    let (first, _) = jar_workspace(persistent_config(state.path()), Vec::new());
    let resolved = first.resolve_container(&app, &jre(), &resolver).unwrap().unwrap();
    assert_eq!(
        first.resolve_variable("GRADLE_HOME", &gradle_home).unwrap(),
        Some(PathBuf::from("/opt/gradle"))
    );
    first.shutdown().unwrap();
    assert!(state
        .path()
        .join(arbor_classpath::SNAPSHOT_FILE_NAME)
        .is_file());

    let (second, _) = jar_workspace(persistent_config(state.path()), Vec::new());
    assert_eq!(
        second.containers().previous_session_value(&app, &jre()),
        Some(resolved.clone())
    );
    assert_eq!(
        second
            .variables()
            .previous_session_value(&(), &"GRADLE_HOME".to_owned()),
        Some(PathBuf::from("/opt/gradle"))
    );

    let refreshed = second
        .resolve_container(&app, &jre(), &refresh_from_previous)
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.entries, resolved.entries);
    assert_eq!(refreshed.description, "refreshed");
}

#[test]
fn nothing_is_saved_without_a_state_dir() {
    let (workspace, _) = jar_workspace(ArborConfig::default(), Vec::new());
    workspace
        .resolve_container(&ProjectName::new(PROJECT), &jre(), &JreResolver::default())
        .unwrap();
    assert!(!workspace.save_classpath_snapshot().unwrap());
}

#[test]
fn shutdown_is_idempotent_and_final() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("lib.jar");
    write_jar(&jar, &[("p/A.class", "a")]);
    let (workspace, _) = jar_workspace(ArborConfig::default(), vec![jar.clone()]);
    let class_file = archive_root(&jar)
        .child(ElementKind::Package, "p")
        .child(ElementKind::ClassFile, "A.class");
    workspace.open(&class_file).unwrap();

    let report = workspace.shutdown().unwrap();
    assert!(report.closed >= 4, "{report:?}");
    assert_eq!(report.buffers_closed, 1);
    assert!(workspace.is_shut_down());

    let again = workspace.shutdown().unwrap();
    assert_eq!(again.closed, 0);
    assert!(matches!(
        workspace.open(&class_file),
        Err(WorkspaceError::ShutDown)
    ));
    assert!(matches!(
        workspace.resolve_container(&ProjectName::new(PROJECT), &jre(), &JreResolver::default()),
        Err(WorkspaceError::ShutDown)
    ));
    for result in [
        workspace.find_type("p.A").map(|_| ()),
        workspace.find_type_fresh("p.A", &CancellationToken::new()).map(|_| ()),
        workspace.close(&class_file).map(|_| ()),
        workspace.remove_project(&ProjectName::new(PROJECT)).map(|_| ()),
    ] {
        assert!(matches!(result, Err(WorkspaceError::ShutDown)), "{result:?}");
    }
}

#[test]
fn removing_a_project_drops_its_elements_and_containers() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("lib.jar");
    write_jar(&jar, &[("p/A.class", "a")]);
    let (workspace, _) = jar_workspace(ArborConfig::default(), vec![jar.clone()]);
    let app = ProjectName::new(PROJECT);
    let class_file = archive_root(&jar)
        .child(ElementKind::Package, "p")
        .child(ElementKind::ClassFile, "A.class");
    workspace.open(&class_file).unwrap();
    workspace
        .resolve_container(&app, &jre(), &JreResolver::default())
        .unwrap();

    let report = workspace.remove_project(&app).unwrap();
    assert!(report.closed >= 3);
    assert!(!workspace.model().is_open(&project()));
    assert!(!workspace.model().is_open(&class_file));
    assert!(workspace.model().buffers().get_buffer(&class_file).is_none());
    assert!(workspace.containers().get(&app, &jre()).value().is_none());
}

#[test]
fn type_index_follows_rescans() {
    let (workspace, _) = jar_workspace(ArborConfig::default(), Vec::new());
    let cancel = CancellationToken::new();
    let type_in = |root: &str, name: &str| {
        project()
            .child(ElementKind::ArchiveRoot, root)
            .child(ElementKind::Package, "p")
            .child(ElementKind::ClassFile, format!("{name}.class"))
            .child(ElementKind::Type, name)
    };

    let snapshot = workspace
        .rescan_types(
            ["a.jar".to_owned(), "b.jar".to_owned()],
            &cancel,
            |root| {
                let name = if root == "a.jar" { "A" } else { "B" };
                vec![(format!("p.{name}"), type_in(root, name))]
            },
        )
        .unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(workspace.find_type("p.A").unwrap(), Some(type_in("a.jar", "A")));

    workspace
        .rescan_types(["b.jar".to_owned()], &cancel, |_| Vec::<(String, Handle)>::new())
        .unwrap();
    assert_eq!(workspace.find_type("p.B").unwrap(), None);
    assert_eq!(
        workspace.find_type_fresh("p.A", &cancel).unwrap(),
        Some(type_in("a.jar", "A"))
    );
}
