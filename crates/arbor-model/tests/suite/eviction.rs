use std::sync::Arc;

use arbor_core::{ElementKind, Handle};
use arbor_model::{CacheTier, ElementInfo, InfoCache, InfoCacheConfig, ModelConfig};
use pretty_assertions::assert_eq;

use super::support::{manager, unit, RecordingListener, TreeBuilder};

#[test]
fn one_put_over_capacity_evicts_exactly_the_oldest_entry() {
    let cache = InfoCache::new(InfoCacheConfig {
        source_slots: 3,
        ..InfoCacheConfig::default()
    });
    for name in ["a", "b", "c"] {
        assert!(cache.put(unit(name), ElementInfo::new()).is_empty());
    }

    let pending = cache.put(unit("d"), ElementInfo::new());
    assert_eq!(pending.handles(), vec![unit("a")]);
    assert_eq!(cache.len_of(CacheTier::Source), 3);
    assert!(!cache.contains(&unit("a")));
}

#[test]
fn evicting_a_container_closes_its_cached_subtree() {
    let cache = InfoCache::new(InfoCacheConfig {
        container_slots: 1,
        ..InfoCacheConfig::default()
    });
    let project = Handle::model().child(ElementKind::Project, "p");
    let unit = project.child(ElementKind::CompilationUnit, "A.java");
    let ty = unit.child(ElementKind::Type, "A");
    let _ = cache.put(project.clone(), ElementInfo::new().with_children([unit.clone()]));
    let _ = cache.put(unit.clone(), ElementInfo::new().with_children([ty.clone()]));
    let _ = cache.put(ty.clone(), ElementInfo::new());

    let other = Handle::model().child(ElementKind::Project, "q");
    let pending = cache.put(other.clone(), ElementInfo::new());

    assert_eq!(pending.len(), 3);
    assert!(pending.contains(&project) && pending.contains(&unit) && pending.contains(&ty));
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(&other));
}

#[test]
fn manager_closes_buffers_of_evicted_sources() {
    let builder = Arc::new(TreeBuilder::new());
    let names = ["A", "B", "C"];
    builder.add(
        &Handle::model(),
        &names.iter().map(|name| unit(name)).collect::<Vec<_>>(),
    );
    for name in names {
        builder.add(&unit(name), &[unit(name).child(ElementKind::Type, name)]);
    }
    let mut config = ModelConfig::default();
    config.info.source_slots = 2;
    let model = manager(builder, config);
    let listener = Arc::new(RecordingListener::default());
    model.add_close_listener(listener.clone());

    model.open(&unit("A")).unwrap();
    let a_buffer = model.buffers().get_buffer(&unit("A")).unwrap();
    model.open(&unit("B")).unwrap();
    model.open(&unit("C")).unwrap();

    assert_eq!(listener.closed(), vec![unit("A"), unit("A").child(ElementKind::Type, "A")]);
    assert!(a_buffer.is_closed());
    assert!(model.buffers().get_buffer(&unit("A")).is_none());
    assert_eq!(model.infos().stats().evictions, 2);

    // Evicted entries are recomputed on demand.
    model.open(&unit("A")).unwrap();
    assert!(model.is_open(&unit("A")));
    assert!(!model.is_open(&unit("B")));
}

#[test]
fn members_evicted_on_their_own_are_rebuilt_from_their_unit() {
    let builder = Arc::new(TreeBuilder::new());
    let a = unit("A");
    let members: Vec<Handle> = ["x", "y", "z"]
        .iter()
        .map(|name| a.child(ElementKind::Type, *name))
        .collect();
    builder.add(&Handle::model(), &[a.clone()]);
    builder.add(&a, &members);
    let mut config = ModelConfig::default();
    config.info.member_slots = 2;
    let model = manager(builder.clone(), config);

    model.open(&a).unwrap();
    let x = &members[0];
    assert!(model.is_open(&a));
    assert!(!model.is_open(x));

    let info = model.open(x).unwrap();
    assert!(info.children().is_empty());
    assert!(model.is_open(x));
    assert_eq!(builder.calls_for(&a), 2);
    assert_eq!(model.infos().len_of(CacheTier::Member), 2);

    // The refill did not replace the cached unit or its buffer.
    let buffer = model.buffers().get_buffer(&a).unwrap();
    model.open(x).unwrap();
    assert_eq!(builder.calls_for(&a), 2);
    model.open(&members[1]).unwrap();
    assert!(Arc::ptr_eq(&buffer, &model.buffers().get_buffer(&a).unwrap()));
    assert!(!buffer.is_closed());
}
