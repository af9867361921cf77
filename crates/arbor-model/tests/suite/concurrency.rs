use std::collections::HashMap;
use std::sync::Arc;

use arbor_core::{ElementKind, Handle};
use arbor_model::{ElementInfo, InfoCache, InfoCacheConfig, ModelConfig, ModelManager};

use super::support::{stamp, unit, TreeBuilder};

#[test]
fn concurrent_puts_close_every_evicted_entry_exactly_once() {
    const THREADS: usize = 8;
    const PUTS: usize = 250;

    let cache = Arc::new(InfoCache::new(InfoCacheConfig {
        container_slots: 4,
        source_slots: 16,
        member_slots: 32,
    }));

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let mut evicted = Vec::new();
                for i in 0..PUTS {
                    let unit = unit(&format!("T{t}_{i}"));
                    let member = unit.child(ElementKind::Method, "m");
                    evicted.extend(cache.put(unit, ElementInfo::new()).handles());
                    evicted.extend(cache.put(member, ElementInfo::new()).handles());
                }
                evicted
            })
        })
        .collect();

    let mut seen: HashMap<Handle, usize> = HashMap::new();
    for worker in workers {
        for handle in worker.join().unwrap() {
            *seen.entry(handle).or_default() += 1;
        }
    }

    assert!(seen.values().all(|count| *count == 1), "an entry was closed twice");
    let still_cached = cache.len();
    assert_eq!(seen.len() + still_cached, THREADS * PUTS * 2);
    assert!(cache.len_of(arbor_model::CacheTier::Source) <= 16);
    assert!(cache.len_of(arbor_model::CacheTier::Member) <= 32);
    assert_eq!(cache.stats().evictions as usize, seen.len());
}

#[test]
fn racing_opens_keep_the_first_committed_info() {
    const THREADS: usize = 4;

    let builder = Arc::new(TreeBuilder::with_source_barrier(THREADS));
    let a = unit("A");
    builder.add(&Handle::model(), &[a.clone()]);
    builder.add(&a, &[a.child(ElementKind::Field, "f")]);
    let model = Arc::new(ModelManager::new(ModelConfig::default(), builder.clone()));
    model.open(&Handle::model()).unwrap();

    let results: Vec<_> = (0..THREADS)
        .map(|_| {
            let model = Arc::clone(&model);
            let a = a.clone();
            std::thread::spawn(move || model.open(&a).unwrap())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .collect();

    assert_eq!(builder.calls_for(&a), THREADS);
    let cached = model.get_info(&a).unwrap();
    for info in &results {
        assert!(Arc::ptr_eq(info, &cached));
    }
    assert!(stamp(&cached).is_some());

    // Exactly one staged buffer won; the losers were closed.
    let buffers = builder.created_buffers();
    assert_eq!(buffers.len(), THREADS);
    let open: Vec<_> = buffers.iter().filter(|b| !b.is_closed()).collect();
    assert_eq!(open.len(), 1);
    assert!(Arc::ptr_eq(open[0], &model.buffers().get_buffer(&a).unwrap()));
}
