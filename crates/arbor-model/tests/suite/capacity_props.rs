use std::sync::Arc;

use arbor_core::ElementKind;
use arbor_model::{BufferCache, CacheTier, ElementInfo, InfoCache, InfoCacheConfig, TextBuffer};
use proptest::prelude::*;

use super::support::unit;

const PROPTEST_CASES: u32 = 128;

#[derive(Debug, Clone)]
enum Op {
    PutUnit(u8),
    PutMember(u8, u8),
    Get(u8),
    Remove(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..12).prop_map(Op::PutUnit),
        4 => ((0u8..12), (0u8..4)).prop_map(|(u, m)| Op::PutMember(u, m)),
        2 => (0u8..12).prop_map(Op::Get),
        1 => (0u8..12).prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: PROPTEST_CASES, .. ProptestConfig::default() })]

    #[test]
    fn info_cache_never_exceeds_capacity(
        ops in prop::collection::vec(arb_op(), 1..80),
        sources in 1usize..5,
        members in 1usize..8,
    ) {
        let config = InfoCacheConfig { container_slots: 2, source_slots: sources, member_slots: members };
        let cache = InfoCache::new(config);
        for op in ops {
            let removed = match op {
                Op::PutUnit(u) => {
                    let handle = unit(&format!("U{u}"));
                    let children = (0..4).map(|m| handle.child(ElementKind::Method, format!("m{m}")));
                    cache.put(handle.clone(), ElementInfo::new().with_children(children))
                }
                Op::PutMember(u, m) => {
                    let handle = unit(&format!("U{u}")).child(ElementKind::Method, format!("m{m}"));
                    cache.put(handle, ElementInfo::new())
                }
                Op::Get(u) => {
                    let _ = cache.get(&unit(&format!("U{u}")));
                    continue;
                }
                Op::Remove(u) => cache.remove(&unit(&format!("U{u}"))),
            };
            for evicted in removed.iter() {
                prop_assert!(!cache.contains(&evicted.handle));
            }
            prop_assert!(cache.len_of(CacheTier::Source) <= sources);
            prop_assert!(cache.len_of(CacheTier::Member) <= members);
            prop_assert!(cache.len() <= config.total_capacity());
        }
    }

    #[test]
    fn buffer_cache_never_exceeds_capacity(
        names in prop::collection::vec((0u8..10, any::<bool>()), 1..60),
        capacity in 1usize..5,
    ) {
        let cache = BufferCache::new(capacity);
        for (name, dirty) in names {
            let buffer = Arc::new(TextBuffer::new(unit(&format!("B{name}")), ""));
            if dirty {
                buffer.set_contents("edited");
            }
            let closed = cache.add_buffer(Arc::clone(&buffer));
            prop_assert!(!closed.contains(buffer.owner()) || cache.get_buffer(buffer.owner()).is_some());
            prop_assert!(cache.len() <= capacity);
            prop_assert!(!buffer.is_closed());
        }
    }
}
