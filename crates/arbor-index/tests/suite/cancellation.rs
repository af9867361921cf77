use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arbor_core::CancellationToken;
use arbor_index::{IndexCache, IndexError};

type TypeIndex = IndexCache<&'static str, &'static str, u32>;

#[test]
fn cancelled_wait_answers_from_the_stable_snapshot() {
    let index = TypeIndex::with_poll_interval(Duration::from_millis(5));
    let scan = index.begin_scan().unwrap();
    index.record(&scan, "U1", "p.A", 1).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(index.read_fresh(&"p.A", &cancel), None);
    assert!(index.is_scanning());

    index.end_scan(scan).unwrap();
    assert_eq!(index.read_fresh(&"p.A", &cancel), Some(1));
}

#[test]
fn waiting_reader_sees_the_finished_scan() {
    let index = Arc::new(TypeIndex::with_poll_interval(Duration::from_millis(5)));
    let scan = index.begin_scan().unwrap();

    let reader = {
        let index = Arc::clone(&index);
        thread::spawn(move || index.read_fresh(&"p.A", &CancellationToken::new()))
    };

    thread::sleep(Duration::from_millis(20));
    index.record(&scan, "U1", "p.A", 7).unwrap();
    index.end_scan(scan).unwrap();

    assert_eq!(reader.join().unwrap(), Some(7));
}

#[test]
fn wait_is_abandoned_when_cancelled_mid_scan() {
    let index = Arc::new(TypeIndex::with_poll_interval(Duration::from_millis(5)));
    let _scan = index.begin_scan().unwrap();
    let cancel = CancellationToken::new();

    let reader = {
        let index = Arc::clone(&index);
        let cancel = cancel.clone();
        thread::spawn(move || index.wait_for_scan(&cancel).len())
    };

    thread::sleep(Duration::from_millis(20));
    cancel.cancel();
    assert_eq!(reader.join().unwrap(), 0);
    assert!(index.is_scanning());
}

#[test]
fn cancelled_run_scan_leaves_the_stable_snapshot_alone() {
    let index = TypeIndex::new();
    let cancel = CancellationToken::new();
    index
        .run_scan(["U1"], &cancel, |_| vec![("p.A", 1)])
        .unwrap();

    let err = index
        .run_scan(["U1", "U2"], &cancel, |unit| {
            if *unit == "U1" {
                cancel.cancel();
            }
            vec![("p.Z", 9)]
        })
        .unwrap_err();

    assert_eq!(err, IndexError::Cancelled);
    assert!(!index.is_scanning());
    assert_eq!(index.read(&"p.A"), Some(1));
    assert_eq!(index.read(&"p.Z"), None);
}
