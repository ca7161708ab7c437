//! Integration tests for concurrent store access
//!
//! Operations on distinct ids proceed in parallel; operations on one id are serialized, and
//! memory and disk agree once the dust settles.

use crate::integration::test_utils::{widget, TestShelf, Widget};
use shelf::{EventKind, Format};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

/// Writers on distinct ids all land, each with exactly one create
#[test]
fn test_parallel_sets_on_distinct_ids() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();
    let threads = 8;
    let per_thread = 25;

    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|n| {
            let widgets = Arc::clone(&widgets);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let id = format!("t{}-{}", n, i);
                    widgets.set(&id, widget(&id, i as i64)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(widgets.len(), threads * per_thread);
    let files = std::fs::read_dir(t.store_dir("widgets")).unwrap().count();
    assert_eq!(files, threads * per_thread);

    let events = t.events.snapshot();
    assert_eq!(events.len(), threads * per_thread);
    assert!(events.iter().all(|e| e.kind == EventKind::Create));
    let unique: HashSet<_> = events.iter().map(|e| e.id.clone()).collect();
    assert_eq!(unique.len(), threads * per_thread);
}

/// Readers never observe a torn value while a writer keeps updating
#[test]
fn test_concurrent_readers_and_writer() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();
    widgets.set("hot", widget("gen-0", 0)).unwrap();

    let writer = {
        let widgets = Arc::clone(&widgets);
        thread::spawn(move || {
            for i in 1..=100 {
                widgets
                    .set("hot", widget(&format!("gen-{}", i), i))
                    .unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let widgets = Arc::clone(&widgets);
            thread::spawn(move || {
                for _ in 0..200 {
                    let w = widgets.get("hot").unwrap();
                    assert_eq!(w.name, format!("gen-{}", w.count));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(widgets.get("hot").unwrap(), widget("gen-100", 100));
}

/// Racing first writes to one id produce exactly one create
#[test]
fn test_racing_first_writes_create_once() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();
    let threads = 8;

    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|n| {
            let widgets = Arc::clone(&widgets);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                widgets.set("same", widget("racer", n as i64)).unwrap()
            })
        })
        .collect();
    let kinds: Vec<EventKind> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::Create).count(),
        1
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::Update).count(),
        threads - 1
    );
    assert_eq!(t.events.for_id("same").len(), threads);
}

/// Interleaved sets and deletes on shared ids leave memory and disk in agreement
#[test]
fn test_set_delete_stress_keeps_disk_consistent() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();
    let ids = ["a", "b", "c", "d"];

    let handles: Vec<_> = (0..6)
        .map(|n| {
            let widgets = Arc::clone(&widgets);
            thread::spawn(move || {
                for i in 0..60 {
                    let id = ids[(n + i) % ids.len()];
                    if (n + i) % 3 == 0 {
                        // Losing the race to another delete is expected.
                        let _ = widgets.delete(id);
                    } else {
                        widgets.set(id, widget(id, i as i64)).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for id in ids {
        let in_memory = widgets.get(id).ok();
        let path = t.store_dir("widgets").join(format!("{}.json", id));
        match in_memory {
            Some(value) => {
                let on_disk: Widget =
                    serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
                assert_eq!(on_disk, value, "{id} differs between memory and disk");
            }
            None => assert!(!path.exists(), "{id} deleted in memory but file remains"),
        }
    }

    let leftovers: Vec<_> = std::fs::read_dir(t.store_dir("widgets"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}
