//! Integration tests for store CRUD through the engine

use crate::integration::test_utils::{config, widget, EventLog, Group, Person, TestShelf, Widget};
use shelf::{EventKind, Format, Shelf, StoreError};
use std::fs;
use tempfile::TempDir;

/// The widgets walkthrough: create, update, list, read back, delete
#[test]
fn test_widget_lifecycle() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();

    assert_eq!(widgets.set("w1", widget("bolt", 5)).unwrap(), EventKind::Create);
    let path = t.store_dir("widgets").join("w1.json");
    assert!(path.exists());
    let on_disk: Widget = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk, widget("bolt", 5));

    assert_eq!(widgets.set("w1", widget("bolt", 6)).unwrap(), EventKind::Update);
    assert_eq!(widgets.ids(), vec!["w1".to_string()]);
    assert_eq!(widgets.get("w1").unwrap().count, 6);

    widgets.delete("w1").unwrap();
    assert!(!path.exists());
    assert!(matches!(
        widgets.get("w1"),
        Err(StoreError::EntryNotFound { .. })
    ));

    let events: Vec<EventKind> = t.events.snapshot().iter().map(|e| e.kind).collect();
    assert_eq!(
        events,
        vec![EventKind::Create, EventKind::Update, EventKind::Delete]
    );
}

/// A generated id is usable as a file name and appears in the listing
#[test]
fn test_new_entry_generates_id() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();

    let id = widgets.new_entry(widget("nut", 1)).unwrap();
    assert!(!id.is_empty());
    assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    assert!(widgets.ids().contains(&id));
    assert!(t.store_dir("widgets").join(format!("{}.json", id)).exists());
    assert_eq!(t.events.for_id(&id), vec![EventKind::Create]);
}

/// get_all on an empty store is an error, not an empty map
#[test]
fn test_get_all_empty_store() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();
    assert!(matches!(widgets.get_all(), Err(StoreError::EmptyStore(_))));

    widgets.set("a", widget("a", 1)).unwrap();
    widgets.set("b", widget("b", 2)).unwrap();
    let all = widgets.get_all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["b"], widget("b", 2));
}

/// Ids that would escape the store directory never reach the filesystem
#[test]
fn test_invalid_ids_rejected() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();

    for id in ["", "../escape", "a/b", "a.b", "with space"] {
        assert!(
            matches!(
                widgets.set(id, widget("x", 0)),
                Err(StoreError::InvalidId(_))
            ),
            "{id:?} should be rejected"
        );
    }
    assert!(fs::read_dir(t.store_dir("widgets")).unwrap().next().is_none());
    assert!(t.events.snapshot().is_empty());
}

/// Deleting an id that was never stored reports EntryNotFound
#[test]
fn test_delete_missing_entry() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();
    assert!(matches!(
        widgets.delete("ghost"),
        Err(StoreError::EntryNotFound { .. })
    ));
}

/// Purge empties memory and disk
#[test]
fn test_purge_clears_store() {
    let t = TestShelf::start(Format::Json, false);
    let widgets = t.shelf.store::<Widget>("widgets").unwrap();
    for i in 0..5 {
        widgets.set(&format!("w{}", i), widget("w", i)).unwrap();
    }

    assert_eq!(widgets.purge().unwrap(), 5);
    assert!(widgets.is_empty());
    assert!(fs::read_dir(t.store_dir("widgets")).unwrap().next().is_none());
}

/// Values persist across engine instances
#[test]
fn test_reload_in_fresh_engine() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("storage");
    let group = Group {
        name: "ops".to_string(),
        members: vec![Person {
            name: "Ann".to_string(),
            age: 41,
        }],
    };

    {
        let shelf = Shelf::new(config(&root, Format::Json, false)).unwrap();
        let groups = shelf.register::<Group>("groups").unwrap();
        shelf.run().unwrap();
        groups.set("ops", group.clone()).unwrap();
    }

    let shelf = Shelf::new(config(&root, Format::Json, false)).unwrap();
    let groups = shelf.register::<Group>("groups").unwrap();
    let events = EventLog::default();
    events.attach(&shelf);
    shelf.run().unwrap();

    assert_eq!(groups.get("ops").unwrap(), group);
    assert_eq!(events.for_id("ops"), vec![EventKind::Create]);
}

/// Corrupt files are skipped at startup; the rest still load
#[test]
fn test_startup_skips_corrupt_files() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("storage");
    let dir = root.join("widgets");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("good.json"), r#"{"name":"bolt","count":1}"#).unwrap();
    fs::write(dir.join("bad.json"), "{ not json").unwrap();
    fs::write(dir.join("notes.txt"), "ignored").unwrap();

    let shelf = Shelf::new(config(&root, Format::Json, false)).unwrap();
    let widgets = shelf.register::<Widget>("widgets").unwrap();
    shelf.run().unwrap();

    assert_eq!(widgets.ids(), vec!["good".to_string()]);
}

/// Two stores with different shapes live side by side
#[test]
fn test_multiple_stores_are_independent() {
    let temp_dir = TempDir::new().unwrap();
    let shelf = Shelf::new(config(&temp_dir.path().join("storage"), Format::Json, false)).unwrap();
    shelf.register::<Widget>("widgets").unwrap();
    shelf.register::<Person>("people").unwrap();
    shelf.run().unwrap();

    let widgets = shelf.store::<Widget>("widgets").unwrap();
    let people = shelf.store::<Person>("people").unwrap();
    widgets.set("x", widget("bolt", 1)).unwrap();
    people
        .set(
            "x",
            Person {
                name: "Bo".to_string(),
                age: 9,
            },
        )
        .unwrap();

    assert_eq!(widgets.get("x").unwrap().name, "bolt");
    assert_eq!(people.get("x").unwrap().name, "Bo");
    assert!(matches!(
        shelf.store::<Person>("widgets"),
        Err(StoreError::ShapeMismatch { .. })
    ));
}
