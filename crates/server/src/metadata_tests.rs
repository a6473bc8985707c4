// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn meta(id: &str) -> SessionMeta {
    SessionMeta {
        id: id.to_owned(),
        name: None,
        working_dir: Some("/work".to_owned()),
        created_at_ms: 1_700_000_000_000,
    }
}

#[test]
fn missing_file_is_an_empty_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::new(dir.path());
    assert!(store.load_all().is_empty());
}

#[test]
fn upsert_then_load_roundtrips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::new(dir.path());
    store.upsert(meta("s1")).expect("write");
    store.upsert(meta("s2")).expect("write");

    let records = store.load_all();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], meta("s1"));

    // Upsert replaces by id.
    let renamed = SessionMeta { name: Some("main".to_owned()), ..meta("s1") };
    store.upsert(renamed.clone()).expect("write");
    let records = store.load_all();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], renamed);
}

#[test]
fn remove_deletes_only_the_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::new(dir.path());
    store.upsert(meta("s1")).expect("write");
    store.upsert(meta("s2")).expect("write");
    store.remove("s1").expect("remove");
    let records = store.load_all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "s2");

    store.remove("ghost").expect("unknown id is a no-op");
}

#[test]
fn writes_are_atomic_no_temp_left_behind() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::new(dir.path());
    store.upsert(meta("s1")).expect("write");
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["sessions.json".to_owned()]);
}

#[test]
fn corrupt_file_is_ignored_not_destroyed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::new(dir.path());
    std::fs::write(store.path(), b"{ not json").expect("write corrupt");
    assert!(store.load_all().is_empty());
    assert!(store.path().exists(), "corrupt file left in place");
}

#[test]
fn oversized_file_backed_up_and_reset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::new(dir.path());
    let blob = vec![b'x'; (MAX_FILE_BYTES + 1) as usize];
    std::fs::write(store.path(), &blob).expect("write oversized");

    assert!(store.load_all().is_empty());
    assert!(!store.path().exists(), "oversized file moved aside");
    assert!(dir.path().join("sessions.json.bak").exists());

    // The store keeps working afterwards.
    store.upsert(meta("s1")).expect("write");
    assert_eq!(store.load_all().len(), 1);
}
