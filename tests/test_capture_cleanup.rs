//! Capture-store lifecycle: TTL cleanup, dedup, crash-ordering invariants.

mod common;

use surf::netlog::{BodyKind, NetworkEntry, NetworkFilter, NetworkStore};

fn store() -> (tempfile::TempDir, NetworkStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = NetworkStore::open(dir.path()).unwrap();
    (dir, store)
}

/// Append an entry at `ts` with a unique body of `size` bytes.
fn seed(store: &NetworkStore, ts: i64, tag: &str, size: usize) -> NetworkEntry {
    let mut body = format!("body-{tag}-").into_bytes();
    body.resize(size, b'x');
    let hash = store.store_body(BodyKind::Response, &body).unwrap();
    let mut entry = NetworkEntry::at(ts, format!("https://seed.test/{tag}"), "GET", 200);
    entry.response_body_hash = Some(hash);
    store.append(&entry).unwrap();
    entry
}

#[test]
fn ttl_cleanup_over_a_thousand_entries() {
    let (_dir, store) = store();
    let now = chrono::Utc::now().timestamp_millis();
    let stale = now - 25 * 60 * 60 * 1000;

    for i in 0..1000 {
        seed(&store, stale, &format!("old-{i}"), 1024);
    }
    for i in 0..10 {
        seed(&store, now, &format!("fresh-{i}"), 1024);
    }

    let report = store.cleanup().unwrap();
    assert_eq!(report.removed_entries, 1000);
    assert_eq!(report.surviving_entries, 10);

    let left = store.query(&NetworkFilter::new()).unwrap();
    assert_eq!(left.len(), 10);
    assert!(left.iter().all(|e| e.url.contains("fresh")));

    let body_files = std::fs::read_dir(store.base().join("bodies")).unwrap().count();
    assert_eq!(body_files, 10);

    let last = store.last_cleanup().expect("meta stamped");
    assert!((chrono::Utc::now().timestamp_millis() - last).abs() < 1_000);
}

#[test]
fn cleanup_is_idempotent() {
    let (_dir, store) = store();
    let now = chrono::Utc::now().timestamp_millis();
    for i in 0..5 {
        seed(&store, now, &format!("e{i}"), 256);
    }

    store.cleanup().unwrap();
    let second = store.cleanup().unwrap();
    assert_eq!(second.removed_entries, 0);
    assert_eq!(second.removed_bodies, 0);
    assert_eq!(second.surviving_entries, 5);
}

#[test]
fn byte_identical_bodies_share_one_file() {
    let (_dir, store) = store();

    let h1 = store.store_body(BodyKind::Response, b"identical payload").unwrap();
    let h2 = store.store_body(BodyKind::Response, b"identical payload").unwrap();
    assert_eq!(h1, h2);

    let mut a = NetworkEntry::new("https://a.test/x", "GET", 200);
    a.response_body_hash = Some(h1.clone());
    let mut b = NetworkEntry::new("https://b.test/y", "GET", 200);
    b.response_body_hash = Some(h2);
    store.append(&a).unwrap();
    store.append(&b).unwrap();

    assert_eq!(std::fs::read_dir(store.base().join("bodies")).unwrap().count(), 1);
    // Both entries resolve the same content.
    assert_eq!(
        store.read_body(&h1, BodyKind::Response).unwrap(),
        b"identical payload"
    );
}

#[test]
fn no_orphan_bodies_after_cleanup() {
    let (_dir, store) = store();
    let now = chrono::Utc::now().timestamp_millis();
    let stale = now - 48 * 60 * 60 * 1000;

    seed(&store, stale, "doomed", 512);
    let kept = seed(&store, now, "kept", 512);

    store.cleanup().unwrap();

    // Every remaining body file is referenced by a surviving entry.
    let survivors = store.query(&NetworkFilter::new()).unwrap();
    let mut referenced = std::collections::HashSet::new();
    for entry in &survivors {
        if let Some(hash) = &entry.response_body_hash {
            referenced.insert(format!("{hash}.res"));
        }
    }
    for dirent in std::fs::read_dir(store.base().join("bodies")).unwrap() {
        let name = dirent.unwrap().file_name().to_string_lossy().into_owned();
        assert!(referenced.contains(&name), "orphan body file {name}");
    }
    // And the kept entry's body still reads back.
    let hash = kept.response_body_hash.as_deref().unwrap();
    assert!(store.read_body(hash, BodyKind::Response).is_ok());
}

#[test]
fn entry_count_decreases_monotonically_under_size_cap() {
    let (_dir, store) = store();
    let now = chrono::Utc::now().timestamp_millis();
    for i in 0..20 {
        seed(&store, now - (20 - i), &format!("s{i}"), 2048);
    }

    let before = store.query(&NetworkFilter::new()).unwrap().len();
    store
        .cleanup_with(std::time::Duration::from_secs(24 * 3600), 8 * 1024)
        .unwrap();
    let after = store.query(&NetworkFilter::new()).unwrap().len();
    assert!(after < before);

    // A second pass with the same cap removes nothing further.
    store
        .cleanup_with(std::time::Duration::from_secs(24 * 3600), 8 * 1024)
        .unwrap();
    assert_eq!(store.query(&NetworkFilter::new()).unwrap().len(), after);
}
