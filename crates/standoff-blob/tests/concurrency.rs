use standoff_blob::{BlobError, BlobStore, Bucket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const WRITERS: usize = 4;
const ROUNDS: usize = 25;

fn payload(writer: usize, round: usize) -> Vec<u8> {
    // Large enough that a torn write would be visible
    let marker = format!("{writer:02}-{round:03};");
    marker.repeat(2048).into_bytes()
}

fn is_whole(content: &[u8]) -> bool {
    let Some(first) = content.get(..7) else {
        return false;
    };
    content.len() == 7 * 2048 && content.chunks(7).all(|chunk| chunk == first)
}

#[test]
fn test_readers_never_see_partial_content() {
    let dir = tempfile::tempdir().unwrap();
    let store = BlobStore::open(dir.path(), Duration::from_secs(10)).unwrap();
    store.put("shared", payload(0, 0)).unwrap();
    let reads = AtomicUsize::new(0);

    thread::scope(|s| {
        for writer in 0..WRITERS {
            let store = &store;
            s.spawn(move || {
                for round in 0..ROUNDS {
                    store.replace("shared", payload(writer, round)).unwrap();
                }
            });
        }
        for _ in 0..WRITERS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    let content = store.get("shared").unwrap();
                    assert!(is_whole(&content));
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(reads.load(Ordering::Relaxed), WRITERS * ROUNDS);
    assert!(is_whole(&store.get("shared").unwrap()));
}

#[test]
fn test_concurrent_create_only_has_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let store = BlobStore::open(dir.path(), Duration::from_secs(10)).unwrap();
    let created = AtomicUsize::new(0);
    let conflicts = AtomicUsize::new(0);

    thread::scope(|s| {
        for writer in 0..8 {
            let (store, created, conflicts) = (&store, &created, &conflicts);
            s.spawn(move || match store.put("contested", payload(writer, 0)) {
                Ok(()) => {
                    created.fetch_add(1, Ordering::Relaxed);
                }
                Err(BlobError::AlreadyExists { .. }) => {
                    conflicts.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => panic!("unexpected error: {e}"),
            });
        }
    });

    assert_eq!(created.load(Ordering::Relaxed), 1);
    assert_eq!(conflicts.load(Ordering::Relaxed), 7);
}

#[test]
fn test_other_buckets_are_not_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let store = BlobStore::open(dir.path(), Duration::from_millis(50)).unwrap();
    let held = store.begin_put("foo", "x").unwrap();

    let other = (0..100)
        .map(|i| format!("doc{i}"))
        .find(|id| Bucket::of(id) != Bucket::of("foo"))
        .unwrap();

    thread::scope(|s| {
        let result = s.spawn(|| store.put(&other, "y")).join().unwrap();
        assert!(result.is_ok());
    });

    held.commit().unwrap();
    assert_eq!(store.get("foo").unwrap(), b"x");
    assert_eq!(store.get(&other).unwrap(), b"y");
}
