use resource_cache_index::{CacheIndexHolder, CacheKey, CompactionPolicy};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

const WRITERS: usize = 4;
const ENTRIES_PER_WRITER: usize = 25;

fn key(writer: usize, n: usize) -> CacheKey {
    CacheKey::parse(&format!("https://host{}.example/{}.jar", writer, n), None).unwrap()
}

#[test]
fn test_independent_holders_share_one_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recently_used");
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Each thread has its own holder, so they only meet at the file lock
                let holder = CacheIndexHolder::open(&path)
                    .unwrap()
                    .with_policy(CompactionPolicy::disabled());
                barrier.wait();
                for n in 0..ENTRIES_PER_WRITER {
                    let id = format!("{}/{}", writer, n);
                    let timestamp = (n * WRITERS + writer) as i64;
                    holder
                        .run_synchronized(|session| session.create_entry(key(writer, n), &id, timestamp))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let holder = CacheIndexHolder::open(&path).unwrap();
    let (len, lines) = holder
        .run_synchronized(|session| Ok((session.len()?, session.log_line_count())))
        .unwrap();
    assert_eq!(len, WRITERS * ENTRIES_PER_WRITER);
    assert_eq!(lines, WRITERS * ENTRIES_PER_WRITER);

    for writer in 0..WRITERS {
        for n in 0..ENTRIES_PER_WRITER {
            let entry = holder
                .get_synchronized(|index| index.find_by_key(&key(writer, n)).cloned())
                .unwrap()
                .unwrap();
            assert_eq!(entry.id(), format!("{}/{}", writer, n));
        }
    }
}

#[test]
fn test_compaction_by_one_holder_is_seen_by_another() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recently_used");
    let first = CacheIndexHolder::open(&path)
        .unwrap()
        .with_policy(CompactionPolicy::disabled());
    let second = CacheIndexHolder::open(&path)
        .unwrap()
        .with_policy(CompactionPolicy::disabled());

    first
        .run_synchronized(|session| {
            session.create_entry(key(0, 0), "0/0", 1)?;
            session.create_entry(key(0, 1), "0/1", 2)
        })
        .unwrap();
    for timestamp in 3..10 {
        second
            .run_synchronized(|session| session.mark_accessed("0/0", timestamp))
            .unwrap();
    }
    first
        .run_synchronized(|session| {
            session.request_compaction();
            Ok(())
        })
        .unwrap();

    let (entries, lines) = second
        .run_synchronized(|session| Ok((session.all_entries()?, session.log_line_count())))
        .unwrap();
    assert_eq!(lines, 2);
    let ids: Vec<_> = entries.iter().map(|e| e.id()).collect();
    assert_eq!(ids, vec!["0/0", "0/1"]);
    assert_eq!(entries[0].last_accessed(), 9);
}
