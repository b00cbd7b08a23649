//! Concurrency tests for the shared disk cache.
//!
//! The cache serializes every operation under one lock; these tests hammer
//! it from many threads and assert that entries never tear and that all
//! handles observe the same shared state.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::thread;

use netfetch::{CacheMetadata, DiskCache};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tempfile::TempDir;
use url::Url;

fn entry_url(i: usize) -> Url {
    Url::parse(&format!("https://example.com/entry/{i}")).unwrap()
}

/// A recognizable body for entry `i`: the index repeated many times, so a
/// torn or interleaved write would be detectable.
fn entry_body(i: usize, generation: usize) -> Vec<u8> {
    format!("entry-{i}-generation-{generation};")
        .into_bytes()
        .repeat(200)
}

fn insert(cache: &DiskCache, url: &Url, body: &[u8]) {
    let meta = CacheMetadata::new(url, StatusCode::OK, &HeaderMap::new());
    let mut writer = cache.begin_insert(meta).unwrap();
    // Write in small chunks to widen the race window.
    for chunk in body.chunks(64) {
        writer.write(chunk).unwrap();
    }
    cache.insert_complete(writer).unwrap();
}

#[test]
fn test_concurrent_inserts_from_many_threads() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path()).unwrap();
    let threads = 8;

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let cache = cache.clone();
            thread::spawn(move || {
                insert(&cache, &entry_url(i), &entry_body(i, 0));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..threads {
        let body = cache.fetch(&entry_url(i)).unwrap().unwrap();
        assert_eq!(body, entry_body(i, 0), "entry {i} must be intact");
    }
    assert!(cache.size() > 0);
}

#[test]
fn test_contended_overwrites_never_tear() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path()).unwrap();
    let url = entry_url(0);
    insert(&cache, &url, &entry_body(0, 0));

    let writers: Vec<_> = (1..=4)
        .map(|generation| {
            let cache = cache.clone();
            let url = url.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    insert(&cache, &url, &entry_body(0, generation));
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let url = url.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    if let Some(body) = cache.fetch(&url).unwrap() {
                        // Any observed body must be one complete generation,
                        // never a mixture.
                        let valid = (0..=4).any(|generation| body == entry_body(0, generation));
                        assert!(valid, "read a torn cache entry of {} bytes", body.len());
                    }
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
}

#[test]
fn test_mixed_operations_under_contention() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path()).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|worker: usize| {
            let cache = cache.clone();
            thread::spawn(move || {
                for round in 0..20 {
                    let i = (worker + round) % 4;
                    let url = entry_url(i);
                    match round % 4 {
                        0 => insert(&cache, &url, &entry_body(i, worker)),
                        1 => {
                            let _ = cache.fetch(&url).unwrap();
                        }
                        2 => {
                            if let Some(meta) = cache.metadata(&url).unwrap() {
                                let _ = cache.update_metadata(&meta).unwrap();
                            }
                        }
                        _ => {
                            let _ = cache.remove(&url).unwrap();
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // The store must still be internally consistent: every surviving entry
    // readable, and clear() leaves nothing behind.
    for i in 0..4 {
        let _ = cache.fetch(&entry_url(i)).unwrap();
    }
    cache.clear().unwrap();
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_all_handles_observe_shared_size() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path()).unwrap();
    let clones: Vec<_> = (0..4).map(|_| cache.clone()).collect();

    insert(&cache, &entry_url(0), &entry_body(0, 0));

    let size = cache.size();
    assert!(size > 0);
    for clone in &clones {
        assert_eq!(clone.size(), size, "every handle shares one store");
    }

    // Removal through one handle is visible through all of them.
    let remover = {
        let cache = clones[0].clone();
        thread::spawn(move || cache.remove(&entry_url(0)).unwrap())
    };
    assert!(remover.join().unwrap());
    for clone in &clones {
        assert_eq!(clone.size(), 0);
        assert!(clone.fetch(&entry_url(0)).unwrap().is_none());
    }
}

#[test]
fn test_concurrent_opens_share_directory_contents() {
    let dir = TempDir::new().unwrap();
    let path = Arc::new(dir.path().to_path_buf());

    // Many threads opening the same directory each get a working handle
    // over the same on-disk entries.
    let writer = DiskCache::open(path.as_path()).unwrap();
    insert(&writer, &entry_url(7), &entry_body(7, 0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = Arc::clone(&path);
            thread::spawn(move || {
                let cache = DiskCache::open(path.as_path()).unwrap();
                cache.fetch(&entry_url(7)).unwrap().unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), entry_body(7, 0));
    }
}
