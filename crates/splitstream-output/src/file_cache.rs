//! Open-File Cache with LRU Eviction
//!
//! The receiver appends to one file per active dimension path, and busy
//! schemas produce far more distinct paths than an operating system allows
//! open file descriptors. This cache bounds the open set: when a handle for
//! a path that is not cached is inserted and the cache is full, the least
//! recently used handle is evicted and closed.
//!
//! Ownership rule: the cache owns every open handle, and removal from the
//! cache - by capacity eviction, by rotation, or by shutdown - is the sole
//! close site (dropping the `File` closes it). The current-file table never
//! holds a handle; an entry whose handle was evicted is simply reopened in
//! append mode on its next write.

use std::fs::File;
use std::num::NonZeroUsize;

use lru::LruCache;

pub struct OpenFileCache {
    cache: LruCache<String, File>,
    limit: usize,
}

impl OpenFileCache {
    /// Create a cache bounded at `limit` open files; 0 means unbounded.
    pub fn new(limit: usize) -> Self {
        let cache = match NonZeroUsize::new(limit) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self { cache, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Fetch the handle for `name`, opening it with `open` if absent. A
    /// capacity eviction triggered by the insert closes the evicted handle.
    pub fn get_or_open<F>(&mut self, name: &str, open: F) -> std::io::Result<&mut File>
    where
        F: FnOnce() -> std::io::Result<File>,
    {
        if !self.cache.contains(name) {
            let file = open()?;
            if let Some((evicted, _)) = self.cache.push(name.to_string(), file) {
                tracing::trace!(name = %evicted, "closed least recently used file");
            }
        }
        match self.cache.get_mut(name) {
            Some(file) => Ok(file),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "open file missing from cache",
            )),
        }
    }

    /// Remove and close the handle for `name`, if cached.
    pub fn remove(&mut self, name: &str) {
        self.cache.pop(name);
    }

    /// Close every cached handle.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn open_temp(dir: &std::path::Path, name: &str) -> std::io::Result<File> {
        File::create(dir.join(name))
    }

    #[test]
    fn test_opens_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = OpenFileCache::new(10);

        let mut opened = 0;
        for _ in 0..3 {
            cache
                .get_or_open("a", || {
                    opened += 1;
                    open_temp(dir.path(), "a")
                })
                .unwrap();
        }
        assert_eq!(opened, 1, "subsequent lookups hit the cache");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_bounds_open_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = OpenFileCache::new(2);

        for name in ["a", "b", "c", "d"] {
            cache
                .get_or_open(name, || open_temp(dir.path(), name))
                .unwrap();
            assert!(cache.len() <= 2);
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_order_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = OpenFileCache::new(2);

        cache.get_or_open("a", || open_temp(dir.path(), "a")).unwrap();
        cache.get_or_open("b", || open_temp(dir.path(), "b")).unwrap();
        // Touch "a" so "b" becomes least recently used.
        cache.get_or_open("a", || open_temp(dir.path(), "a")).unwrap();

        let mut reopened_b = false;
        cache.get_or_open("c", || open_temp(dir.path(), "c")).unwrap();
        cache
            .get_or_open("b", || {
                reopened_b = true;
                open_temp(dir.path(), "b")
            })
            .unwrap();
        assert!(reopened_b, "b was evicted when c was inserted");
    }

    #[test]
    fn test_zero_is_unbounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = OpenFileCache::new(0);

        for i in 0..100 {
            let name = format!("f{}", i);
            let n = name.clone();
            cache
                .get_or_open(&name, || open_temp(dir.path(), &n))
                .unwrap();
        }
        assert_eq!(cache.len(), 100);
        assert_eq!(cache.limit(), 0);
    }

    #[test]
    fn test_remove_closes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = OpenFileCache::new(4);
        cache.get_or_open("a", || open_temp(dir.path(), "a")).unwrap();
        cache.remove("a");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_open_failure_propagates() {
        let mut cache = OpenFileCache::new(4);
        let result = cache.get_or_open("missing", || {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"))
        });
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_writes_go_to_cached_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = OpenFileCache::new(4);
        let file = cache.get_or_open("w", || open_temp(dir.path(), "w")).unwrap();
        file.write_all(b"hello").unwrap();
        drop(cache);
        assert_eq!(std::fs::read(dir.path().join("w")).unwrap(), b"hello");
    }
}
