//! Schema-Pruned Listing Iterator
//!
//! Walks the hierarchical key namespace under a prefix, descending only
//! into directory layers whose segment is acceptable to the dimension
//! schema at that depth. Once the walk is past every dimension, leaf
//! objects are emitted as `(key, size)` pairs.
//!
//! ## How the walk works
//!
//! An explicit stack of `(prefix, level, marker)` frames drives the
//! iteration; each loop turn pops one frame and issues one page request:
//!
//! - a truncated page pushes a continuation frame carrying the marker
//! - at dimension depth, each allowed common-prefix pushes a child frame
//! - past dimension depth, leaf objects are emitted
//!
//! Children are pushed on top of the continuation, so the traversal stays
//! depth-first. The output channel closes exactly when the stack empties.
//!
//! Listing errors are emitted in-band as `Err` items and the walk carries
//! on, surfacing as many results as possible.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path;
use object_store::ObjectStore;
use tokio::sync::mpsc;

use splitstream_core::Schema;

use crate::error::{Error, Result};

/// Maximum number of listing results fetched at once.
pub const LIST_BATCH_SIZE: usize = 1000;

/// One leaf object found by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// One page of listing results at a single hierarchy level.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectEntry>,
    /// Sub-prefixes directly below the request prefix, each ending in `/`.
    pub common_prefixes: Vec<String>,
    /// Whether more results remain past `next_marker`.
    pub truncated: bool,
    pub next_marker: Option<String>,
}

/// One delimiter-grouped page of results under a prefix.
///
/// The production implementation is [`StoreLister`]; tests drive the walk
/// with hand-built pages to exercise truncation and error handling.
#[async_trait]
pub trait PagedLister: Send + Sync {
    async fn page(&self, prefix: &str, marker: Option<&str>, batch: usize) -> Result<ListPage>;
}

/// `PagedLister` over an object store's delimiter listing. The store API
/// paginates internally, so a page is never truncated.
pub struct StoreLister {
    store: Arc<dyn ObjectStore>,
}

impl StoreLister {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PagedLister for StoreLister {
    async fn page(&self, prefix: &str, _marker: Option<&str>, _batch: usize) -> Result<ListPage> {
        let trimmed = prefix.trim_end_matches('/');
        let path = if trimmed.is_empty() {
            None
        } else {
            Some(Path::from(trimmed))
        };
        let result = self.store.list_with_delimiter(path.as_ref()).await?;
        Ok(ListPage {
            objects: result
                .objects
                .into_iter()
                .map(|meta| ObjectEntry {
                    key: meta.location.to_string(),
                    size: meta.size as u64,
                })
                .collect(),
            common_prefixes: result
                .common_prefixes
                .into_iter()
                .map(|p| format!("{}/", p))
                .collect(),
            truncated: false,
            next_marker: None,
        })
    }
}

#[derive(Debug, Clone)]
struct WalkFrame {
    prefix: String,
    level: usize,
    marker: Option<String>,
}

/// Start the walk. Results arrive on the returned channel; the channel
/// closes when the walk is complete.
pub fn iterate(
    lister: Arc<dyn PagedLister>,
    prefix: String,
    schema: Schema,
) -> mpsc::Receiver<Result<ObjectEntry>> {
    let (tx, rx) = mpsc::channel(LIST_BATCH_SIZE);
    tokio::spawn(walk(lister, prefix, schema, tx));
    rx
}

async fn walk(
    lister: Arc<dyn PagedLister>,
    prefix: String,
    schema: Schema,
    tx: mpsc::Sender<Result<ObjectEntry>>,
) {
    let mut stack = vec![WalkFrame {
        prefix,
        level: 0,
        marker: None,
    }];

    while let Some(frame) = stack.pop() {
        let page = match lister
            .page(&frame.prefix, frame.marker.as_deref(), LIST_BATCH_SIZE)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                if tx.send(Err(e)).await.is_err() {
                    return;
                }
                continue;
            }
        };

        // The continuation goes under the children so the walk finishes a
        // subtree before resuming this level.
        if page.truncated {
            if let Some(marker) = page.next_marker {
                stack.push(WalkFrame {
                    prefix: frame.prefix.clone(),
                    level: frame.level,
                    marker: Some(marker),
                });
            }
        }

        if frame.level >= schema.fields().len() {
            // Past the dimensions: entries are key names now.
            for entry in page.objects {
                if tx.send(Ok(entry)).await.is_err() {
                    return;
                }
            }
        } else {
            for sub in page.common_prefixes.iter().rev() {
                let segment = match strip_segment(sub, &frame.prefix) {
                    Some(segment) => segment,
                    None => continue,
                };
                if schema.is_allowed_at(frame.level, segment) {
                    stack.push(WalkFrame {
                        prefix: sub.clone(),
                        level: frame.level + 1,
                        marker: None,
                    });
                }
            }
        }
    }
    // Dropping tx closes the channel: the stack is empty, the walk is done.
}

/// `"foo/bar/" - "foo/"` is `"bar"`: the last piece of a common prefix,
/// checked as a dimension value.
fn strip_segment<'a>(sub: &'a str, prefix: &str) -> Option<&'a str> {
    sub.strip_prefix(prefix)?.strip_suffix('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Pages keyed by (prefix, marker).
    struct MockLister {
        pages: HashMap<(String, Option<String>), ListPage>,
        fail_prefixes: Vec<String>,
    }

    impl MockLister {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                fail_prefixes: Vec::new(),
            }
        }

        fn page_at(
            mut self,
            prefix: &str,
            marker: Option<&str>,
            objects: &[(&str, u64)],
            prefixes: &[&str],
            next_marker: Option<&str>,
        ) -> Self {
            self.pages.insert(
                (prefix.to_string(), marker.map(|m| m.to_string())),
                ListPage {
                    objects: objects
                        .iter()
                        .map(|(k, s)| ObjectEntry {
                            key: k.to_string(),
                            size: *s,
                        })
                        .collect(),
                    common_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
                    truncated: next_marker.is_some(),
                    next_marker: next_marker.map(|m| m.to_string()),
                },
            );
            self
        }

        fn failing_at(mut self, prefix: &str) -> Self {
            self.fail_prefixes.push(prefix.to_string());
            self
        }
    }

    #[async_trait]
    impl PagedLister for MockLister {
        async fn page(
            &self,
            prefix: &str,
            marker: Option<&str>,
            _batch: usize,
        ) -> Result<ListPage> {
            if self.fail_prefixes.iter().any(|p| p == prefix) {
                return Err(Error::Config {
                    param: "mock",
                    reason: format!("injected listing failure at '{}'", prefix),
                });
            }
            Ok(self
                .pages
                .get(&(prefix.to_string(), marker.map(|m| m.to_string())))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn two_level_schema() -> Schema {
        Schema::from_slice(
            br#"{"dimensions": [
                { "field_name": "appName", "allowed_values": ["Firefox"] },
                { "field_name": "channel", "allowed_values": "*" }
            ]}"#,
        )
        .unwrap()
    }

    async fn collect(
        lister: MockLister,
        prefix: &str,
        schema: Schema,
    ) -> (Vec<ObjectEntry>, usize) {
        let mut rx = iterate(Arc::new(lister), prefix.to_string(), schema);
        let mut entries = Vec::new();
        let mut errors = 0;
        while let Some(item) = rx.recv().await {
            match item {
                Ok(entry) => entries.push(entry),
                Err(_) => errors += 1,
            }
        }
        (entries, errors)
    }

    #[tokio::test]
    async fn test_prunes_disallowed_prefixes() {
        let lister = MockLister::new()
            .page_at(
                "data/",
                None,
                &[],
                &["data/Firefox/", "data/SeaMonkey/"],
                None,
            )
            .page_at("data/Firefox/", None, &[], &["data/Firefox/nightly/"], None)
            .page_at(
                "data/Firefox/nightly/",
                None,
                &[("data/Firefox/nightly/file1", 10)],
                &[],
                None,
            )
            // Never listed: the walk must not descend here.
            .failing_at("data/SeaMonkey/");

        let (entries, errors) = collect(lister, "data/", two_level_schema()).await;
        assert_eq!(errors, 0);
        assert_eq!(
            entries,
            vec![ObjectEntry {
                key: "data/Firefox/nightly/file1".to_string(),
                size: 10
            }]
        );
    }

    #[tokio::test]
    async fn test_leaves_below_dimensions_are_not_pruned() {
        // A third level below the two dimensions is key territory; objects
        // there are emitted regardless of the schema.
        let lister = MockLister::new()
            .page_at("p/", None, &[], &["p/Firefox/"], None)
            .page_at("p/Firefox/", None, &[], &["p/Firefox/beta/"], None)
            .page_at(
                "p/Firefox/beta/",
                None,
                &[("p/Firefox/beta/a", 1), ("p/Firefox/beta/b", 2)],
                &[],
                None,
            );

        let (entries, _) = collect(lister, "p/", two_level_schema()).await;
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["p/Firefox/beta/a", "p/Firefox/beta/b"]);
    }

    #[tokio::test]
    async fn test_truncated_pages_continue_from_marker() {
        let lister = MockLister::new()
            .page_at("p/", None, &[], &["p/Firefox/"], None)
            .page_at("p/Firefox/", None, &[], &["p/Firefox/a/"], None)
            .page_at(
                "p/Firefox/a/",
                None,
                &[("p/Firefox/a/one", 1)],
                &[],
                Some("p/Firefox/a/one"),
            )
            .page_at(
                "p/Firefox/a/",
                Some("p/Firefox/a/one"),
                &[("p/Firefox/a/two", 2)],
                &[],
                None,
            );

        let (entries, errors) = collect(lister, "p/", two_level_schema()).await;
        assert_eq!(errors, 0);
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["p/Firefox/a/one", "p/Firefox/a/two"]);
    }

    #[tokio::test]
    async fn test_errors_are_in_band_and_walk_continues() {
        let lister = MockLister::new()
            .page_at("p/", None, &[], &["p/Firefox/"], None)
            .page_at(
                "p/Firefox/",
                None,
                &[],
                &["p/Firefox/bad/", "p/Firefox/good/"],
                None,
            )
            .failing_at("p/Firefox/bad/")
            .page_at(
                "p/Firefox/good/",
                None,
                &[("p/Firefox/good/survivor", 5)],
                &[],
                None,
            );

        let (entries, errors) = collect(lister, "p/", two_level_schema()).await;
        assert_eq!(errors, 1);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "p/Firefox/good/survivor");
    }

    #[tokio::test]
    async fn test_empty_schema_emits_only_root_objects() {
        let lister = MockLister::new().page_at(
            "meta/",
            None,
            &[("meta/20240101_index", 100)],
            &["meta/subdir/"],
            None,
        );

        let (entries, _) = collect(lister, "meta/", Schema::empty()).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "meta/20240101_index");
    }

    #[tokio::test]
    async fn test_empty_levels_are_skipped_silently() {
        let lister = MockLister::new().page_at("p/", None, &[], &[], None);
        let (entries, errors) = collect(lister, "p/", two_level_schema()).await;
        assert!(entries.is_empty());
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_strip_segment() {
        assert_eq!(strip_segment("foo/bar/", "foo/"), Some("bar"));
        assert_eq!(strip_segment("foo/bar/", ""), Some("foo/bar"));
        assert_eq!(strip_segment("foo/bar", "foo/"), None);
        assert_eq!(strip_segment("other/bar/", "foo/"), None);
    }
}
