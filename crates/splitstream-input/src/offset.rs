//! Offset-Index Reader
//!
//! A secondary index maps `clientId → (key, offset, length)`, one location
//! per row of a flat delimiter-separated file:
//!
//! ```text
//! file_name	clientId	offset	length
//! Firefox/nightly/20140401.000_host	client-a	4	118
//! ```
//!
//! The delimiter is auto-detected from the first non-empty line by trying
//! tab, comma, pipe, and space in order; a `file_name` header row is
//! skipped. Offsets and lengths must fit the unsigned 32-bit range; a bad
//! value aborts the read with an error naming the file, row, and raw input.
//!
//! Index files come either from a local metadata file or from index objects
//! discovered by a listing pass, filtered to a date range by the leading
//! eight bytes of their basename. When a clientId set is supplied, rows for
//! other clients are skipped.
//!
//! In-flight locations are capped: a semaphore permit rides along with each
//! queued location and is released when its fetch completes, so the reader
//! stalls before the 1001st outstanding record rather than flooding the
//! fetcher pool.

use std::collections::HashSet;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use splitstream_core::{clean_bucket_prefix, Schema};

use crate::counters::{InputCounters, InputMetrics};
use crate::error::{Error, Result};
use crate::fetch::location_fetch_loop;
use crate::list::{iterate, StoreLister};
use crate::sink::RecordSink;
use crate::stream::open_object;

/// Capacity of the location queue.
pub const LOCATION_QUEUE_DEPTH: usize = 1000;

/// Maximum locations handed out but not yet fetched.
pub const MAX_IN_FLIGHT: usize = 1000;

const EXPECTED_FIELDS: usize = 4;

/// Address of a single record within a finalized object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLocation {
    pub key: String,
    pub offset: u32,
    pub length: u32,
}

/// A location plus the in-flight permit it holds until fetched.
pub(crate) struct LocationTicket {
    pub(crate) location: MessageLocation,
    _permit: Option<OwnedSemaphorePermit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetConfig {
    /// Newline-delimited file of clientIds to fetch. Required unless
    /// `metadata_file` is set.
    #[serde(default)]
    pub client_id_list: Option<PathBuf>,

    /// Pre-computed local index file; skips the listing pass and the
    /// client filter.
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,

    /// Inclusive date bounds (YYYYMMDD) on index-file basenames.
    #[serde(default = "default_start_date")]
    pub start_date: String,
    #[serde(default = "default_end_date")]
    pub end_date: String,

    /// Bucket holding the index files. Required unless using
    /// `metadata_file`.
    #[serde(default)]
    pub s3_meta_bucket: String,

    #[serde(default)]
    pub s3_meta_bucket_prefix: String,

    /// Range-fetch retries (default 5).
    #[serde(default = "default_retries")]
    pub s3_retries: u32,

    /// Size of the fetcher pool (default 16).
    #[serde(default = "default_worker_count")]
    pub s3_worker_count: usize,

    /// Store region (default "us-west-2").
    #[serde(default = "default_region")]
    pub aws_region: String,
}

impl Default for OffsetConfig {
    fn default() -> Self {
        Self {
            client_id_list: None,
            metadata_file: None,
            start_date: default_start_date(),
            end_date: default_end_date(),
            s3_meta_bucket: String::new(),
            s3_meta_bucket_prefix: String::new(),
            s3_retries: default_retries(),
            s3_worker_count: default_worker_count(),
            aws_region: default_region(),
        }
    }
}

fn default_start_date() -> String {
    "20150101".to_string()
}

fn default_end_date() -> String {
    chrono::Utc::now().format("%Y%m%d").to_string()
}

fn default_retries() -> u32 {
    5
}

fn default_worker_count() -> usize {
    16
}

fn default_region() -> String {
    "us-west-2".to_string()
}

/// Reconstructs per-client record streams via indexed byte-range fetches.
#[derive(Debug)]
pub struct OffsetInput {
    config: OffsetConfig,
    clientids: Option<HashSet<String>>,
    data_store: Arc<dyn ObjectStore>,
    meta_store: Option<Arc<dyn ObjectStore>>,
    counters: Arc<InputCounters>,
}

impl OffsetInput {
    /// Validate the source choice and load the clientId list if filtering.
    pub fn new(
        config: OffsetConfig,
        data_store: Arc<dyn ObjectStore>,
        meta_store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self> {
        let clientids = if config.metadata_file.is_some() {
            // The metadata is already narrowed to the clients of interest.
            None
        } else if let Some(path) = &config.client_id_list {
            Some(read_client_ids(path).map_err(|e| Error::Config {
                param: "client_id_list",
                reason: format!("error reading file {}: {}", path.display(), e),
            })?)
        } else {
            return Err(Error::Config {
                param: "client_id_list",
                reason: "you must specify either 'client_id_list' or 'metadata_file'"
                    .to_string(),
            });
        };

        if config.metadata_file.is_none() && meta_store.is_none() {
            return Err(Error::Config {
                param: "s3_meta_bucket",
                reason: "required unless using 'metadata_file'".to_string(),
            });
        }

        Ok(Self {
            config,
            clientids,
            data_store,
            meta_store,
            counters: Arc::new(InputCounters::default()),
        })
    }

    pub fn metrics(&self) -> InputMetrics {
        self.counters.snapshot()
    }

    /// Read the index source(s), fan out range fetches, and deliver each
    /// record to the sink. Returns the final metrics.
    pub async fn run(&self, sink: Arc<dyn RecordSink>, stop: CancellationToken) -> InputMetrics {
        let (loc_tx, loc_rx) = flume::bounded::<LocationTicket>(LOCATION_QUEUE_DEPTH);
        let limiter = Arc::new(Semaphore::new(MAX_IN_FLIGHT));

        let index: JoinHandle<()> = if let Some(path) = self.config.metadata_file.clone() {
            tokio::spawn(async move {
                let name = path.display().to_string();
                match tokio::fs::File::open(&path).await {
                    Ok(file) => {
                        let reader = tokio::io::BufReader::new(file);
                        if let Err(e) =
                            parse_locations(reader, &name, None, &loc_tx, &limiter).await
                        {
                            tracing::error!(error = %e, "error reading metadata");
                        }
                    }
                    Err(e) => {
                        tracing::error!(path = %name, error = %e, "error opening metadata file");
                    }
                }
                tracing::info!("all done with metadata, closing channel");
            })
        } else if let Some(meta_store) = self.meta_store.clone() {
            let mut prefix = clean_bucket_prefix(&self.config.s3_meta_bucket_prefix);
            if !prefix.is_empty() {
                prefix.push('/');
            }
            let start_date = self.config.start_date.clone();
            let end_date = self.config.end_date.clone();
            let filter = self.clientids.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                tracing::info!(prefix = %prefix, "starting index list");
                let mut listing = iterate(
                    Arc::new(StoreLister::new(meta_store.clone())),
                    prefix,
                    Schema::empty(),
                );
                loop {
                    tokio::select! {
                        maybe = listing.recv() => match maybe {
                            Some(Ok(entry)) => {
                                if !index_in_date_range(&entry.key, &start_date, &end_date) {
                                    continue;
                                }
                                match open_object(&meta_store, &entry.key).await {
                                    Ok(reader) => {
                                        let reader = tokio::io::BufReader::new(reader);
                                        if let Err(e) = parse_locations(
                                            reader,
                                            &entry.key,
                                            filter.as_ref(),
                                            &loc_tx,
                                            &limiter,
                                        )
                                        .await
                                        {
                                            tracing::error!(key = %entry.key, error = %e, "error reading index");
                                        }
                                    }
                                    Err(e) => {
                                        tracing::error!(key = %entry.key, error = %e, "error opening index");
                                    }
                                }
                            }
                            Some(Err(e)) => tracing::error!(error = %e, "error listing index files"),
                            None => break,
                        },
                        _ = stop.cancelled() => break,
                    }
                }
                tracing::info!("all done listing, closing channel");
            })
        } else {
            // new() guarantees a source; nothing to enqueue.
            tokio::spawn(async move {
                drop(loc_tx);
            })
        };

        let mut fetchers = Vec::new();
        for worker in 0..self.config.s3_worker_count.max(1) {
            fetchers.push(tokio::spawn(location_fetch_loop(
                self.data_store.clone(),
                self.counters.clone(),
                sink.clone(),
                loc_rx.clone(),
                stop.clone(),
                self.config.s3_retries,
                worker,
            )));
        }
        drop(loc_rx);

        if let Err(e) = index.await {
            tracing::error!(error = %e, "index task panicked");
        }
        for fetcher in fetchers {
            if let Err(e) = fetcher.await {
                tracing::error!(error = %e, "fetcher task panicked");
            }
        }
        self.counters.snapshot()
    }
}

/// Whether an index object's basename starts with a date inside
/// `[start, end]`.
fn index_in_date_range(key: &str, start: &str, end: &str) -> bool {
    let base = key.rsplit('/').next().unwrap_or(key);
    if base.len() < 8 || !base.is_char_boundary(8) {
        return false;
    }
    let date = &base[..8];
    date >= start && date <= end
}

/// Load a newline-delimited clientId file into a set.
fn read_client_ids(path: &FsPath) -> std::io::Result<HashSet<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect())
}

/// Pick the first delimiter that splits the line into the expected number
/// of fields. Not grammar-compliant CSV, but index rows never quote.
fn detect_field_separator(line: &str, expected: usize) -> char {
    const POSSIBLE: [char; 4] = ['\t', ',', '|', ' '];
    for sep in POSSIBLE {
        if line.split(sep).count() == expected {
            return sep;
        }
    }
    POSSIBLE[0]
}

/// Parse a decimal string into the unsigned 32-bit range. The error quotes
/// the raw input.
fn parse_u32(file: &str, line: usize, raw: &str) -> Result<u32> {
    let bad = || Error::Index {
        file: file.to_string(),
        line,
        reason: format!("cannot parse '{}' as an unsigned 32-bit value", raw),
    };
    let value: i64 = raw.parse().map_err(|_| bad())?;
    if !(0..=u32::MAX as i64).contains(&value) {
        return Err(bad());
    }
    Ok(value as u32)
}

/// Read index rows, forwarding each matching location (with its in-flight
/// permit) to the fetcher queue.
pub(crate) async fn parse_locations<R>(
    reader: R,
    name: &str,
    filter: Option<&HashSet<String>>,
    out: &flume::Sender<LocationTicket>,
    limiter: &Arc<Semaphore>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_num = 0usize;
    let mut delim: Option<char> = None;

    while let Some(line) = lines.next_line().await? {
        line_num += 1;
        if line.is_empty() {
            continue;
        }
        let sep = *delim.get_or_insert_with(|| detect_field_separator(&line, EXPECTED_FIELDS));

        let pieces: Vec<&str> = line.split(sep).collect();
        if pieces.len() != EXPECTED_FIELDS {
            return Err(Error::Index {
                file: name.to_string(),
                line: line_num,
                reason: format!(
                    "invalid line, expected {} values, found {}",
                    EXPECTED_FIELDS,
                    pieces.len()
                ),
            });
        }

        // Optional header.
        if pieces[0] == "file_name" {
            continue;
        }

        if let Some(filter) = filter {
            if !filter.contains(pieces[1]) {
                continue;
            }
        }

        let offset = parse_u32(name, line_num, pieces[2])?;
        let length = parse_u32(name, line_num, pieces[3])?;

        let permit = limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::QueueClosed)?;
        let ticket = LocationTicket {
            location: MessageLocation {
                key: pieces[0].to_string(),
                offset,
                length,
            },
            _permit: Some(permit),
        };
        out.send_async(ticket).await.map_err(|_| Error::QueueClosed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse_harness() -> (flume::Sender<LocationTicket>, flume::Receiver<LocationTicket>, Arc<Semaphore>) {
        let (tx, rx) = flume::bounded(LOCATION_QUEUE_DEPTH);
        (tx, rx, Arc::new(Semaphore::new(MAX_IN_FLIGHT)))
    }

    async fn parse_str(
        input: &str,
        filter: Option<&HashSet<String>>,
    ) -> (Result<()>, Vec<MessageLocation>) {
        let (tx, rx, limiter) = parse_harness();
        let reader = tokio::io::BufReader::new(input.as_bytes());
        let result = parse_locations(reader, "test.idx", filter, &tx, &limiter).await;
        drop(tx);
        let locations = rx.drain().map(|t| t.location).collect();
        (result, locations)
    }

    #[test]
    fn test_detect_tab() {
        assert_eq!(detect_field_separator("a\tb\t12\t34", 4), '\t');
    }

    #[test]
    fn test_detect_comma() {
        assert_eq!(detect_field_separator("a,b,12,34", 4), ',');
    }

    #[test]
    fn test_detect_pipe() {
        assert_eq!(detect_field_separator("a|b|12|34", 4), '|');
    }

    #[test]
    fn test_detect_space() {
        assert_eq!(detect_field_separator("a b 12 34", 4), ' ');
    }

    #[test]
    fn test_detect_defaults_to_tab() {
        assert_eq!(detect_field_separator("nodelimitershere", 4), '\t');
    }

    #[tokio::test]
    async fn test_parse_tab_rows() {
        let (result, locations) =
            parse_str("key1\tclient-a\t0\t10\nkey2\tclient-b\t10\t20\n", None).await;
        result.unwrap();
        assert_eq!(
            locations,
            vec![
                MessageLocation {
                    key: "key1".to_string(),
                    offset: 0,
                    length: 10
                },
                MessageLocation {
                    key: "key2".to_string(),
                    offset: 10,
                    length: 20
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_parse_skips_header() {
        let (result, locations) = parse_str(
            "file_name\tclient_id\toffset\tlength\nkey\tc\t5\t6\n",
            None,
        )
        .await;
        result.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].offset, 5);
    }

    #[tokio::test]
    async fn test_parse_detects_pipe_rows() {
        let (result, locations) = parse_str("key|c|1|2\n", None).await;
        result.unwrap();
        assert_eq!(locations.len(), 1);
    }

    #[tokio::test]
    async fn test_mixed_delimiter_row_rejected() {
        // Tab chosen from the first line; the pipe row then splits to one
        // field.
        let (result, _) = parse_str("a\tb\t12\t34\na|b|12|34\n", None).await;
        let err = result.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("line 2"), "{}", text);
        assert!(text.contains("expected 4 values, found 1"), "{}", text);
    }

    #[tokio::test]
    async fn test_bad_numeric_quotes_raw_input() {
        let (result, _) = parse_str("key\tc\tnot-a-number\t10\n", None).await;
        let err = result.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("'not-a-number'"), "{}", text);
        assert!(text.contains("test.idx"), "{}", text);
        assert!(text.contains("line 1"), "{}", text);
    }

    #[tokio::test]
    async fn test_offset_above_u32_rejected() {
        let (result, _) = parse_str("key\tc\t4294967296\t10\n", None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_offset_at_u32_max_accepted() {
        let (result, locations) = parse_str("key\tc\t4294967295\t1\n", None).await;
        result.unwrap();
        assert_eq!(locations[0].offset, u32::MAX);
    }

    #[tokio::test]
    async fn test_negative_offset_rejected() {
        let (result, _) = parse_str("key\tc\t-1\t10\n", None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_client_filter_skips_other_rows() {
        let filter: HashSet<String> = ["client-a".to_string()].into();
        let (result, locations) = parse_str(
            "k1\tclient-a\t0\t1\nk2\tclient-b\t1\t2\nk3\tclient-a\t2\t3\n",
            Some(&filter),
        )
        .await;
        result.unwrap();
        let keys: Vec<&str> = locations.iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k3"]);
    }

    #[tokio::test]
    async fn test_empty_lines_skipped_before_detection() {
        let (result, locations) = parse_str("\n\nk,c,1,2\n", None).await;
        result.unwrap();
        assert_eq!(locations.len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_cap_blocks_reader() {
        let (tx, rx) = flume::bounded::<LocationTicket>(LOCATION_QUEUE_DEPTH);
        let limiter = Arc::new(Semaphore::new(2));
        let input = "k1\tc\t0\t1\nk2\tc\t1\t1\nk3\tc\t2\t1\n";

        let parse = tokio::spawn({
            let tx = tx.clone();
            let limiter = limiter.clone();
            async move {
                let reader = tokio::io::BufReader::new(input.as_bytes());
                parse_locations(reader, "cap.idx", None, &tx, &limiter).await
            }
        });

        // Two permits: the third row cannot be enqueued yet.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!parse.is_finished());
        assert_eq!(rx.len(), 2);

        // Completing one fetch (dropping its ticket) releases a permit.
        drop(rx.recv_async().await.unwrap());
        let result = tokio::time::timeout(Duration::from_secs(1), parse)
            .await
            .expect("parse finishes once a permit frees")
            .unwrap();
        result.unwrap();
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_index_date_range() {
        assert!(index_in_date_range("prefix/20240115_index", "20240101", "20240131"));
        assert!(!index_in_date_range("prefix/20231231_index", "20240101", "20240131"));
        assert!(!index_in_date_range("prefix/20240201_index", "20240101", "20240131"));
        assert!(index_in_date_range("20240115", "20240101", "20240131"));
        assert!(!index_in_date_range("short", "20240101", "20240131"));
    }

    #[test]
    fn test_read_client_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.txt");
        std::fs::write(&path, "client-a\nclient-b\n\nclient-a\n").unwrap();
        let ids = read_client_ids(&path).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("client-a"));
        assert!(ids.contains("client-b"));
    }

    #[test]
    fn test_offset_input_requires_a_source() {
        let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        let err = OffsetInput::new(OffsetConfig::default(), store, None).unwrap_err();
        assert!(err.to_string().contains("client_id_list"));
    }

    #[test]
    fn test_offset_input_requires_meta_bucket_with_client_list() {
        let dir = tempfile::tempdir().unwrap();
        let clients = dir.path().join("clients.txt");
        std::fs::write(&clients, "c1\n").unwrap();
        let config = OffsetConfig {
            client_id_list: Some(clients),
            ..Default::default()
        };
        let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        let err = OffsetInput::new(config, store, None).unwrap_err();
        assert!(err.to_string().contains("s3_meta_bucket"));
    }
}
