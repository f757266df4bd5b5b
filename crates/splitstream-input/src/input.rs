//! Listing input: replay every finalized object under a prefix.
//!
//! One lister task walks the schema-pruned hierarchy and feeds matching
//! keys to a pool of fetchers; each fetcher streams its object through the
//! splitter and delivers records downstream.
//!
//! ```text
//! prefix ─▶ listing iterator ─▶ key queue (bounded) ─▶ W fetchers ─▶ sink
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use splitstream_core::{clean_bucket_prefix, Schema, SplitEvent};

use crate::counters::{InputCounters, InputMetrics};
use crate::error::{Error, Result};
use crate::list::{iterate, StoreLister, LIST_BATCH_SIZE};
use crate::sink::RecordSink;
use crate::stream::{open_object, split_records};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Path to the dimension schema JSON file.
    pub schema_file: PathBuf,

    /// Source bucket.
    #[serde(default)]
    pub s3_bucket: String,

    /// Key prefix to list under.
    #[serde(default)]
    pub s3_bucket_prefix: String,

    /// Fetch retries (default 5).
    #[serde(default = "default_retries")]
    pub s3_retries: u32,

    /// Size of the fetcher pool (default 10).
    #[serde(default = "default_worker_count")]
    pub s3_worker_count: usize,

    /// Store region (default "us-west-2").
    #[serde(default = "default_region")]
    pub aws_region: String,
}

fn default_retries() -> u32 {
    5
}

fn default_worker_count() -> usize {
    10
}

fn default_region() -> String {
    "us-west-2".to_string()
}

/// Streams every record of every matching object to a sink.
pub struct SplitFileInput {
    store: Arc<dyn ObjectStore>,
    schema: Schema,
    /// Listing prefix; empty, or ending in `/`.
    prefix: String,
    workers: usize,
    counters: Arc<InputCounters>,
}

impl SplitFileInput {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        schema: Schema,
        bucket_prefix: &str,
        workers: usize,
    ) -> Self {
        let mut prefix = clean_bucket_prefix(bucket_prefix);
        if !prefix.is_empty() {
            prefix.push('/');
        }
        Self {
            store,
            schema,
            prefix,
            workers: workers.max(1),
            counters: Arc::new(InputCounters::default()),
        }
    }

    /// Build from configuration, loading the schema file.
    pub fn from_config(config: &InputConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let schema = Schema::load(&config.schema_file).map_err(|e| Error::Config {
            param: "schema_file",
            reason: format!("must be a valid JSON file: {}", e),
        })?;
        Ok(Self::new(
            store,
            schema,
            &config.s3_bucket_prefix,
            config.s3_worker_count,
        ))
    }

    pub fn metrics(&self) -> InputMetrics {
        self.counters.snapshot()
    }

    /// List, fetch, split, and deliver until the listing is exhausted or
    /// `stop` fires. Returns the final metrics.
    pub async fn run(&self, sink: Arc<dyn RecordSink>, stop: CancellationToken) -> InputMetrics {
        let (key_tx, key_rx) = flume::bounded::<String>(LIST_BATCH_SIZE);

        tracing::info!(prefix = %self.prefix, "starting object store list");
        let mut listing = iterate(
            Arc::new(StoreLister::new(self.store.clone())),
            self.prefix.clone(),
            self.schema.clone(),
        );

        let lister_stop = stop.clone();
        let lister: JoinHandle<()> = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = listing.recv() => match maybe {
                        Some(Ok(entry)) => {
                            tracing::debug!(key = %entry.key, size = entry.size, "found object");
                            if key_tx.send_async(entry.key).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "error listing object store");
                        }
                        None => break,
                    },
                    _ = lister_stop.cancelled() => break,
                }
            }
            tracing::info!("done listing");
        });

        let mut fetchers = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let store = self.store.clone();
            let counters = self.counters.clone();
            let sink = sink.clone();
            let key_rx = key_rx.clone();
            let stop = stop.clone();
            fetchers.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        key = key_rx.recv_async() => match key {
                            Ok(key) => read_object(&store, &counters, sink.as_ref(), &key).await,
                            Err(_) => break,
                        },
                        _ = stop.cancelled() => {
                            // Drain without dispatching new fetches.
                            while key_rx.try_recv().is_ok() {}
                            break;
                        }
                    }
                }
                tracing::debug!(worker, "fetcher exiting");
            }));
        }
        drop(key_rx);

        if let Err(e) = lister.await {
            tracing::error!(error = %e, "lister task panicked");
        }
        for fetcher in fetchers {
            if let Err(e) = fetcher.await {
                tracing::error!(error = %e, "fetcher task panicked");
            }
        }
        self.counters.snapshot()
    }
}

/// Stream one object through the splitter, delivering each record.
async fn read_object(
    store: &Arc<dyn ObjectStore>,
    counters: &InputCounters,
    sink: &dyn RecordSink,
    key: &str,
) {
    let started = Instant::now();
    counters.inc_file_count();

    let reader = match open_object(store, key).await {
        Ok(reader) => reader,
        Err(e) => {
            counters.inc_file_failures();
            tracing::error!(key = %key, error = %e, "error opening object");
            return;
        }
    };

    let mut records = split_records(reader);
    while let Some(event) = records.next().await {
        match event {
            Ok(SplitEvent::Record { payload, .. }) => {
                counters.inc_message_count();
                counters.add_message_bytes(payload.len() as u64);
                sink.deliver(payload).await;
            }
            Ok(SplitEvent::Oversize { declared }) => {
                counters.inc_message_failures();
                tracing::error!(
                    key = %key,
                    declared,
                    "record exceeds maximum record size, skipping"
                );
            }
            Ok(SplitEvent::Trailing { bytes }) => {
                counters.add_remaining_bytes(bytes as u64);
                tracing::error!(
                    key = %key,
                    bytes,
                    "trailing data, possible corruption: bytes left in stream at EOF"
                );
            }
            Err(e) => {
                counters.inc_message_failures();
                counters.inc_file_failures();
                tracing::error!(key = %key, error = %e, "error reading object");
                return;
            }
        }
    }

    tracing::info!(
        key = %key,
        seconds = %format!("{:.2}", started.elapsed().as_secs_f64()),
        "successfully fetched object"
    );
}
