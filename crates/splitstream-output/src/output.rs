//! Engine facade: wires the receiver and the publisher pool together.
//!
//! ```ignore
//! use splitstream_output::{OutputConfig, SplitFileOutput};
//! use splitstream_core::PayloadEncoder;
//!
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! let engine = SplitFileOutput::start(config, Some(store), Arc::new(PayloadEncoder), rx).await?;
//!
//! tx.send(message)?;          // feed messages
//! drop(tx);                   // closing the feed finalizes everything
//! engine.join().await;        // wait for publishers to drain
//! ```

use std::path::Path as FsPath;
use std::sync::Arc;

use object_store::ObjectStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use splitstream_core::{clean_bucket_prefix, Message, MessageEncoder, Schema};

use crate::counters::{OutputCounters, OutputMetrics};
use crate::error::{Error, Result};
use crate::publisher::{PublishAttempt, Publisher, PUBLISH_QUEUE_DEPTH};
use crate::writer::{SplitWriter, FINALIZED_DIR};
use crate::OutputConfig;

/// Running dimension-split output engine.
pub struct SplitFileOutput {
    counters: Arc<OutputCounters>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SplitFileOutput {
    /// Validate the configuration, recover any finalized files left behind
    /// by a previous run, and spawn the receiver plus the publisher pool.
    pub async fn start(
        config: OutputConfig,
        store: Option<Arc<dyn ObjectStore>>,
        encoder: Arc<dyn MessageEncoder>,
        input: mpsc::UnboundedReceiver<Message>,
    ) -> Result<Self> {
        config.validate()?;
        let schema = Schema::load(&config.schema_file).map_err(|e| Error::Config {
            param: "schema_file",
            reason: format!("must be a valid JSON file: {}", e),
        })?;
        let use_framing = config.use_framing.unwrap_or_else(|| encoder.frames_output());

        let counters = Arc::new(OutputCounters::default());
        counters.set_open_file_limit(config.max_open_files as u64);

        let (publish_tx, publish_rx) = flume::bounded(PUBLISH_QUEUE_DEPTH);
        let shutdown = CancellationToken::new();
        let publish_done = CancellationToken::new();
        let bucket_prefix = clean_bucket_prefix(&config.s3_bucket_prefix);
        let finalized_dir = config.path.join(FINALIZED_DIR);

        let mut tasks = Vec::with_capacity(config.s3_worker_count + 1);
        for id in 0..config.s3_worker_count.max(1) {
            let publisher = Publisher {
                id,
                store: store.clone(),
                bucket: config.s3_bucket.clone(),
                bucket_prefix: bucket_prefix.clone(),
                finalized_dir: finalized_dir.clone(),
                counters: counters.clone(),
                queue_tx: publish_tx.clone(),
                queue_rx: publish_rx.clone(),
                done: publish_done.clone(),
            };
            tasks.push(tokio::spawn(publisher.run()));
        }

        // Files finalized by a previous run but never published are picked
        // up again before any new traffic.
        let leftovers = scan_finalized(&finalized_dir);
        if !leftovers.is_empty() {
            tracing::info!(count = leftovers.len(), "re-queueing finalized files from a previous run");
        }
        for name in leftovers {
            let attempt = PublishAttempt {
                name,
                attempts_remaining: config.s3_retries,
            };
            if publish_tx.send_async(attempt).await.is_err() {
                break;
            }
        }

        let writer = SplitWriter::new(
            config,
            schema,
            encoder,
            use_framing,
            counters.clone(),
            publish_tx,
            publish_done,
        )?;
        tasks.push(tokio::spawn(writer.run(input, shutdown.clone())));

        Ok(Self {
            counters,
            shutdown,
            tasks,
        })
    }

    /// Point-in-time metrics snapshot.
    pub fn metrics(&self) -> OutputMetrics {
        self.counters.snapshot()
    }

    /// Signal shutdown without waiting. The receiver finalizes every
    /// current file; publishers drain the queue without retrying.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every task to finish. Returns the final metrics.
    pub async fn join(self) -> OutputMetrics {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "output task panicked");
            }
        }
        self.counters.snapshot()
    }
}

/// Relative names of every file under the finalized directory.
fn scan_finalized(dir: &FsPath) -> Vec<String> {
    let mut names = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(dir) {
                names.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    names
}
