//! Publisher pool.
//!
//! A fixed pool of workers drains the publish queue, uploading each
//! finalized file to the object store and deleting the local copy on
//! success. A failed upload counts a partial failure and is re-queued with
//! one less attempt; when the attempts run out (or during shutdown, when
//! retrying would never complete) the failure is permanent and the file is
//! left on disk for the next run to pick up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use tokio_util::sync::CancellationToken;

use splitstream_core::pretty_size;

use crate::counters::OutputCounters;

/// Capacity of the publish queue.
pub(crate) const PUBLISH_QUEUE_DEPTH: usize = 1000;

/// One queued upload of a finalized file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAttempt {
    /// Relative name under `<path>/finalized/`.
    pub name: String,
    pub attempts_remaining: u32,
}

pub(crate) struct Publisher {
    pub(crate) id: usize,
    /// `None` when no bucket is configured; finalized files stay local.
    pub(crate) store: Option<Arc<dyn ObjectStore>>,
    pub(crate) bucket: String,
    pub(crate) bucket_prefix: String,
    pub(crate) finalized_dir: PathBuf,
    pub(crate) counters: Arc<OutputCounters>,
    pub(crate) queue_tx: flume::Sender<PublishAttempt>,
    pub(crate) queue_rx: flume::Receiver<PublishAttempt>,
    /// Cancelled by the receiver once every last file has been finalized
    /// and queued.
    pub(crate) done: CancellationToken,
}

impl Publisher {
    pub(crate) async fn run(self) {
        loop {
            tokio::select! {
                biased;
                attempt = self.queue_rx.recv_async() => match attempt {
                    Ok(attempt) => self.publish(attempt).await,
                    Err(_) => break,
                },
                _ = self.done.cancelled() => {
                    // Shutdown: drain what is already queued, without
                    // retrying anything.
                    while let Ok(attempt) = self.queue_rx.try_recv() {
                        self.publish(attempt).await;
                    }
                    break;
                }
            }
        }
        tracing::debug!(worker = self.id, "publisher exiting");
    }

    async fn publish(&self, attempt: PublishAttempt) {
        let store = match &self.store {
            Some(store) => store,
            None => {
                tracing::info!(name = %attempt.name, "no bucket configured, leaving finalized file in place");
                return;
            }
        };

        let source = self.finalized_dir.join(&attempt.name);
        let data = match tokio::fs::read(&source).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                self.retry(
                    attempt,
                    &format!("error opening {} for reading: {}", source.display(), e),
                )
                .await;
                return;
            }
        };
        let size = data.len() as u64;

        let key = if self.bucket_prefix.is_empty() {
            attempt.name.clone()
        } else {
            format!("{}/{}", self.bucket_prefix, attempt.name)
        };
        let opts = PutOptions {
            attributes: Attributes::from_iter([(
                Attribute::ContentType,
                "binary/octet-stream",
            )]),
            ..Default::default()
        };

        let started = Instant::now();
        match store.put_opts(&Path::from(key.as_str()), data.into(), opts).await {
            Ok(_) => {
                let secs = started.elapsed().as_secs_f64();
                let mb = size as f64 / 1024.0 / 1024.0;
                let rate = if secs > 0.0 { mb / secs } else { 0.0 };
                self.counters.inc_file_count();
                self.counters.add_file_bytes(size);
                tracing::info!(
                    key = %key,
                    size = %pretty_size(size),
                    seconds = %format!("{:.2}", secs),
                    mb_per_sec = %format!("{:.2}", rate),
                    "published finalized file"
                );

                if let Err(e) = tokio::fs::remove_file(&source).await {
                    tracing::error!(
                        path = %source.display(),
                        error = %e,
                        "error removing local file after publishing"
                    );
                }
            }
            Err(e) => {
                self.retry(
                    attempt,
                    &format!(
                        "error publishing {} to s3://{}/{}: {}",
                        source.display(),
                        self.bucket,
                        key,
                        e
                    ),
                )
                .await;
            }
        }
    }

    /// Re-queue the attempt with one less attempt, or record a permanent
    /// failure when attempts are exhausted or the engine is shutting down.
    async fn retry(&self, attempt: PublishAttempt, error: &str) {
        if !self.done.is_cancelled() && attempt.attempts_remaining > 0 {
            self.counters.inc_file_partial_failures();
            tracing::warn!(
                name = %attempt.name,
                attempts_remaining = attempt.attempts_remaining,
                error = %error,
                "partial publish failure, will retry"
            );
            let retry = PublishAttempt {
                name: attempt.name,
                attempts_remaining: attempt.attempts_remaining - 1,
            };
            if self.queue_tx.send_async(retry).await.is_err() {
                self.counters.inc_file_failures();
            }
            return;
        }

        self.counters.inc_file_failures();
        tracing::error!(name = %attempt.name, error = %error, "publish failed permanently");
    }
}
