//! The receiver task of the dimension-split output engine.
//!
//! One task owns the whole write path: the current-file table, the open-file
//! cache, and the rotation decisions. Messages arrive on the input feed,
//! flush ticks arrive from a timer, and both are integrated in the same
//! `select!` loop, so nothing here is ever touched concurrently.
//!
//! ## Write Flow
//!
//! ```text
//! message
//!     ↓ encode (+ optional framing)
//! project dimensions → sanitize → dimension path
//!     ↓
//! current-file table lookup (create entry on first write)
//!     ↓
//! append via open-file cache (reopen on cache miss)
//!     ↓
//! size >= max_file_size?  ──YES──▶ finalize: rename current/ → finalized/
//!                                      ↓
//!                                  publish queue
//! ```
//!
//! Age-based rotation runs on every flush tick; shutdown finalizes every
//! remaining entry and then releases the publisher pool.

use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use splitstream_core::{dimension_path, frame, new_file_name, Message, MessageEncoder, Schema};

use crate::counters::OutputCounters;
use crate::error::{Error, Result};
use crate::file_cache::OpenFileCache;
use crate::publisher::PublishAttempt;
use crate::OutputConfig;

/// Subdirectory for in-flight files.
pub const CURRENT_DIR: &str = "current";

/// Subdirectory for rotated files awaiting publication.
pub const FINALIZED_DIR: &str = "finalized";

/// State for a single split file currently being written.
struct SplitFileInfo {
    /// Relative name: `<dimension path>/<timestamp>_<host>`.
    name: String,
    size: u64,
    last_update: Instant,
}

pub(crate) struct SplitWriter {
    config: OutputConfig,
    perm: u32,
    folder_perm: u32,
    schema: Schema,
    encoder: Arc<dyn MessageEncoder>,
    use_framing: bool,
    host: String,
    dim_files: HashMap<String, SplitFileInfo>,
    files: OpenFileCache,
    counters: Arc<OutputCounters>,
    publish_tx: flume::Sender<PublishAttempt>,
    /// Cancelled once every remaining file is finalized; releases the
    /// publisher pool to drain and exit.
    publish_done: CancellationToken,
}

impl SplitWriter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: OutputConfig,
        schema: Schema,
        encoder: Arc<dyn MessageEncoder>,
        use_framing: bool,
        counters: Arc<OutputCounters>,
        publish_tx: flume::Sender<PublishAttempt>,
        publish_done: CancellationToken,
    ) -> Result<Self> {
        let perm = config.perm_mode()?;
        let folder_perm = config.folder_perm_mode()?;
        let files = OpenFileCache::new(config.max_open_files);
        Ok(Self {
            config,
            perm,
            folder_perm,
            schema,
            encoder,
            use_framing,
            host: splitstream_core::host_tag(),
            dim_files: HashMap::new(),
            files,
            counters,
            publish_tx,
            publish_done,
        })
    }

    fn current_file_path(&self, name: &str) -> PathBuf {
        self.config.path.join(CURRENT_DIR).join(name)
    }

    fn finalized_file_path(&self, name: &str) -> PathBuf {
        self.config.path.join(FINALIZED_DIR).join(name)
    }

    /// Accept messages and flush ticks until the feed closes or shutdown is
    /// signalled, then finalize everything still open.
    pub(crate) async fn run(
        mut self,
        mut input: mpsc::UnboundedReceiver<Message>,
        shutdown: CancellationToken,
    ) {
        let period = Duration::from_millis(self.config.flush_interval_ms.max(1));
        let mut flush =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = input.recv() => match maybe {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
                _ = flush.tick() => self.rotate_aged().await,
                _ = shutdown.cancelled() => break,
            }
        }

        self.finalize_all().await;
        self.files.clear();
        self.counters.set_open_file_count(0);
        self.publish_done.cancel();
        tracing::info!("split writer shut down");
    }

    async fn handle_message(&mut self, message: Message) {
        let encoded = match self.encoder.encode(&message) {
            Ok(Some(bytes)) => bytes,
            // The encoder chose to emit nothing.
            Ok(None) => return,
            Err(e) => {
                self.counters.inc_encode_failures();
                tracing::warn!(error = %e, "failed to encode message");
                return;
            }
        };
        let out = if self.use_framing {
            match frame(&encoded) {
                Ok(framed) => framed,
                Err(e) => {
                    self.counters.inc_encode_failures();
                    tracing::warn!(error = %e, "failed to frame message");
                    return;
                }
            }
        } else {
            encoded
        };

        let dims = self.schema.project(&message);
        let dim_path = dimension_path(&dims);

        match self.write_message(&dim_path, &out) {
            Ok(true) => {
                if let Some(info) = self.dim_files.remove(&dim_path) {
                    self.finalize_one(info).await;
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(dim_path = %dim_path, error = %e, "error writing message");
            }
        }
    }

    /// Append the bytes to the current file for `dim_path`, creating the
    /// entry on first write. Returns whether the file hit the size
    /// threshold.
    fn write_message(&mut self, dim_path: &str, bytes: &[u8]) -> Result<bool> {
        self.counters.inc_message_count();

        let name = match self.dim_files.get(dim_path) {
            Some(info) => info.name.clone(),
            None => {
                let name = format!("{}/{}", dim_path, new_file_name(Utc::now(), &self.host));
                self.dim_files.insert(
                    dim_path.to_string(),
                    SplitFileInfo {
                        name: name.clone(),
                        size: 0,
                        last_update: Instant::now(),
                    },
                );
                name
            }
        };

        let written = match self.append(&name, bytes) {
            Ok(n) => n,
            Err(source) => {
                self.counters.inc_message_failures();
                return Err(Error::FileWrite { name, source });
            }
        };
        self.counters.add_message_bytes(written as u64);

        let mut rotate = false;
        if let Some(info) = self.dim_files.get_mut(dim_path) {
            info.size += written as u64;
            info.last_update = Instant::now();
            rotate = info.size >= self.config.max_file_size;
        }

        if written < bytes.len() {
            // The entry survives; the next write continues appending.
            return Err(Error::Truncated {
                name,
                wrote: written,
                expected: bytes.len(),
            });
        }
        Ok(rotate)
    }

    fn append(&mut self, name: &str, bytes: &[u8]) -> std::io::Result<usize> {
        let path = self.current_file_path(name);
        let perm = self.perm;
        let folder_perm = self.folder_perm;
        let file = self.files.get_or_open(name, || {
            if let Some(parent) = path.parent() {
                let mut builder = std::fs::DirBuilder::new();
                builder.recursive(true).mode(folder_perm);
                builder.create(parent)?;
            }
            std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .mode(perm)
                .open(&path)
        })?;
        let n = file.write(bytes)?;
        self.counters.set_open_file_count(self.files.len() as u64);
        Ok(n)
    }

    /// Rotate every entry idle longer than `max_file_age`.
    async fn rotate_aged(&mut self) {
        let max_age = Duration::from_millis(self.config.max_file_age_ms);
        let expired: Vec<String> = self
            .dim_files
            .iter()
            .filter(|(_, info)| info.last_update.elapsed() > max_age)
            .map(|(path, _)| path.clone())
            .collect();
        for dim_path in expired {
            if let Some(info) = self.dim_files.remove(&dim_path) {
                tracing::debug!(name = %info.name, "rotating idle file");
                self.finalize_one(info).await;
            }
        }
    }

    async fn finalize_all(&mut self) {
        let all: Vec<String> = self.dim_files.keys().cloned().collect();
        for dim_path in all {
            if let Some(info) = self.dim_files.remove(&dim_path) {
                self.finalize_one(info).await;
            }
        }
    }

    /// Promote a current file to finalized and queue it for publishing. The
    /// entry has already been removed from the table.
    async fn finalize_one(&mut self, info: SplitFileInfo) {
        // Removal from the cache is the sole close site.
        self.files.remove(&info.name);
        self.counters.set_open_file_count(self.files.len() as u64);

        let from = self.current_file_path(&info.name);
        let to = self.finalized_file_path(&info.name);
        let folder_perm = self.folder_perm;

        let renamed = (|| -> std::io::Result<()> {
            if let Some(parent) = to.parent() {
                let mut builder = std::fs::DirBuilder::new();
                builder.recursive(true).mode(folder_perm);
                builder.create(parent)?;
            }
            std::fs::rename(&from, &to)
        })();

        match renamed {
            Ok(()) => {
                let attempt = PublishAttempt {
                    name: info.name,
                    attempts_remaining: self.config.s3_retries,
                };
                if self.publish_tx.send_async(attempt).await.is_err() {
                    tracing::warn!("publish queue closed; finalized file left on disk");
                }
            }
            Err(e) => {
                self.counters.inc_message_failures();
                tracing::error!(name = %info.name, error = %e, "failed to finalize file");
            }
        }
    }
}
