//! Record delivery seam.
//!
//! Every input variant hands finished records to a [`RecordSink`] - the
//! downstream pipeline's doorstep. The library stays decoupled from what
//! happens next (decoding, filtering, re-emission); tests collect records
//! through a channel.

use async_trait::async_trait;
use bytes::Bytes;

/// Receives each record as it is split out of a stream.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn deliver(&self, record: Bytes);
}

/// Channel-backed sink; a closed receiver drops records silently.
#[async_trait]
impl RecordSink for tokio::sync::mpsc::Sender<Bytes> {
    async fn deliver(&self, record: Bytes) {
        if self.send(record).await.is_err() {
            tracing::warn!("record sink closed, dropping record");
        }
    }
}
