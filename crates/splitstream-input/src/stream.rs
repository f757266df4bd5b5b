//! Object record streaming.
//!
//! Opens one object as a byte stream and runs it through the framing codec,
//! yielding [`SplitEvent`]s: records with their payload offsets, in-band
//! oversize reports, and the trailing-byte count at end of stream.

use std::io;
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use splitstream_core::FrameCodec;

use crate::error::Result;

/// Open a streaming reader over one object.
pub async fn open_object(
    store: &Arc<dyn ObjectStore>,
    key: &str,
) -> Result<impl AsyncRead + Unpin> {
    let result = store.get(&Path::from(key)).await?;
    let stream = result
        .into_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    Ok(StreamReader::new(stream))
}

/// Frame-split a byte stream into record events.
pub fn split_records<R: AsyncRead + Unpin>(reader: R) -> FramedRead<R, FrameCodec> {
    FramedRead::new(reader, FrameCodec::new())
}
