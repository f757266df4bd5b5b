//! Message encoders
//!
//! The output engine takes a pluggable encoder that turns a [`Message`] into
//! the bytes appended to a split file. Whether stream framing is applied on
//! top is a separate decision: the engine frames iff the configuration says
//! so, defaulting to the encoder's own preference (wire-format payloads are
//! framed, line-oriented output is not).

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::message::Message;

/// Turns messages into output bytes.
///
/// Returning `Ok(None)` means the encoder chose to emit nothing for this
/// message; the engine drops it without counting a failure.
pub trait MessageEncoder: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Option<Bytes>>;

    /// Whether output from this encoder should be framed when the
    /// configuration does not say either way.
    fn frames_output(&self) -> bool {
        false
    }
}

/// Passes the message payload through untouched. The payload is already in
/// wire form, so framing defaults on.
#[derive(Debug, Default)]
pub struct PayloadEncoder;

impl MessageEncoder for PayloadEncoder {
    fn encode(&self, message: &Message) -> Result<Option<Bytes>> {
        Ok(Some(message.payload.clone()))
    }

    fn frames_output(&self) -> bool {
        true
    }
}

/// Encodes the whole message as one JSON line. Line-oriented output carries
/// its own record boundaries, so framing defaults off.
#[derive(Debug, Default)]
pub struct JsonEncoder;

impl MessageEncoder for JsonEncoder {
    fn encode(&self, message: &Message) -> Result<Option<Bytes>> {
        let mut line =
            serde_json::to_vec(message).map_err(|e| Error::Encode(e.to_string()))?;
        line.push(b'\n');
        Ok(Some(Bytes::from(line)))
    }
}
