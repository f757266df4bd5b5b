//! Splitstream input engines
//!
//! Three ways to get records back out of the object store:
//!
//! - [`SplitFileInput`]: walk the dimension hierarchy under a prefix
//!   (pruned by the schema), stream every matching object through the
//!   splitter, and deliver each record to a [`RecordSink`]
//! - [`OffsetInput`]: read offset-index files mapping
//!   `clientId → (key, offset, length)` and fan out byte-range fetches to
//!   reconstruct per-client record streams
//! - [`SqsBridge`]: consume S3 event notifications from SQS and stream
//!   each named object as it lands
//!
//! ## Pipelines
//!
//! ```text
//! listing:  prefix ─▶ lister ─▶ key queue ─▶ W fetchers ─▶ splitter ─▶ sink
//! indexed:  index file(s) ─▶ location queue ─▶ W fetchers ─▶ sink
//! bridged:  SQS ─▶ (bucket, key) ─▶ splitter ─▶ sink
//! ```
//!
//! All hand-off queues are bounded; a single cancellation token fans out to
//! every task, and fetcher pools drain their queues on cancellation so
//! nothing deadlocks on the in-flight cap.

pub mod counters;
pub mod error;
pub mod fetch;
pub mod input;
pub mod list;
pub mod offset;
pub mod sink;
pub mod sqs;
pub mod stream;

pub use counters::{InputCounters, InputMetrics};
pub use error::{Error, Result};
pub use input::{InputConfig, SplitFileInput};
pub use list::{iterate, ListPage, ObjectEntry, PagedLister, StoreLister, LIST_BATCH_SIZE};
pub use offset::{MessageLocation, OffsetConfig, OffsetInput, LOCATION_QUEUE_DEPTH, MAX_IN_FLIGHT};
pub use sink::RecordSink;
pub use sqs::{SqsBridge, SqsBridgeConfig};
pub use stream::{open_object, split_records};
