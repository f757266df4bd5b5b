//! Splitstream output engine
//!
//! Splits an incoming stream of messages into per-dimension files and
//! publishes rotated files to an object store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   unbounded feed   ┌──────────────────────────────┐
//! │ upstream │ ─────────────────▶ │ receiver                     │
//! └──────────┘                    │  - dimension projection      │
//!                                 │  - current-file table        │
//!                                 │  - open-file LRU             │
//!                                 │  - size/age rotation         │
//!                                 └──────────────┬───────────────┘
//!                                                │ publish queue (bounded)
//!                                 ┌──────────────┴───────────────┐
//!                                 │ publisher pool (W workers)   │
//!                                 │  - upload with bounded retry │
//!                                 │  - delete local on success   │
//!                                 └──────────────────────────────┘
//! ```
//!
//! Every successfully encoded message is written to exactly one finalized
//! file; file sizes exceed `max_file_size` by at most one message; messages
//! for the same dimension path keep their arrival order.

pub mod config;
pub mod counters;
pub mod error;
pub mod file_cache;
pub mod output;
pub mod publisher;
pub mod writer;

pub use config::OutputConfig;
pub use counters::{OutputCounters, OutputMetrics};
pub use error::{Error, Result};
pub use file_cache::OpenFileCache;
pub use output::SplitFileOutput;
pub use publisher::PublishAttempt;
pub use writer::{CURRENT_DIR, FINALIZED_DIR};
