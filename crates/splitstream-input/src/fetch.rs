//! Range-Fetch Worker Pool
//!
//! Workers consume message locations and issue byte-range reads for the
//! half-open interval `[offset, offset + length)`, which addresses exactly
//! the record payload as laid out by the writer. A successful body of
//! exactly `length` bytes is delivered downstream; transport errors and
//! short bodies are retried with a plain loop.
//!
//! On cancellation a worker drains the location queue without dispatching
//! new fetches, so the index reader - which blocks on in-flight permits -
//! can always finish.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;
use tokio_util::sync::CancellationToken;

use crate::counters::InputCounters;
use crate::error::{Error, Result};
use crate::offset::{LocationTicket, MessageLocation};
use crate::sink::RecordSink;

pub(crate) async fn location_fetch_loop(
    store: Arc<dyn ObjectStore>,
    counters: Arc<InputCounters>,
    sink: Arc<dyn RecordSink>,
    rx: flume::Receiver<LocationTicket>,
    stop: CancellationToken,
    retries: u32,
    worker: usize,
) {
    loop {
        tokio::select! {
            biased;
            ticket = rx.recv_async() => match ticket {
                Ok(ticket) => fetch_one(&store, &counters, sink.as_ref(), ticket, retries).await,
                Err(_) => break,
            },
            _ = stop.cancelled() => {
                // Drain pending locations (releasing their permits) so the
                // index reader can finish, then exit.
                while rx.try_recv().is_ok() {}
                break;
            }
        }
    }
    tracing::debug!(worker, "offset fetcher exiting");
}

async fn fetch_one(
    store: &Arc<dyn ObjectStore>,
    counters: &InputCounters,
    sink: &dyn RecordSink,
    ticket: LocationTicket,
    retries: u32,
) {
    let location = &ticket.location;
    counters.inc_message_count();
    counters.add_message_bytes(location.length as u64);

    let started = Instant::now();
    match fetch_location(store, location, retries).await {
        Ok(record) => {
            sink.deliver(record).await;
            tracing::info!(
                key = %location.key,
                seconds = %format!("{:.2}", started.elapsed().as_secs_f64()),
                "successfully fetched record"
            );
        }
        Err(e) => {
            counters.inc_message_failures();
            tracing::error!(
                key = %location.key,
                offset = location.offset,
                length = location.length,
                error = %e,
                "failed to fetch record"
            );
        }
    }
    // The ticket drops here, releasing its in-flight permit.
}

/// One byte-range read with a plain retry loop. Returns exactly
/// `location.length` bytes or the last error.
pub(crate) async fn fetch_location(
    store: &Arc<dyn ObjectStore>,
    location: &MessageLocation,
    retries: u32,
) -> Result<Bytes> {
    let path = Path::from(location.key.as_str());
    let start = location.offset as usize;
    let end = start + location.length as usize;
    let attempts = retries.max(1);

    for attempt in 1..=attempts {
        match store.get_range(&path, start..end).await {
            Ok(body) if body.len() == location.length as usize => return Ok(body),
            Ok(body) => {
                let err = Error::ShortFetch {
                    key: location.key.clone(),
                    expected: location.length,
                    actual: body.len(),
                };
                if attempt == attempts {
                    return Err(err);
                }
                tracing::warn!(attempt, key = %location.key, error = %err, "error fetching record");
            }
            Err(e) => {
                if attempt == attempts {
                    return Err(e.into());
                }
                tracing::warn!(attempt, key = %location.key, error = %e, "error fetching record");
            }
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    async fn store_with(key: &str, data: &[u8]) -> Arc<dyn ObjectStore> {
        let store = InMemory::new();
        store
            .put(&Path::from(key), Bytes::copy_from_slice(data).into())
            .await
            .unwrap();
        Arc::new(store)
    }

    fn loc(key: &str, offset: u32, length: u32) -> MessageLocation {
        MessageLocation {
            key: key.to_string(),
            offset,
            length,
        }
    }

    #[tokio::test]
    async fn test_fetch_exact_range() {
        let store = store_with("obj", b"0123456789").await;
        let body = fetch_location(&store, &loc("obj", 2, 5), 3).await.unwrap();
        assert_eq!(body, Bytes::from("23456"));
    }

    #[tokio::test]
    async fn test_fetch_full_object() {
        let store = store_with("obj", b"abcdef").await;
        let body = fetch_location(&store, &loc("obj", 0, 6), 1).await.unwrap();
        assert_eq!(body, Bytes::from("abcdef"));
    }

    #[tokio::test]
    async fn test_fetch_missing_key_errors_after_retries() {
        let store = store_with("obj", b"abcdef").await;
        let err = fetch_location(&store, &loc("absent", 0, 4), 2).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_fetch_past_eof_errors() {
        let store = store_with("obj", b"abc").await;
        assert!(fetch_location(&store, &loc("obj", 0, 100), 1).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let store = store_with("obj", b"abc").await;
        let body = fetch_location(&store, &loc("obj", 0, 3), 0).await.unwrap();
        assert_eq!(body, Bytes::from("abc"));
    }
}
