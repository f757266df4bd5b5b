//! SQS-Bridge Input
//!
//! Consumes S3 event notifications from an SQS queue: each notification
//! names a `(bucket, key)` pair, the object is streamed through the
//! splitter, and the notification is deleted once the stream reaches a
//! clean end of file.
//!
//! Failure handling follows the notification lifecycle:
//! - `NoSuchBucket` / `NoSuchKey`: the notification can never succeed, so
//!   it is deleted as poison
//! - any other error: the notification is left alone and SQS redelivers it
//!   after the visibility timeout
//!
//! The bridge talks to AWS directly (queue APIs and per-notification
//! bucket selection are outside the object-store abstraction used
//! elsewhere).

use std::sync::Arc;

use aws_sdk_s3::error::ProvideErrorMetadata;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use splitstream_core::SplitEvent;

use crate::counters::{InputCounters, InputMetrics};
use crate::error::{Error, Result};
use crate::sink::RecordSink;
use crate::stream::split_records;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqsBridgeConfig {
    /// Queue name to consume notifications from.
    pub sqs_queue: String,

    #[serde(default = "default_region")]
    pub aws_region: String,

    /// Long-poll wait, clamped to SQS's 0-20 second range (default 20).
    #[serde(default = "default_wait_time")]
    pub wait_time_seconds: i32,

    /// How long a received notification stays invisible before redelivery
    /// (default 30).
    #[serde(default = "default_visibility")]
    pub visibility_timeout: i32,
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_wait_time() -> i32 {
    20
}

fn default_visibility() -> i32 {
    30
}

/// S3 event notification body, pared down to the fields the bridge needs.
#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Extract `(bucket, key)` from a notification body.
fn parse_notification(body: &str) -> Result<(String, String)> {
    let notification: Notification =
        serde_json::from_str(body).map_err(|e| Error::Notification(e.to_string()))?;
    let record = notification
        .records
        .into_iter()
        .next()
        .ok_or_else(|| Error::Notification("no records in notification".to_string()))?;
    Ok((record.s3.bucket.name, record.s3.object.key))
}

fn is_not_found<E, R>(err: &aws_sdk_s3::error::SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    matches!(err.code(), Some("NoSuchBucket") | Some("NoSuchKey"))
}

pub struct SqsBridge {
    sqs: aws_sdk_sqs::Client,
    s3: aws_sdk_s3::Client,
    queue_url: String,
    wait_time_seconds: i32,
    visibility_timeout: i32,
    counters: Arc<InputCounters>,
}

impl SqsBridge {
    /// Wire the bridge onto pre-built clients.
    pub fn new(
        sqs: aws_sdk_sqs::Client,
        s3: aws_sdk_s3::Client,
        queue_url: String,
        config: &SqsBridgeConfig,
    ) -> Self {
        Self {
            sqs,
            s3,
            queue_url,
            wait_time_seconds: config.wait_time_seconds.clamp(0, 20),
            visibility_timeout: config.visibility_timeout,
            counters: Arc::new(InputCounters::default()),
        }
    }

    /// Load ambient AWS credentials and resolve the queue URL.
    pub async fn connect(config: SqsBridgeConfig) -> Result<Self> {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.aws_region.clone()))
            .load()
            .await;
        let sqs = aws_sdk_sqs::Client::new(&shared);
        let s3 = aws_sdk_s3::Client::new(&shared);
        let queue_url = sqs
            .get_queue_url()
            .queue_name(&config.sqs_queue)
            .send()
            .await
            .map_err(|e| Error::Sqs(e.to_string()))?
            .queue_url()
            .ok_or_else(|| Error::Sqs(format!("no URL for queue '{}'", config.sqs_queue)))?
            .to_string();
        Ok(Self::new(sqs, s3, queue_url, &config))
    }

    pub fn metrics(&self) -> InputMetrics {
        self.counters.snapshot()
    }

    /// Long-poll the queue until `stop` fires.
    pub async fn run(&self, sink: Arc<dyn RecordSink>, stop: CancellationToken) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                result = self.poll_once(sink.as_ref()) => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "error processing notification");
                    }
                }
            }
        }
    }

    /// Receive at most one notification and process it.
    async fn poll_once(&self, sink: &dyn RecordSink) -> Result<()> {
        let response = self
            .sqs
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(self.wait_time_seconds)
            .visibility_timeout(self.visibility_timeout)
            .send()
            .await
            .map_err(|e| Error::Sqs(e.to_string()))?;

        let Some(message) = response.messages.unwrap_or_default().into_iter().next() else {
            return Ok(());
        };
        let receipt = message.receipt_handle().map(str::to_string);
        let (bucket, key) = parse_notification(message.body().unwrap_or_default())?;

        match self.s3.get_object().bucket(&bucket).key(&key).send().await {
            Ok(object) => {
                self.counters.inc_file_count();
                let clean = self.split_object(sink, &bucket, &key, object).await;
                if clean {
                    self.delete_notification(receipt).await;
                } else {
                    self.counters.inc_file_failures();
                }
                Ok(())
            }
            Err(e) => {
                if is_not_found(&e) {
                    // The object will never appear; the notification is
                    // poison.
                    tracing::warn!(bucket = %bucket, key = %key, "object not found, deleting notification");
                    self.delete_notification(receipt).await;
                    Ok(())
                } else {
                    // Leave the notification for redelivery.
                    Err(Error::Sqs(format!(
                        "error opening s3://{}/{}: {}",
                        bucket, key, e
                    )))
                }
            }
        }
    }

    /// Stream the object through the splitter. Returns whether the stream
    /// reached a clean end.
    async fn split_object(
        &self,
        sink: &dyn RecordSink,
        bucket: &str,
        key: &str,
        object: aws_sdk_s3::operation::get_object::GetObjectOutput,
    ) -> bool {
        let mut records = split_records(object.body.into_async_read());
        while let Some(event) = records.next().await {
            match event {
                Ok(SplitEvent::Record { payload, .. }) => {
                    self.counters.inc_message_count();
                    self.counters.add_message_bytes(payload.len() as u64);
                    sink.deliver(payload).await;
                }
                Ok(SplitEvent::Oversize { declared }) => {
                    self.counters.inc_message_failures();
                    tracing::error!(
                        bucket = %bucket,
                        key = %key,
                        declared,
                        "record exceeds maximum record size, skipping"
                    );
                }
                Ok(SplitEvent::Trailing { bytes }) => {
                    self.counters.add_remaining_bytes(bytes as u64);
                    tracing::error!(
                        bucket = %bucket,
                        key = %key,
                        bytes,
                        "trailing data, possible corruption"
                    );
                }
                Err(e) => {
                    tracing::error!(bucket = %bucket, key = %key, error = %e, "error reading object");
                    return false;
                }
            }
        }
        true
    }

    async fn delete_notification(&self, receipt: Option<String>) {
        let Some(receipt) = receipt else { return };
        if let Err(e) = self
            .sqs
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&receipt)
            .send()
            .await
        {
            tracing::error!(error = %e, "error deleting notification");
        }
    }
}
