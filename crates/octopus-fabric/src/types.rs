use std::fmt;

use serde::{Deserialize, Serialize};

/// A single partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A record read back from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    /// Milliseconds since the Unix epoch; `-1` when the broker reported none.
    pub timestamp: i64,
}

/// A record to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<String>,
    pub value: String,
    pub headers: Vec<(String, String)>,
    /// Target partition; `None` lets the broker pick by key.
    pub partition: Option<i32>,
    /// Create time in milliseconds; `None` stamps the current time.
    pub timestamp: Option<i64>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            headers: Vec::new(),
            partition: None,
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }
}

/// Broker acknowledgment of a published record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
}

/// Outcome of [`EventProducer::publish`](crate::EventProducer::publish).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishReceipt {
    /// The broker acknowledged the record.
    Delivered(RecordMetadata),
    /// The record was handed to the producer; delivery is not reported.
    Queued,
}

impl fmt::Display for PublishReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishReceipt::Delivered(md) => {
                write!(f, "partition={}, offset={}", md.partition, md.offset)
            }
            PublishReceipt::Queued => f.write_str("queued"),
        }
    }
}

/// Where a consumer starts when its group has no committed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Settings for creating a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group_id: String,
    pub enable_auto_commit: bool,
    pub auto_offset_reset: OffsetReset,
}

impl ConsumerConfig {
    /// A throwaway consumer: unique group, no commits, start at the end.
    pub fn ephemeral(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group_id: format!("peek-{}", uuid::Uuid::new_v4()),
            enable_auto_commit: false,
            auto_offset_reset: OffsetReset::Latest,
        }
    }
}
