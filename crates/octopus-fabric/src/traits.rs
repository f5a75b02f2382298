use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use octopus_session::AccessKey;

use crate::error::FabricError;
use crate::types::{ConsumerConfig, Message, OutboundRecord, RecordMetadata, TopicPartition};

/// A connection that publishes records. Shared across calls, so
/// implementations must be safe for concurrent `send`s.
#[async_trait]
pub trait ProducerClient: Send + Sync {
    /// Publish one record and wait for the broker's acknowledgment.
    async fn send(&self, record: OutboundRecord) -> Result<RecordMetadata, FabricError>;
}

/// A single consumer-group member bound to one topic.
#[async_trait]
pub trait ConsumerClient: Send {
    fn group_id(&self) -> &str;

    /// Drive group membership for up to `max_wait` and return the partitions
    /// currently assigned (possibly none yet).
    async fn join(&mut self, max_wait: Duration) -> Result<Vec<TopicPartition>, FabricError>;

    /// One past the offset of the last record in `tp`.
    async fn end_offset(&mut self, tp: &TopicPartition) -> Result<i64, FabricError>;

    /// Move this consumer's read position on an assigned partition.
    async fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), FabricError>;

    /// Fetch whatever is available across assigned partitions, waiting up to
    /// `timeout` for the first record.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>, FabricError>;

    /// Leave the group and release broker-side resources.
    async fn close(&mut self) -> Result<(), FabricError>;
}

/// Data-plane entry point of a broker.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Open a producer authenticated with a rotated key.
    async fn producer(&self, key: &AccessKey) -> Result<Arc<dyn ProducerClient>, FabricError>;

    /// Create a consumer authenticated with a rotated key.
    async fn consumer(
        &self,
        key: &AccessKey,
        config: ConsumerConfig,
    ) -> Result<Box<dyn ConsumerClient>, FabricError>;
}

/// Control plane of the fabric service: key rotation and topic registration.
/// Every call carries the session's bearer token.
#[async_trait]
pub trait TopicRegistry: Send + Sync {
    /// Rotate and return the broker credentials for the calling identity.
    async fn create_key(&self, bearer: &str) -> Result<AccessKey, FabricError>;

    async fn list_topics(&self, bearer: &str) -> Result<Vec<String>, FabricError>;

    async fn register_topic(&self, bearer: &str, topic: &str) -> Result<String, FabricError>;

    async fn unregister_topic(&self, bearer: &str, topic: &str) -> Result<String, FabricError>;
}
