//! Event-fabric clients for the bridge.
//!
//! [`EventProducer`] publishes records through a shared [`ProducerClient`];
//! [`LatestEventConsumer`] answers "what is the newest record on this topic"
//! with a throwaway consumer. Both sit on the [`EventBroker`] trait, which
//! has an in-process implementation ([`MemoryBroker`]) and a Kafka REST proxy
//! implementation ([`RestProxyBroker`]). Key rotation and topic registration
//! go through [`TopicRegistry`], implemented over HTTP by
//! [`HttpFabricService`] and in-process by [`MemoryBroker`].

#![deny(unsafe_code)]

pub mod consumer;
mod endpoint;
pub mod error;
pub mod memory;
pub mod producer;
pub mod rest;
pub mod service;
pub mod traits;
pub mod types;

pub use consumer::{newest_by_timestamp, ConsumerLease, LatestEventConsumer, DEFAULT_PEEK_TIMEOUT};
pub use error::FabricError;
pub use memory::{BrokerOp, MemoryBroker, DEFAULT_PARTITIONS};
pub use producer::{EventProducer, DEFAULT_DELIVERY_TIMEOUT};
pub use rest::RestProxyBroker;
pub use service::HttpFabricService;
pub use traits::{ConsumerClient, EventBroker, ProducerClient, TopicRegistry};
pub use types::{
    ConsumerConfig, Message, OffsetReset, OutboundRecord, PublishReceipt, RecordMetadata,
    TopicPartition,
};
