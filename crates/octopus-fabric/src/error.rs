use thiserror::Error;

/// Errors from event-fabric operations.
#[derive(Error, Debug)]
pub enum FabricError {
    #[error("delivery to topic {topic} failed: {reason}")]
    Delivery { topic: String, reason: String },

    #[error("delivery to topic {topic} not acknowledged within {timeout_ms}ms")]
    DeliveryTimeout { topic: String, timeout_ms: u64 },

    #[error("consumer error during {stage}: {reason}")]
    Consumer { stage: &'static str, reason: String },

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("partition {partition} out of range for topic {topic}")]
    PartitionOutOfRange { topic: String, partition: i32 },

    #[error("broker error: {0}")]
    Broker(String),

    #[error("control plane returned {status}: {message}")]
    ControlPlane { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint URL cannot carry path segments: {0}")]
    OpaqueUrl(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl FabricError {
    pub(crate) fn consumer(stage: &'static str, source: impl std::fmt::Display) -> Self {
        FabricError::Consumer {
            stage,
            reason: source.to_string(),
        }
    }
}

impl From<serde_json::Error> for FabricError {
    fn from(e: serde_json::Error) -> Self {
        FabricError::Serialization(e.to_string())
    }
}
