//! Event Producer.
//!
//! Wraps a shared [`ProducerClient`]. Synchronous publishes wait for the
//! broker acknowledgment (the broker-assigned partition and offset) up to a
//! fixed delivery timeout; asynchronous publishes hand the record to a
//! delivery task and return at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::FabricError;
use crate::traits::ProducerClient;
use crate::types::{OutboundRecord, PublishReceipt};

/// Default upper bound on waiting for a broker acknowledgment.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EventProducer {
    client: Arc<dyn ProducerClient>,
    delivery_timeout: Duration,
    in_flight: Arc<InFlight>,
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    drained: Notify,
}

impl InFlight {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

impl EventProducer {
    pub fn new(client: Arc<dyn ProducerClient>, delivery_timeout: Duration) -> Self {
        Self {
            client,
            delivery_timeout,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Number of asynchronous publishes still awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Publish `record`.
    ///
    /// With `synchronous`, returns [`PublishReceipt::Delivered`] or fails with
    /// [`FabricError::DeliveryTimeout`] / [`FabricError::Delivery`]. Without
    /// it, returns [`PublishReceipt::Queued`] immediately; failures are only
    /// logged.
    pub async fn publish(
        &self,
        record: OutboundRecord,
        synchronous: bool,
    ) -> Result<PublishReceipt, FabricError> {
        if synchronous {
            let topic = record.topic.clone();
            let metadata = deliver(self.client.as_ref(), record, self.delivery_timeout).await?;
            debug!(
                topic = %topic,
                partition = metadata.partition,
                offset = metadata.offset,
                "Record acknowledged"
            );
            return Ok(PublishReceipt::Delivered(metadata));
        }

        let client = self.client.clone();
        let timeout = self.delivery_timeout;
        let in_flight = self.in_flight.clone();
        in_flight.begin();
        tokio::spawn(async move {
            let topic = record.topic.clone();
            if let Err(e) = deliver(client.as_ref(), record, timeout).await {
                warn!(topic = %topic, error = %e, "Queued record was not delivered");
            }
            in_flight.end();
        });
        Ok(PublishReceipt::Queued)
    }

    /// Wait up to `timeout` for every queued record to be acknowledged or
    /// abandoned. Returns whether the queue drained.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let drained = self.in_flight.drained.notified();
                if self.in_flight() == 0 {
                    return;
                }
                drained.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

async fn deliver(
    client: &dyn ProducerClient,
    record: OutboundRecord,
    timeout: Duration,
) -> Result<crate::types::RecordMetadata, FabricError> {
    let topic = record.topic.clone();
    match tokio::time::timeout(timeout, client.send(record)).await {
        Ok(Ok(metadata)) => Ok(metadata),
        Ok(Err(e @ FabricError::Delivery { .. })) | Ok(Err(e @ FabricError::TopicNotFound(_))) => {
            Err(e)
        }
        Ok(Err(e)) => Err(FabricError::Delivery {
            topic,
            reason: e.to_string(),
        }),
        Err(_) => Err(FabricError::DeliveryTimeout {
            topic,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
