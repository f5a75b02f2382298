//! Latest-Event Consumer.
//!
//! Finds the most recent record on a topic without scanning its history:
//!
//! 1. create a consumer under a fresh group id (no auto-commit, reset to
//!    latest as a fallback only),
//! 2. wait, bounded by the timeout, for a partition assignment,
//! 3. seek every non-empty assigned partition to `end_offset - 1`,
//! 4. poll exactly once,
//! 5. keep the record with the greatest timestamp (first seen wins ties),
//! 6. close the consumer on every exit path.
//!
//! Cost is proportional to the partition count, not to the topic's size.

use std::sync::Arc;
use std::time::Duration;

use octopus_session::AccessKey;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FabricError;
use crate::traits::{ConsumerClient, EventBroker};
use crate::types::{ConsumerConfig, Message, TopicPartition};

/// Default bound for assignment and for the single poll.
pub const DEFAULT_PEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest single membership round while waiting for an assignment.
pub const JOIN_INTERVAL: Duration = Duration::from_millis(100);

/// Extra time allowed past the poll timeout before a poll is abandoned.
pub(crate) const POLL_GRACE: Duration = Duration::from_secs(1);

/// Exclusive ownership of one consumer. Dropping an unreleased lease (for
/// instance when the surrounding future is cancelled) closes the consumer
/// on the runtime in the background.
pub struct ConsumerLease {
    client: Option<Box<dyn ConsumerClient>>,
    group_id: String,
}

impl ConsumerLease {
    pub fn new(client: Box<dyn ConsumerClient>) -> Self {
        let group_id = client.group_id().to_string();
        Self {
            client: Some(client),
            group_id,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn client(&mut self) -> Result<&mut Box<dyn ConsumerClient>, FabricError> {
        self.client
            .as_mut()
            .ok_or_else(|| FabricError::consumer("lease", "consumer already closed"))
    }

    /// Close the consumer now.
    pub async fn release(mut self) -> Result<(), FabricError> {
        match self.client.take() {
            Some(mut client) => client.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for ConsumerLease {
    fn drop(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };
        let group_id = std::mem::take(&mut self.group_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.close().await {
                        warn!(group_id = %group_id, error = %e, "Deferred consumer close failed");
                    }
                });
            }
            Err(_) => {
                warn!(group_id = %group_id, "Consumer dropped outside a runtime; left for broker session expiry");
            }
        }
    }
}

/// Single-shot "peek the newest record" reader.
pub struct LatestEventConsumer {
    broker: Arc<dyn EventBroker>,
}

impl LatestEventConsumer {
    pub fn new(broker: Arc<dyn EventBroker>) -> Self {
        Self { broker }
    }

    /// Return the newest record on `topic`, or `None` when nothing was
    /// observed within `timeout`.
    pub async fn peek_latest(
        &self,
        key: &AccessKey,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Message>, FabricError> {
        let config = ConsumerConfig::ephemeral(topic);
        let client = self
            .broker
            .consumer(key, config)
            .await
            .map_err(|e| FabricError::consumer("create", e))?;

        let mut lease = ConsumerLease::new(client);
        debug!(topic, group_id = lease.group_id(), "Peek consumer created");

        let outcome = self.peek_with(&mut lease, timeout).await;
        let group_id = lease.group_id().to_string();
        if let Err(e) = lease.release().await {
            warn!(group_id = %group_id, error = %e, "Peek consumer close failed");
        }
        outcome
    }

    async fn peek_with(
        &self,
        lease: &mut ConsumerLease,
        timeout: Duration,
    ) -> Result<Option<Message>, FabricError> {
        let Some(assigned) = self.await_assignment(lease, timeout).await? else {
            debug!(group_id = lease.group_id(), "No partition assigned before timeout");
            return Ok(None);
        };
        let client = lease.client()?;

        for tp in &assigned {
            let end = tokio::time::timeout(timeout, client.end_offset(tp))
                .await
                .map_err(|_| FabricError::consumer("end offset", format!("{} timed out", tp)))?
                .map_err(|e| FabricError::consumer("end offset", e))?;
            if end > 0 {
                tokio::time::timeout(timeout, client.seek(tp, end - 1))
                    .await
                    .map_err(|_| FabricError::consumer("seek", format!("{} timed out", tp)))?
                    .map_err(|e| FabricError::consumer("seek", e))?;
            }
            debug!(partition = %tp, end_offset = end, "Partition positioned");
        }

        let records = match tokio::time::timeout(timeout + POLL_GRACE, client.poll(timeout)).await
        {
            Ok(result) => result.map_err(|e| FabricError::consumer("poll", e))?,
            Err(_) => Vec::new(),
        };
        debug!(
            partitions = assigned.len(),
            records = records.len(),
            "Peek poll finished"
        );
        Ok(newest_by_timestamp(records))
    }

    async fn await_assignment(
        &self,
        lease: &mut ConsumerLease,
        timeout: Duration,
    ) -> Result<Option<Vec<TopicPartition>>, FabricError> {
        let deadline = Instant::now() + timeout;
        let client = lease.client()?;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(JOIN_INTERVAL);
            match tokio::time::timeout_at(deadline, client.join(wait)).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => return Err(FabricError::consumer("assignment", e)),
                Ok(Ok(assigned)) if !assigned.is_empty() => return Ok(Some(assigned)),
                Ok(Ok(_)) => continue,
            }
        }
    }
}

/// The record with the greatest timestamp; on equal timestamps the earliest
/// in iteration order wins.
pub fn newest_by_timestamp<I>(records: I) -> Option<Message>
where
    I: IntoIterator<Item = Message>,
{
    records.into_iter().fold(None, |newest, record| match newest {
        Some(current) if record.timestamp <= current.timestamp => Some(current),
        _ => Some(record),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn msg(partition: i32, offset: i64, timestamp: i64) -> Message {
        Message {
            topic: "t".into(),
            partition,
            offset,
            key: None,
            value: format!("p{}o{}", partition, offset),
            headers: vec![],
            timestamp,
        }
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(newest_by_timestamp(Vec::new()).is_none());
    }

    #[test]
    fn picks_greatest_timestamp_across_partitions() {
        let newest = newest_by_timestamp(vec![msg(0, 9, 100), msg(1, 3, 200)]).unwrap();
        assert_eq!(newest.partition, 1);
        assert_eq!(newest.timestamp, 200);
    }

    #[test]
    fn ties_keep_first_seen() {
        let newest = newest_by_timestamp(vec![msg(0, 1, 50), msg(1, 1, 50), msg(2, 1, 50)]).unwrap();
        assert_eq!(newest.partition, 0);
    }

    proptest! {
        #[test]
        fn result_is_first_maximum(timestamps in proptest::collection::vec(-1i64..1_000, 1..40)) {
            let records: Vec<Message> = timestamps
                .iter()
                .enumerate()
                .map(|(i, ts)| msg(i as i32, 0, *ts))
                .collect();
            let max = *timestamps.iter().max().unwrap();
            let first = timestamps.iter().position(|ts| *ts == max).unwrap();

            let newest = newest_by_timestamp(records).unwrap();
            prop_assert_eq!(newest.timestamp, max);
            prop_assert_eq!(newest.partition, first as i32);
        }
    }
}
