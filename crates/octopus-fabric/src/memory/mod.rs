//! In-process broker.
//!
//! A partitioned append-only log with just enough group semantics for the
//! bridge: consumers get every partition of their topic once an optional
//! assignment delay has passed, committed offsets are tracked per group, and
//! every operation can be made to fail on demand. It also plays the control
//! plane (key issuance and topic registration) so a whole bridge can run
//! without external services.

mod partition_log;

pub use partition_log::PartitionLog;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use octopus_session::AccessKey;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::FabricError;
use crate::traits::{ConsumerClient, EventBroker, ProducerClient, TopicRegistry};
use crate::types::{
    ConsumerConfig, Message, OffsetReset, OutboundRecord, RecordMetadata, TopicPartition,
};

/// Partition count for topics created through registration.
pub const DEFAULT_PARTITIONS: i32 = 3;

const MAX_POLL_RECORDS: usize = 500;

/// Broker operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOp {
    Produce,
    CreateConsumer,
    Join,
    EndOffset,
    Seek,
    Poll,
    Close,
    Registry,
}

impl BrokerOp {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

#[derive(Debug, Default)]
struct TopicLog {
    partitions: Vec<PartitionLog>,
    next_partition: usize,
}

impl TopicLog {
    fn new(partitions: i32) -> Self {
        Self {
            partitions: (0..partitions.max(1)).map(|_| PartitionLog::new()).collect(),
            next_partition: 0,
        }
    }

    fn route(&mut self, record: &OutboundRecord) -> Result<usize, FabricError> {
        let count = self.partitions.len();
        match (record.partition, record.key.as_deref()) {
            (Some(p), _) if p >= 0 && (p as usize) < count => Ok(p as usize),
            (Some(p), _) => Err(FabricError::PartitionOutOfRange {
                topic: record.topic.clone(),
                partition: p,
            }),
            (None, Some(key)) => Ok((fnv1a(key.as_bytes()) % count as u64) as usize),
            (None, None) => {
                let p = self.next_partition % count;
                self.next_partition = self.next_partition.wrapping_add(1);
                Ok(p)
            }
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

struct Shared {
    topics: RwLock<HashMap<String, TopicLog>>,
    committed: Mutex<HashMap<(String, TopicPartition), i64>>,
    keys: Mutex<HashMap<String, AccessKey>>,
    appended: Notify,
    faults: AtomicU32,
    ack_delay_ms: AtomicU64,
    assignment_delay_ms: AtomicU64,
    active_consumers: AtomicUsize,
    operations: AtomicUsize,
    default_partitions: i32,
}

impl Shared {
    fn enter(&self, op: BrokerOp) -> Result<(), FabricError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.faults.load(Ordering::SeqCst) & op.bit() != 0 {
            return Err(FabricError::Broker(format!("injected failure on {:?}", op)));
        }
        Ok(())
    }

    async fn authorize(&self, key: &AccessKey) -> Result<(), FabricError> {
        let keys = self.keys.lock().await;
        if keys.values().any(|k| k.access_key == key.access_key && k.secret_key == key.secret_key) {
            Ok(())
        } else {
            Err(FabricError::Broker("access key not recognized".into()))
        }
    }
}

/// Cheaply cloneable handle to one in-process broker.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl MemoryBroker {
    pub fn new(default_partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                topics: RwLock::new(HashMap::new()),
                committed: Mutex::new(HashMap::new()),
                keys: Mutex::new(HashMap::new()),
                appended: Notify::new(),
                faults: AtomicU32::new(0),
                ack_delay_ms: AtomicU64::new(0),
                assignment_delay_ms: AtomicU64::new(0),
                active_consumers: AtomicUsize::new(0),
                operations: AtomicUsize::new(0),
                default_partitions: default_partitions.max(1),
            }),
        }
    }

    /// Create `name` with `partitions` partitions. Existing topics are left
    /// as they are.
    pub async fn create_topic(&self, name: &str, partitions: i32) {
        let mut topics = self.shared.topics.write().await;
        topics
            .entry(name.to_string())
            .or_insert_with(|| TopicLog::new(partitions));
    }

    /// Append a record directly, bypassing credentials, latency and faults.
    pub async fn append(&self, record: OutboundRecord) -> Result<RecordMetadata, FabricError> {
        let mut topics = self.shared.topics.write().await;
        let log = topics
            .get_mut(&record.topic)
            .ok_or_else(|| FabricError::TopicNotFound(record.topic.clone()))?;
        let partition = log.route(&record)?;
        let timestamp = record
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let offset = log.partitions[partition].append(Message {
            topic: record.topic.clone(),
            partition: partition as i32,
            offset: -1,
            key: record.key,
            value: record.value,
            headers: record.headers,
            timestamp,
        });
        drop(topics);
        self.shared.appended.notify_waiters();

        Ok(RecordMetadata {
            topic: record.topic,
            partition: partition as i32,
            offset,
            timestamp,
        })
    }

    /// Issue credentials directly, as a key rotation would.
    pub async fn issue_key(&self, owner: &str) -> AccessKey {
        let key = AccessKey {
            access_key: format!("MEM{}", uuid::Uuid::new_v4().simple()).to_uppercase(),
            secret_key: uuid::Uuid::new_v4().simple().to_string(),
            endpoint: Some("memory://local".into()),
            issued_at: Utc::now(),
        };
        self.shared
            .keys
            .lock()
            .await
            .insert(owner.to_string(), key.clone());
        key
    }

    pub async fn end_offset(&self, tp: &TopicPartition) -> Option<i64> {
        let topics = self.shared.topics.read().await;
        topics
            .get(&tp.topic)
            .and_then(|log| log.partitions.get(tp.partition as usize))
            .map(PartitionLog::high_watermark)
    }

    /// Offset committed by `group` on `tp`, if any.
    pub async fn committed_offset(&self, group: &str, tp: &TopicPartition) -> Option<i64> {
        self.shared
            .committed
            .lock()
            .await
            .get(&(group.to_string(), tp.clone()))
            .copied()
    }

    pub fn fail_on(&self, op: BrokerOp) {
        self.shared.faults.fetch_or(op.bit(), Ordering::SeqCst);
    }

    pub fn clear_faults(&self) {
        self.shared.faults.store(0, Ordering::SeqCst);
    }

    /// Delay applied before every produce acknowledgment.
    pub fn set_ack_delay(&self, delay: Duration) {
        self.shared
            .ack_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Time a new consumer waits before it is given partitions.
    pub fn set_assignment_delay(&self, delay: Duration) {
        self.shared
            .assignment_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Consumers created and not yet closed.
    pub fn active_consumers(&self) -> usize {
        self.shared.active_consumers.load(Ordering::SeqCst)
    }

    /// Every data-plane and control-plane call received so far, including
    /// failed ones.
    pub fn operation_count(&self) -> usize {
        self.shared.operations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBroker for MemoryBroker {
    async fn producer(&self, key: &AccessKey) -> Result<Arc<dyn ProducerClient>, FabricError> {
        self.shared.enter(BrokerOp::Produce)?;
        self.shared.authorize(key).await?;
        Ok(Arc::new(MemoryProducer {
            broker: self.clone(),
        }))
    }

    async fn consumer(
        &self,
        key: &AccessKey,
        config: ConsumerConfig,
    ) -> Result<Box<dyn ConsumerClient>, FabricError> {
        self.shared.enter(BrokerOp::CreateConsumer)?;
        self.shared.authorize(key).await?;
        self.shared.active_consumers.fetch_add(1, Ordering::SeqCst);
        debug!(group_id = %config.group_id, topic = %config.topic, "Memory consumer created");
        Ok(Box::new(MemoryConsumer {
            broker: self.clone(),
            config,
            created_at: Instant::now(),
            assigned: Vec::new(),
            positions: BTreeMap::new(),
            closed: false,
        }))
    }
}

#[async_trait]
impl TopicRegistry for MemoryBroker {
    async fn create_key(&self, bearer: &str) -> Result<AccessKey, FabricError> {
        self.shared.enter(BrokerOp::Registry)?;
        let key = self.issue_key(bearer).await;
        info!(access_key = %key.access_key, "Memory access key issued");
        Ok(key)
    }

    async fn list_topics(&self, _bearer: &str) -> Result<Vec<String>, FabricError> {
        self.shared.enter(BrokerOp::Registry)?;
        let topics = self.shared.topics.read().await;
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn register_topic(&self, _bearer: &str, topic: &str) -> Result<String, FabricError> {
        self.shared.enter(BrokerOp::Registry)?;
        let mut topics = self.shared.topics.write().await;
        if topics.contains_key(topic) {
            return Ok(format!("Topic {} already registered.", topic));
        }
        topics.insert(
            topic.to_string(),
            TopicLog::new(self.shared.default_partitions),
        );
        Ok(format!("Topic {} registered.", topic))
    }

    async fn unregister_topic(&self, _bearer: &str, topic: &str) -> Result<String, FabricError> {
        self.shared.enter(BrokerOp::Registry)?;
        let mut topics = self.shared.topics.write().await;
        match topics.remove(topic) {
            Some(_) => Ok(format!("Topic {} unregistered.", topic)),
            None => Err(FabricError::TopicNotFound(topic.to_string())),
        }
    }
}

struct MemoryProducer {
    broker: MemoryBroker,
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    async fn send(&self, record: OutboundRecord) -> Result<RecordMetadata, FabricError> {
        let shared = &self.broker.shared;
        shared.enter(BrokerOp::Produce)?;
        let delay = shared.ack_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.broker.append(record).await
    }
}

struct MemoryConsumer {
    broker: MemoryBroker,
    config: ConsumerConfig,
    created_at: Instant,
    assigned: Vec<TopicPartition>,
    positions: BTreeMap<TopicPartition, i64>,
    closed: bool,
}

impl MemoryConsumer {
    fn shared(&self) -> &Shared {
        &self.broker.shared
    }

    fn ensure_open(&self, stage: &'static str) -> Result<(), FabricError> {
        if self.closed {
            return Err(FabricError::consumer(stage, "consumer is closed"));
        }
        Ok(())
    }

    async fn assign(&mut self) -> Result<(), FabricError> {
        let partitions = {
            let topics = self.broker.shared.topics.read().await;
            match topics.get(&self.config.topic) {
                Some(log) => log
                    .partitions
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (TopicPartition::new(&self.config.topic, i as i32), p.high_watermark()))
                    .collect::<Vec<_>>(),
                None => return Ok(()),
            }
        };
        let committed = self.broker.shared.committed.lock().await;
        for (tp, end) in partitions {
            let start = committed
                .get(&(self.config.group_id.clone(), tp.clone()))
                .copied()
                .unwrap_or(match self.config.auto_offset_reset {
                    OffsetReset::Earliest => 0,
                    OffsetReset::Latest => end,
                });
            self.positions.insert(tp.clone(), start);
            self.assigned.push(tp);
        }
        Ok(())
    }

    async fn fetch(&mut self) -> Vec<Message> {
        let topics = self.broker.shared.topics.read().await;
        let Some(log) = topics.get(&self.config.topic) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (tp, position) in self.positions.iter_mut() {
            if let Some(partition) = log.partitions.get(tp.partition as usize) {
                let records = partition.read(*position, MAX_POLL_RECORDS);
                *position += records.len() as i64;
                out.extend(records);
            }
        }
        out
    }

    async fn commit_positions(&self) {
        let mut committed = self.shared().committed.lock().await;
        for (tp, position) in &self.positions {
            committed.insert((self.config.group_id.clone(), tp.clone()), *position);
        }
    }
}

#[async_trait]
impl ConsumerClient for MemoryConsumer {
    fn group_id(&self) -> &str {
        &self.config.group_id
    }

    async fn join(&mut self, max_wait: Duration) -> Result<Vec<TopicPartition>, FabricError> {
        self.ensure_open("assignment")?;
        self.shared().enter(BrokerOp::Join)?;
        if !self.assigned.is_empty() {
            return Ok(self.assigned.clone());
        }

        let delay = Duration::from_millis(self.shared().assignment_delay_ms.load(Ordering::SeqCst));
        let ready_at = self.created_at + delay;
        let now = Instant::now();
        if now < ready_at {
            tokio::time::sleep(max_wait.min(ready_at - now)).await;
            if Instant::now() < ready_at {
                return Ok(Vec::new());
            }
        }

        self.assign().await?;
        if self.assigned.is_empty() {
            // Unknown topic: the group stays empty for this round.
            tokio::time::sleep(max_wait).await;
        }
        Ok(self.assigned.clone())
    }

    async fn end_offset(&mut self, tp: &TopicPartition) -> Result<i64, FabricError> {
        self.ensure_open("end offset")?;
        self.shared().enter(BrokerOp::EndOffset)?;
        self.broker
            .end_offset(tp)
            .await
            .ok_or_else(|| FabricError::PartitionOutOfRange {
                topic: tp.topic.clone(),
                partition: tp.partition,
            })
    }

    async fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), FabricError> {
        self.ensure_open("seek")?;
        self.shared().enter(BrokerOp::Seek)?;
        match self.positions.get_mut(tp) {
            Some(position) => {
                *position = offset.max(0);
                Ok(())
            }
            None => Err(FabricError::consumer("seek", format!("{} is not assigned", tp))),
        }
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>, FabricError> {
        self.ensure_open("poll")?;
        self.shared().enter(BrokerOp::Poll)?;
        let deadline = Instant::now() + timeout;
        let broker = self.broker.clone();
        loop {
            let appended = broker.shared.appended.notified();
            let records = self.fetch().await;
            if !records.is_empty() || self.assigned.is_empty() {
                if self.config.enable_auto_commit && !records.is_empty() {
                    self.commit_positions().await;
                }
                return Ok(records);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn close(&mut self) -> Result<(), FabricError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared().active_consumers.fetch_sub(1, Ordering::SeqCst);
        debug!(group_id = %self.config.group_id, "Memory consumer closed");
        self.shared().enter(BrokerOp::Close)
    }
}
