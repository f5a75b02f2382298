//! Latest-event reads against the in-process broker.

use std::sync::Arc;
use std::time::Duration;

use octopus_fabric::{
    BrokerOp, ConsumerClient, ConsumerConfig, EventBroker, FabricError, LatestEventConsumer, MemoryBroker,
    OffsetReset, OutboundRecord, TopicPartition,
};
use octopus_session::AccessKey;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn setup(partitions: i32) -> (MemoryBroker, AccessKey, LatestEventConsumer) {
    let broker = MemoryBroker::default();
    broker.create_topic("events", partitions).await;
    let key = broker.issue_key("tester").await;
    let reader = LatestEventConsumer::new(Arc::new(broker.clone()));
    (broker, key, reader)
}

async fn put(broker: &MemoryBroker, partition: i32, value: &str, timestamp: i64) {
    broker
        .append(
            OutboundRecord::new("events", value)
                .with_partition(partition)
                .with_timestamp(timestamp),
        )
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_topic_returns_none_and_releases_consumer() {
    let (broker, key, reader) = setup(3).await;

    let newest = reader.peek_latest(&key, "events", TIMEOUT).await.unwrap();
    assert!(newest.is_none());
    assert_eq!(broker.active_consumers(), 0);
}

#[tokio::test(start_paused = true)]
async fn recency_across_partitions_is_by_timestamp() {
    let (broker, key, reader) = setup(2).await;
    put(&broker, 0, "older", 100).await;
    put(&broker, 1, "newer", 200).await;

    let newest = reader
        .peek_latest(&key, "events", TIMEOUT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(newest.partition, 1);
    assert_eq!(newest.value, "newer");
    assert_eq!(newest.timestamp, 200);
    assert_eq!(broker.active_consumers(), 0);
}

#[tokio::test(start_paused = true)]
async fn equal_timestamps_keep_first_seen() {
    let (broker, key, reader) = setup(2).await;
    put(&broker, 0, "first", 50).await;
    put(&broker, 1, "second", 50).await;

    let newest = reader
        .peek_latest(&key, "events", TIMEOUT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(newest.partition, 0);
    assert_eq!(newest.value, "first");
}

#[tokio::test(start_paused = true)]
async fn only_the_last_record_of_each_partition_is_read() {
    let (broker, key, reader) = setup(1).await;
    // Earlier offsets carry larger timestamps; they must never be fetched.
    put(&broker, 0, "a", 300).await;
    put(&broker, 0, "b", 200).await;
    put(&broker, 0, "c", 100).await;

    let newest = reader
        .peek_latest(&key, "events", TIMEOUT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(newest.offset, 2);
    assert_eq!(newest.value, "c");
}

#[tokio::test(start_paused = true)]
async fn broker_failure_is_consumer_error_and_consumer_is_closed() {
    for op in [BrokerOp::Join, BrokerOp::EndOffset, BrokerOp::Seek, BrokerOp::Poll] {
        let (broker, key, reader) = setup(2).await;
        put(&broker, 0, "v", 1).await;
        broker.fail_on(op);

        let err = reader
            .peek_latest(&key, "events", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::Consumer { .. }), "{:?}: {}", op, err);
        assert_eq!(broker.active_consumers(), 0, "{:?}", op);
    }
}

#[tokio::test(start_paused = true)]
async fn failed_close_still_returns_the_record() {
    let (broker, key, reader) = setup(1).await;
    put(&broker, 0, "v", 1).await;
    broker.fail_on(BrokerOp::Close);

    let newest = reader.peek_latest(&key, "events", TIMEOUT).await.unwrap();
    assert_eq!(newest.map(|m| m.value).as_deref(), Some("v"));
    assert_eq!(broker.active_consumers(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_topic_returns_none_after_assignment_timeout() {
    let (broker, key, reader) = setup(1).await;

    let started = tokio::time::Instant::now();
    let newest = reader
        .peek_latest(&key, "no-such-topic", Duration::from_secs(2))
        .await
        .unwrap();
    assert!(newest.is_none());
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(broker.active_consumers(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_assignment_within_timeout_still_reads() {
    let (broker, key, reader) = setup(1).await;
    put(&broker, 0, "late", 7).await;
    broker.set_assignment_delay(Duration::from_millis(750));

    let newest = reader.peek_latest(&key, "events", TIMEOUT).await.unwrap();
    assert_eq!(newest.map(|m| m.value).as_deref(), Some("late"));
}

#[tokio::test(start_paused = true)]
async fn assignment_slower_than_timeout_returns_none() {
    let (broker, key, reader) = setup(1).await;
    put(&broker, 0, "v", 7).await;
    broker.set_assignment_delay(Duration::from_secs(30));

    let newest = reader
        .peek_latest(&key, "events", Duration::from_secs(1))
        .await
        .unwrap();
    assert!(newest.is_none());
    assert_eq!(broker.active_consumers(), 0);
}

#[tokio::test(start_paused = true)]
async fn peek_leaves_other_groups_offsets_alone() {
    let (broker, key, reader) = setup(1).await;
    put(&broker, 0, "a", 1).await;
    put(&broker, 0, "b", 2).await;

    let mut archiver = broker
        .consumer(
            &key,
            ConsumerConfig {
                topic: "events".into(),
                group_id: "archiver".into(),
                enable_auto_commit: true,
                auto_offset_reset: OffsetReset::Earliest,
            },
        )
        .await
        .unwrap();
    archiver.join(Duration::from_millis(100)).await.unwrap();
    assert_eq!(archiver.poll(Duration::from_millis(100)).await.unwrap().len(), 2);
    archiver.close().await.unwrap();

    let tp = TopicPartition::new("events", 0);
    assert_eq!(broker.committed_offset("archiver", &tp).await, Some(2));

    put(&broker, 0, "c", 3).await;
    let newest = reader.peek_latest(&key, "events", TIMEOUT).await.unwrap();
    assert_eq!(newest.map(|m| m.value).as_deref(), Some("c"));
    assert_eq!(broker.committed_offset("archiver", &tp).await, Some(2));
}

#[tokio::test(start_paused = true)]
async fn cancelled_peek_still_closes_its_consumer() {
    let (broker, key, reader) = setup(1).await;
    broker.set_assignment_delay(Duration::from_secs(60));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        reader.peek_latest(&key, "events", TIMEOUT),
    )
    .await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(broker.active_consumers(), 0);
}
