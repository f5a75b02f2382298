//! Broker access through a Kafka REST proxy.
//!
//! Produce goes through the v3 records API; consumers are v2 consumer
//! instances in binary format. Both authenticate with the rotated key as
//! HTTP basic credentials.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::DateTime;
use octopus_session::AccessKey;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::consumer::POLL_GRACE;
use crate::endpoint::endpoint;
use crate::error::FabricError;
use crate::traits::{ConsumerClient, EventBroker, ProducerClient};
use crate::types::{ConsumerConfig, Message, OutboundRecord, RecordMetadata, TopicPartition};

const V2_JSON: &str = "application/vnd.kafka.v2+json";
const V2_BINARY: &str = "application/vnd.kafka.binary.v2+json";

struct Inner {
    client: Client,
    base_url: Url,
    cluster_id: OnceCell<String>,
}

impl Inner {
    fn url(&self, segments: &[&str]) -> Result<Url, FabricError> {
        endpoint(&self.base_url, segments)
    }

    async fn cluster_id(&self, key: &AccessKey) -> Result<&str, FabricError> {
        let id = self
            .cluster_id
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .get(self.url(&["v3", "clusters"])?)
                    .basic_auth(&key.access_key, Some(&key.secret_key))
                    .send()
                    .await?;
                let clusters: ClusterList = expect_json(response).await?;
                clusters
                    .data
                    .into_iter()
                    .next()
                    .map(|c| c.cluster_id)
                    .ok_or_else(|| FabricError::Broker("REST proxy reports no cluster".into()))
            })
            .await?;
        Ok(id.as_str())
    }
}

/// [`EventBroker`] backed by a Kafka REST proxy.
#[derive(Clone)]
pub struct RestProxyBroker {
    inner: Arc<Inner>,
}

impl RestProxyBroker {
    pub fn new(proxy_url: &str, timeout: Duration) -> Result<Self, FabricError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = Url::parse(&format!("{}/", proxy_url.trim_end_matches('/')))?;
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url,
                cluster_id: OnceCell::new(),
            }),
        })
    }
}

#[async_trait]
impl EventBroker for RestProxyBroker {
    async fn producer(&self, key: &AccessKey) -> Result<Arc<dyn ProducerClient>, FabricError> {
        self.inner.cluster_id(key).await?;
        Ok(Arc::new(RestProducer {
            inner: self.inner.clone(),
            key: key.clone(),
        }))
    }

    async fn consumer(
        &self,
        key: &AccessKey,
        config: ConsumerConfig,
    ) -> Result<Box<dyn ConsumerClient>, FabricError> {
        let request = CreateInstance {
            name: format!("{}-member", config.group_id),
            format: "binary",
            auto_offset_reset: config.auto_offset_reset.as_str(),
            auto_commit_enable: if config.enable_auto_commit { "true" } else { "false" },
        };
        let url = self.inner.url(&["consumers", &config.group_id])?;
        let response = self
            .inner
            .client
            .post(url)
            .basic_auth(&key.access_key, Some(&key.secret_key))
            .header(reqwest::header::CONTENT_TYPE, V2_JSON)
            .json(&request)
            .send()
            .await?;
        let created: CreatedInstance = expect_json(response).await?;
        let base_uri = Url::parse(&format!("{}/", created.base_uri.trim_end_matches('/')))?;
        debug!(group_id = %config.group_id, instance = %created.instance_id, "REST consumer instance created");

        let consumer = RestConsumer {
            inner: self.inner.clone(),
            key: key.clone(),
            base_uri,
            config,
            subscribed: false,
            closed: false,
        };
        Ok(Box::new(consumer))
    }
}

struct RestProducer {
    inner: Arc<Inner>,
    key: AccessKey,
}

#[async_trait]
impl ProducerClient for RestProducer {
    async fn send(&self, record: OutboundRecord) -> Result<RecordMetadata, FabricError> {
        let cluster = self.inner.cluster_id(&self.key).await?;
        let url = self.inner.url(&[
            "v3",
            "clusters",
            cluster,
            "topics",
            &record.topic,
            "records",
        ])?;
        let body = ProduceRequest::from(&record);
        let response = self
            .inner
            .client
            .post(url)
            .basic_auth(&self.key.access_key, Some(&self.key.secret_key))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FabricError::TopicNotFound(record.topic));
        }
        let ack: ProduceAck = expect_json(response).await?;
        if let Some(code) = ack.error_code.filter(|c| *c >= 400) {
            return Err(FabricError::Delivery {
                topic: record.topic,
                reason: ack.message.unwrap_or_else(|| format!("error code {}", code)),
            });
        }
        let timestamp = ack
            .timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.timestamp_millis())
            .unwrap_or(-1);

        Ok(RecordMetadata {
            topic: ack.topic_name.unwrap_or(record.topic),
            partition: ack.partition_id,
            offset: ack.offset,
            timestamp,
        })
    }
}

struct RestConsumer {
    inner: Arc<Inner>,
    key: AccessKey,
    base_uri: Url,
    config: ConsumerConfig,
    subscribed: bool,
    closed: bool,
}

impl RestConsumer {
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.key.access_key, Some(&self.key.secret_key))
    }

    fn instance_url(&self, path: &str) -> Result<Url, FabricError> {
        Ok(self.base_uri.join(path)?)
    }

    async fn subscribe(&mut self) -> Result<(), FabricError> {
        let url = self.instance_url("subscription")?;
        let body = serde_json::json!({ "topics": [self.config.topic] });
        let response = self
            .authed(self.inner.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, V2_JSON)
            .json(&body)
            .send()
            .await?;
        expect_empty(response).await?;
        self.subscribed = true;
        Ok(())
    }

    async fn assignments(&self) -> Result<Vec<TopicPartition>, FabricError> {
        let url = self.instance_url("assignments")?;
        let response = self
            .authed(self.inner.client.get(url))
            .header(reqwest::header::ACCEPT, V2_JSON)
            .send()
            .await?;
        let list: AssignmentList = expect_json(response).await?;
        Ok(list
            .partitions
            .into_iter()
            .map(|p| TopicPartition::new(p.topic, p.partition))
            .collect())
    }

    /// Long-poll for records. The proxy holds the request for up to
    /// `timeout`, so the client-wide request timeout does not apply.
    async fn fetch(&self, timeout: Duration) -> Result<Vec<Message>, FabricError> {
        let mut url = self.instance_url("records")?;
        url.query_pairs_mut()
            .append_pair("timeout", &timeout.as_millis().to_string());
        let response = self
            .authed(self.inner.client.get(url))
            .timeout(timeout + POLL_GRACE)
            .header(reqwest::header::ACCEPT, V2_BINARY)
            .send()
            .await?;
        let records: Vec<BinaryRecord> = expect_json(response).await?;
        records.into_iter().map(BinaryRecord::into_message).collect()
    }
}

#[async_trait]
impl ConsumerClient for RestConsumer {
    fn group_id(&self) -> &str {
        &self.config.group_id
    }

    async fn join(&mut self, max_wait: Duration) -> Result<Vec<TopicPartition>, FabricError> {
        if !self.subscribed {
            self.subscribe().await?;
        }
        let assigned = self.assignments().await?;
        if !assigned.is_empty() {
            return Ok(assigned);
        }
        // The proxy only joins the group on a fetch. Anything returned here
        // precedes the seek and is dropped.
        let _ = self.fetch(max_wait).await?;
        self.assignments().await
    }

    async fn end_offset(&mut self, tp: &TopicPartition) -> Result<i64, FabricError> {
        let partition = tp.partition.to_string();
        let url = self
            .inner
            .url(&["topics", &tp.topic, "partitions", &partition, "offsets"])?;
        let response = self
            .authed(self.inner.client.get(url))
            .header(reqwest::header::ACCEPT, V2_JSON)
            .send()
            .await?;
        let offsets: PartitionOffsets = expect_json(response).await?;
        Ok(offsets.end_offset)
    }

    async fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), FabricError> {
        let url = self.instance_url("positions")?;
        let body = serde_json::json!({
            "offsets": [{ "topic": tp.topic, "partition": tp.partition, "offset": offset }]
        });
        let response = self
            .authed(self.inner.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, V2_JSON)
            .json(&body)
            .send()
            .await?;
        expect_empty(response).await
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>, FabricError> {
        self.fetch(timeout).await
    }

    async fn close(&mut self) -> Result<(), FabricError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let url = self.base_uri.clone();
        let response = self
            .authed(self.inner.client.delete(url))
            .header(reqwest::header::CONTENT_TYPE, V2_JSON)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!(group_id = %self.config.group_id, "Consumer instance already gone");
            return Ok(());
        }
        expect_empty(response).await
    }
}

async fn expect_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, FabricError> {
    let status = response.status();
    if !status.is_success() {
        return Err(proxy_error(status, response).await);
    }
    Ok(response.json().await?)
}

async fn expect_empty(response: Response) -> Result<(), FabricError> {
    let status = response.status();
    if !status.is_success() {
        return Err(proxy_error(status, response).await);
    }
    Ok(())
}

async fn proxy_error(status: StatusCode, response: Response) -> FabricError {
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ProxyError>(&body)
        .map(|e| format!("{} ({})", e.message, e.error_code))
        .unwrap_or(body);
    FabricError::Broker(format!("REST proxy returned {}: {}", status.as_u16(), message))
}

#[derive(Deserialize)]
struct ProxyError {
    error_code: i64,
    message: String,
}

#[derive(Deserialize)]
struct ClusterList {
    data: Vec<ClusterData>,
}

#[derive(Deserialize)]
struct ClusterData {
    cluster_id: String,
}

#[derive(Serialize)]
struct ProduceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_id: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<ProduceHeader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<ProduceData>,
    value: ProduceData,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct ProduceHeader {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct ProduceData {
    #[serde(rename = "type")]
    kind: &'static str,
    data: String,
}

impl ProduceData {
    fn string(data: &str) -> Self {
        Self {
            kind: "STRING",
            data: data.to_string(),
        }
    }
}

impl From<&OutboundRecord> for ProduceRequest {
    fn from(record: &OutboundRecord) -> Self {
        Self {
            partition_id: record.partition,
            headers: record
                .headers
                .iter()
                .map(|(name, value)| ProduceHeader {
                    name: name.clone(),
                    value: BASE64.encode(value),
                })
                .collect(),
            key: record.key.as_deref().map(ProduceData::string),
            value: ProduceData::string(&record.value),
            timestamp: record
                .timestamp
                .and_then(DateTime::<chrono::Utc>::from_timestamp_millis)
                .map(|ts| ts.to_rfc3339()),
        }
    }
}

#[derive(Deserialize)]
struct ProduceAck {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    topic_name: Option<String>,
    #[serde(default)]
    partition_id: i32,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct CreateInstance {
    name: String,
    format: &'static str,
    #[serde(rename = "auto.offset.reset")]
    auto_offset_reset: &'static str,
    #[serde(rename = "auto.commit.enable")]
    auto_commit_enable: &'static str,
}

#[derive(Deserialize)]
struct CreatedInstance {
    instance_id: String,
    base_uri: String,
}

#[derive(Deserialize)]
struct AssignmentList {
    partitions: Vec<AssignedPartition>,
}

#[derive(Deserialize)]
struct AssignedPartition {
    topic: String,
    partition: i32,
}

#[derive(Deserialize)]
struct PartitionOffsets {
    end_offset: i64,
}

#[derive(Deserialize)]
struct BinaryRecord {
    topic: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    partition: i32,
    offset: i64,
    /// Not sent by every proxy version.
    #[serde(default)]
    timestamp: Option<i64>,
}

impl BinaryRecord {
    fn into_message(self) -> Result<Message, FabricError> {
        let decode = |field: Option<String>| -> Result<Option<String>, FabricError> {
            field
                .map(|b64| {
                    let bytes = BASE64
                        .decode(b64)
                        .map_err(|e| FabricError::Serialization(e.to_string()))?;
                    Ok(String::from_utf8_lossy(&bytes).into_owned())
                })
                .transpose()
        };
        Ok(Message {
            topic: self.topic,
            partition: self.partition,
            offset: self.offset,
            key: decode(self.key)?,
            value: decode(self.value)?.unwrap_or_default(),
            headers: Vec::new(),
            timestamp: self.timestamp.unwrap_or(-1),
        })
    }
}
