//! The bridge service behind the tool surface.
//!
//! Login lifecycle calls go straight to the [`SessionManager`]. Everything
//! else is admitted by the [`AccessGate`] while the session read guard is
//! held, so a concurrent logout waits for in-flight operations and no
//! operation runs against a session that was reset underneath it.

use std::sync::Arc;
use std::time::Duration;

use octopus_fabric::{
    EventBroker, EventProducer, LatestEventConsumer, Message, OutboundRecord, PublishReceipt,
    TopicRegistry,
};
use octopus_session::{AccessKey, LogoutOutcome, SessionManager, SessionState};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::error::{BridgeResult, PreconditionError};
use crate::gate::{AccessGate, Precondition};
use crate::tools::{ConsumeLatestArgs, ProduceEventArgs, ToolCall, ToolName};

/// Rendered result of a successful tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

struct CachedProducer {
    generation: u64,
    producer: Arc<EventProducer>,
}

pub struct FabricBridge {
    session: SessionManager,
    broker: Arc<dyn EventBroker>,
    registry: Arc<dyn TopicRegistry>,
    consumer: LatestEventConsumer,
    producer: Mutex<Option<CachedProducer>>,
    delivery_timeout: Duration,
}

impl FabricBridge {
    pub fn new(
        session: SessionManager,
        broker: Arc<dyn EventBroker>,
        registry: Arc<dyn TopicRegistry>,
        delivery_timeout: Duration,
    ) -> Self {
        let consumer = LatestEventConsumer::new(broker.clone());
        Self {
            session,
            broker,
            registry,
            consumer,
            producer: Mutex::new(None),
            delivery_timeout,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Run one tool. Anything past the login lifecycle is admitted at the
    /// level its [`ToolName`] declares and runs under the session read guard.
    pub async fn call(&self, call: ToolCall) -> BridgeResult<ToolOutput> {
        let tool = call.name();
        let output = match call {
            ToolCall::DiasporaAuthenticate => ToolOutput::Text(self.authenticate().await?),
            ToolCall::CompleteDiasporaAuth(args) => {
                ToolOutput::Text(self.complete_authentication(&args.code).await?)
            }
            ToolCall::Logout => ToolOutput::Text(self.logout().await?),
            ToolCall::CreateKey => {
                let state = self.admit(tool).await?;
                let key = self.rotate_key().await?;
                drop(state);
                ToolOutput::Json(self.install_key(key).await?)
            }
            ToolCall::ListTopics => {
                let _state = self.admit(tool).await?;
                ToolOutput::Json(Value::from(self.list_topics().await?))
            }
            ToolCall::RegisterTopic(args) => {
                let _state = self.admit(tool).await?;
                ToolOutput::Text(self.register_topic(&args.topic).await?)
            }
            ToolCall::UnregisterTopic(args) => {
                let _state = self.admit(tool).await?;
                ToolOutput::Text(self.unregister_topic(&args.topic).await?)
            }
            ToolCall::ProduceEvent(args) => {
                let state = self.admit(tool).await?;
                ToolOutput::Text(self.produce_event(&state, args).await?.to_string())
            }
            ToolCall::ConsumeLatestEvent(args) => {
                let state = self.admit(tool).await?;
                let newest = self.consume_latest_event(&state, args).await?;
                ToolOutput::Json(newest.as_ref().map(message_json).unwrap_or(Value::Null))
            }
        };
        Ok(output)
    }

    /// Take the session read guard and check it against `tool`'s level.
    async fn admit(&self, tool: ToolName) -> BridgeResult<RwLockReadGuard<'_, SessionState>> {
        let state = self.session.state().await;
        if let Some(level) = tool.access_level() {
            AccessGate::admit(&state, level)?;
        }
        Ok(state)
    }

    async fn authenticate(&self) -> BridgeResult<String> {
        let url = self.session.begin_authentication().await?;
        Ok(format!(
            "**Authorization URL**\n\n\
             Visit the link, approve access, then call `complete_diaspora_auth(<code>)` \
             with the returned code.\n\n{}",
            url
        ))
    }

    async fn complete_authentication(&self, code: &str) -> BridgeResult<String> {
        self.session.complete_authentication(code).await?;
        self.discard_producer().await;
        Ok("Login successful! You can now use Diaspora tools.".to_string())
    }

    async fn logout(&self) -> BridgeResult<String> {
        let outcome = self.session.logout().await?;
        self.discard_producer().await;
        Ok(match outcome {
            LogoutOutcome::Revoked { .. } => "Logged out and tokens revoked.".to_string(),
            LogoutOutcome::NothingCached => "No active tokens found.".to_string(),
        })
    }

    async fn rotate_key(&self) -> BridgeResult<AccessKey> {
        let bearer = self.session.fabric_token().await?;
        Ok(self.registry.create_key(&bearer).await?)
    }

    /// Record rotated broker credentials. The JSON result never includes
    /// the secret.
    async fn install_key(&self, key: AccessKey) -> BridgeResult<Value> {
        let rendered = json!({
            "status": "success",
            "access_key": key.access_key,
            "endpoint": key.endpoint,
            "issued_at": key.issued_at.to_rfc3339(),
        });
        self.session.install_access_key(key).await?;
        self.discard_producer().await;
        Ok(rendered)
    }

    async fn list_topics(&self) -> BridgeResult<Vec<String>> {
        let bearer = self.session.fabric_token().await?;
        Ok(self.registry.list_topics(&bearer).await?)
    }

    async fn register_topic(&self, topic: &str) -> BridgeResult<String> {
        let bearer = self.session.fabric_token().await?;
        let status = self.registry.register_topic(&bearer, topic).await?;
        info!(topic, "Topic registered");
        Ok(status)
    }

    async fn unregister_topic(&self, topic: &str) -> BridgeResult<String> {
        let bearer = self.session.fabric_token().await?;
        let status = self.registry.unregister_topic(&bearer, topic).await?;
        info!(topic, "Topic unregistered");
        Ok(status)
    }

    async fn produce_event(
        &self,
        state: &SessionState,
        args: ProduceEventArgs,
    ) -> BridgeResult<PublishReceipt> {
        let key = rotated_key(state)?;
        let producer = self.producer_for(state.generation(), key).await?;

        let mut record = OutboundRecord::new(args.topic, args.value);
        if let Some(k) = args.key {
            record = record.with_key(k);
        }
        for (name, value) in args.headers.unwrap_or_default() {
            record = record.with_header(name, value);
        }
        Ok(producer.publish(record, args.sync).await?)
    }

    async fn consume_latest_event(
        &self,
        state: &SessionState,
        args: ConsumeLatestArgs,
    ) -> BridgeResult<Option<Message>> {
        let key = rotated_key(state)?;
        let timeout = Duration::from_secs(args.timeout_s);
        Ok(self.consumer.peek_latest(key, &args.topic, timeout).await?)
    }

    /// Wait up to the delivery timeout for queued publishes. Returns whether
    /// everything was acknowledged or abandoned in time.
    pub async fn flush(&self) -> bool {
        let producer = match self.producer.lock().await.as_ref() {
            Some(cached) => cached.producer.clone(),
            None => return true,
        };
        let drained = producer.flush(self.delivery_timeout).await;
        if !drained {
            warn!(
                in_flight = producer.in_flight(),
                "Queued publishes still pending at flush deadline"
            );
        }
        drained
    }

    /// Shared producer for the current session generation, rebuilt after a
    /// login or key rotation.
    async fn producer_for(
        &self,
        generation: u64,
        key: &AccessKey,
    ) -> BridgeResult<Arc<EventProducer>> {
        let mut cached = self.producer.lock().await;
        if let Some(current) = cached.as_ref().filter(|c| c.generation == generation) {
            return Ok(current.producer.clone());
        }
        let client = self.broker.producer(key).await?;
        let producer = Arc::new(EventProducer::new(client, self.delivery_timeout));
        *cached = Some(CachedProducer {
            generation,
            producer: producer.clone(),
        });
        debug!(generation, "Producer built");
        Ok(producer)
    }

    async fn discard_producer(&self) {
        if let Some(old) = self.producer.lock().await.take() {
            debug!(
                generation = old.generation,
                in_flight = old.producer.in_flight(),
                "Producer discarded"
            );
        }
    }
}

fn rotated_key(state: &SessionState) -> Result<&AccessKey, PreconditionError> {
    state.access_key().ok_or(PreconditionError {
        missing: Precondition::KeyRotated,
    })
}

/// Tool-facing rendering of a consumed record.
pub fn message_json(message: &Message) -> Value {
    json!({
        "topic": message.topic,
        "partition": message.partition,
        "offset": message.offset,
        "key": message.key,
        "value": message.value,
        "timestamp": message.timestamp,
    })
}
