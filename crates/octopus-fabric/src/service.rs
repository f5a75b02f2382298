//! HTTP client for the fabric control plane (key rotation and topic
//! registration).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use octopus_session::AccessKey;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::endpoint::endpoint;
use crate::error::FabricError;
use crate::traits::TopicRegistry;

/// Every control-plane response carries a `status` and, on failure or state
/// changes, a human-readable `message`.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    access_key: Option<String>,
    #[serde(default)]
    secret_key: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    topics: Option<Vec<String>>,
}

impl Envelope {
    fn summary(&self) -> String {
        self.message.clone().unwrap_or_else(|| self.status.clone())
    }
}

pub struct HttpFabricService {
    client: Client,
    base_url: Url,
}

impl HttpFabricService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FabricError> {
        let client = Client::builder().timeout(timeout).build()?;
        let trimmed = format!("{}/", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            base_url: Url::parse(&trimmed)?,
        })
    }

    async fn call(
        &self,
        method: Method,
        segments: &[&str],
        bearer: &str,
        topic: Option<&str>,
    ) -> Result<Envelope, FabricError> {
        let url = endpoint(&self.base_url, segments)?;
        debug!(%method, path = url.path(), "Control plane request");
        let response = self
            .client
            .request(method, url)
            .bearer_auth(bearer)
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            if let Some(topic) = topic {
                return Err(FabricError::TopicNotFound(topic.to_string()));
            }
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FabricError::ControlPlane {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope = response.json().await?;
        if envelope.status != "success" {
            return Err(FabricError::ControlPlane {
                status: status.as_u16(),
                message: envelope.summary(),
            });
        }
        Ok(envelope)
    }
}

#[async_trait]
impl TopicRegistry for HttpFabricService {
    async fn create_key(&self, bearer: &str) -> Result<AccessKey, FabricError> {
        let envelope = self.call(Method::POST, &["api", "v3", "key"], bearer, None).await?;
        let (Some(access_key), Some(secret_key)) = (envelope.access_key, envelope.secret_key)
        else {
            return Err(FabricError::Serialization(
                "key response is missing credentials".into(),
            ));
        };
        info!(access_key = %access_key, "Access key rotated");
        Ok(AccessKey {
            access_key,
            secret_key,
            endpoint: envelope.endpoint,
            issued_at: Utc::now(),
        })
    }

    async fn list_topics(&self, bearer: &str) -> Result<Vec<String>, FabricError> {
        let envelope = self.call(Method::GET, &["api", "v3", "topics"], bearer, None).await?;
        Ok(envelope.topics.unwrap_or_default())
    }

    async fn register_topic(&self, bearer: &str, topic: &str) -> Result<String, FabricError> {
        let envelope = self
            .call(Method::PUT, &["api", "v3", "topic", topic], bearer, Some(topic))
            .await?;
        Ok(envelope.summary())
    }

    async fn unregister_topic(&self, bearer: &str, topic: &str) -> Result<String, FabricError> {
        let envelope = self
            .call(Method::DELETE, &["api", "v3", "topic", topic], bearer, Some(topic))
            .await?;
        Ok(envelope.summary())
    }
}
