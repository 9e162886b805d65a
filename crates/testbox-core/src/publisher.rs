//! Routing-key publisher for worker messages.
//!
//! A [`Publisher`] is bound to one routing key and one [`Exchange`]. The
//! exchange stands for an already opened channel; how it frames and delivers
//! messages is up to the implementation.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Routing key for commands sent to workers.
pub const COMMANDS_ROUTING_KEY: &str = "worker.commands";
/// Routing key for job state and log reports.
pub const REPORTING_ROUTING_KEY: &str = "reporting.jobs";

/// Content type of JSON-encoded messages.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Delivery options of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishOptions {
    /// Routing key; always set by the publisher
    pub routing_key: String,
    /// Unique message id, generated when not given
    pub message_id: Option<String>,
    /// MIME type of the body
    pub content_type: Option<String>,
    /// Message type, e.g. `job:test:finished`
    pub kind: Option<String>,
    /// Extra headers
    pub headers: BTreeMap<String, String>,
}

impl PublishOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message type.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Destination messages are handed to.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Deliver one message.
    async fn publish(&self, body: String, options: PublishOptions) -> Result<()>;
}

/// Publishes messages under a fixed routing key.
#[derive(Clone)]
pub struct Publisher {
    routing_key: String,
    exchange: Arc<dyn Exchange>,
}

impl Publisher {
    /// Create a publisher for `routing_key`.
    pub fn new(routing_key: impl Into<String>, exchange: Arc<dyn Exchange>) -> Self {
        Self {
            routing_key: routing_key.into(),
            exchange,
        }
    }

    /// Publisher for worker commands.
    pub fn commands(exchange: Arc<dyn Exchange>) -> Self {
        Self::new(COMMANDS_ROUTING_KEY, exchange)
    }

    /// Publisher for job reports.
    pub fn reporting(exchange: Arc<dyn Exchange>) -> Self {
        Self::new(REPORTING_ROUTING_KEY, exchange)
    }

    /// Routing key this publisher sends under.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// JSON-encode `data` and publish it.
    ///
    /// # Errors
    /// Returns an error if `data` can't be encoded or the exchange refuses it.
    pub async fn publish<T: Serialize + ?Sized>(&self, data: &T, options: PublishOptions) -> Result<()> {
        let body = serde_json::to_string(data)?;
        let mut options = options;
        options
            .content_type
            .get_or_insert_with(|| JSON_CONTENT_TYPE.to_string());
        self.publish_raw(body, options).await
    }

    /// Publish a pre-encoded body as is.
    pub async fn publish_raw(&self, body: impl Into<String>, options: PublishOptions) -> Result<()> {
        let mut options = options;
        options.routing_key = self.routing_key.clone();
        options
            .message_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string());

        let body = body.into();
        tracing::debug!(
            routing_key = %options.routing_key,
            message_id = options.message_id.as_deref().unwrap_or_default(),
            bytes = body.len(),
            "Publishing message"
        );
        self.exchange.publish(body, options).await
    }
}
