//! Exchange that writes messages to the log.

use async_trait::async_trait;
use testbox_core::{Exchange, PublishOptions};

/// Logs every message instead of delivering it.
///
/// Used when the worker runs without a message broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExchange;

#[async_trait]
impl Exchange for LogExchange {
    async fn publish(&self, body: String, options: PublishOptions) -> testbox_core::Result<()> {
        tracing::info!(
            routing_key = %options.routing_key,
            message_id = options.message_id.as_deref().unwrap_or_default(),
            kind = options.kind.as_deref().unwrap_or_default(),
            body = %body,
            "Message published"
        );
        Ok(())
    }
}
