//! Remedy sinks.
//!
//! External destinations remedy events are published to. Delivery is
//! fire-and-forget from the workflow's point of view.

use crate::core::{Error, Result};
use crate::remedy::event::RemedyEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

/// Destination of remedy events.
#[async_trait]
pub trait RemedySink: Send + Sync {
    /// Sink name, for logs.
    fn name(&self) -> &str;

    /// Publish an event.
    async fn publish(&self, event: &RemedyEvent) -> Result<()>;
}

/// Sink that writes events to the log.
#[derive(Clone, Debug, Default)]
pub struct LogRemedySink;

impl LogRemedySink {
    /// Create a new log sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemedySink for LogRemedySink {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, event: &RemedyEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        info!(target: "slaguard::remedy", "{}", payload);
        Ok(())
    }
}

/// Sink that forwards events to an in-process channel.
#[derive(Clone, Debug)]
pub struct ChannelRemedySink {
    tx: mpsc::UnboundedSender<RemedyEvent>,
}

impl ChannelRemedySink {
    /// Create a sink and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RemedyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RemedySink for ChannelRemedySink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn publish(&self, event: &RemedyEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| Error::RemedyPublish("remedy channel closed".to_string()))
    }
}
