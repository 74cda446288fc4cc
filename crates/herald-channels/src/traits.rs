use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use herald_core::Outbox;

/// An inbound text message from a chat platform.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    /// Platform message id, used to thread replies.
    pub id: String,
    pub sender: String,
    /// Chat the message arrived in; replies go back here.
    pub reply_target: String,
    pub content: String,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
}

/// A chat platform connection: outbound delivery plus an inbound stream.
#[async_trait]
pub trait Channel: Outbox {
    fn name(&self) -> &str;

    /// Receive messages and forward them to `tx` until the receiver is
    /// dropped or the connection fails.
    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> anyhow::Result<()>;

    async fn health_check(&self) -> bool {
        true
    }
}
