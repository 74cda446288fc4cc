//! Outbound delivery capability consumed by the dispatcher and the FAQ
//! responder. Chat adapters implement [`Outbox`]; the core never talks to a
//! transport directly.

use async_trait::async_trait;

/// A text message to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    pub content: String,
    /// Chat identifier the message is delivered to.
    pub recipient: String,
    /// Message to thread the reply under, if any.
    pub reply_to: Option<String>,
}

/// A photo, referenced by URL, to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPhoto {
    pub url: String,
    pub recipient: String,
    pub reply_to: Option<String>,
}

#[async_trait]
pub trait Outbox: Send + Sync {
    /// Deliver a text message. Content is HTML formatted.
    async fn send(&self, message: &SendMessage) -> anyhow::Result<()>;

    /// Deliver a photo by URL.
    async fn send_photo(&self, photo: &SendPhoto) -> anyhow::Result<()>;
}
