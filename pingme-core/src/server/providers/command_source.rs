//! Command source: inbound bot commands from the messaging provider

use crate::server::providers::ProviderError;
use async_trait::async_trait;

/// A text message addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCommand {
    /// Chat the message was sent from (a reply goes back here)
    pub chat_id: i64,
    pub text: String,
}

/// Source of incoming chat messages plus a way to answer them.
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Wait for the next batch of messages. An empty batch means the poll timed out.
    async fn next_commands(&self) -> Result<Vec<ChatCommand>, ProviderError>;

    /// Send one HTML-formatted reply into `chat_id`.
    async fn reply(&self, chat_id: i64, text: &str) -> Result<(), ProviderError>;
}
