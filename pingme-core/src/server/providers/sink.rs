//! Notification sink: outbound delivery to the messaging provider

use crate::models::{DestinationId, NotificationPayload};
use async_trait::async_trait;
use std::error::Error;

/// Error type returned by provider calls.
pub type ProviderError = Box<dyn Error + Send + Sync>;

/// Sink for delivering notifications to a communication provider (e.g. Telegram).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Provider name for logging (e.g. "telegram").
    fn name(&self) -> &str;

    /// Make one delivery attempt. Retrying is the caller's concern.
    async fn send(
        &self,
        destination: &DestinationId,
        payload: &NotificationPayload,
    ) -> Result<(), ProviderError>;
}
