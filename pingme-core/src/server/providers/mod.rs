//! Communication providers: notification sinks and command sources
//!
//! Telegram is the only provider. The delivery path talks to it through
//! [`NotificationSink`] and the chat id discovery responder through
//! [`CommandSource`], so the two never share retry policy.

mod command_source;
mod sink;
mod telegram;

pub use command_source::{ChatCommand, CommandSource};
pub use sink::{NotificationSink, ProviderError};
pub use telegram::{BotIdentity, TelegramClient, TelegramError};
