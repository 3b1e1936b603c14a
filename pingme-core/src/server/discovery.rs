//! Chat id discovery: answer the trigger command with the caller's chat id

use crate::server::providers::{ChatCommand, CommandSource};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wait after a failed getUpdates poll before polling again.
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Reply text revealing a chat id (HTML).
pub fn chat_id_reply(chat_id: i64) -> String {
    format!("This chat ID: <code>{}</code>", chat_id)
}

/// Whether `text` invokes `trigger`.
///
/// Accepts `/start`, `/start@some_bot` (group chats address commands this
/// way) and `/start with arguments`.
pub fn matches_trigger(text: &str, trigger: &str) -> bool {
    let Some(first) = text.split_whitespace().next() else {
        return false;
    };
    let command = first.split('@').next().unwrap_or(first);
    command == trigger
}

/// Replies to the trigger command. Independent of the delivery engine:
/// a failed reply is logged and never retried.
pub struct DiscoveryResponder {
    source: Arc<dyn CommandSource>,
    trigger: String,
    poll_backoff: Duration,
    cancel: CancellationToken,
}

impl DiscoveryResponder {
    pub fn new(source: Arc<dyn CommandSource>, trigger: impl Into<String>) -> Self {
        Self {
            source,
            trigger: trigger.into(),
            poll_backoff: DEFAULT_POLL_BACKOFF,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_backoff(mut self, poll_backoff: Duration) -> Self {
        self.poll_backoff = poll_backoff;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Answer every trigger in `commands`. Returns the number of replies sent.
    pub async fn handle_commands(&self, commands: Vec<ChatCommand>) -> usize {
        let mut replied = 0;
        for command in commands {
            if !matches_trigger(&command.text, &self.trigger) {
                continue;
            }
            match self
                .source
                .reply(command.chat_id, &chat_id_reply(command.chat_id))
                .await
            {
                Ok(()) => {
                    tracing::info!(chat_id = command.chat_id, "Sent chat id to requester");
                    replied += 1;
                }
                Err(e) => {
                    tracing::error!(
                        chat_id = command.chat_id,
                        error = %e,
                        "Failed to reply with chat id"
                    );
                }
            }
        }
        replied
    }

    /// Poll for commands until cancelled.
    pub async fn run(self) {
        tracing::info!(trigger = %self.trigger, "Chat id discovery started");

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                polled = self.source.next_commands() => polled,
            };

            match polled {
                Ok(commands) => {
                    self.handle_commands(commands).await;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = self.poll_backoff.as_millis() as u64,
                        "Polling for bot commands failed"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Chat id discovery stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::providers::ProviderError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Scripted command source that records replies.
    struct ScriptedSource {
        polls: Mutex<VecDeque<Result<Vec<ChatCommand>, String>>>,
        replies: Mutex<Vec<(i64, String)>>,
        fail_replies: bool,
    }

    impl ScriptedSource {
        fn new(polls: Vec<Result<Vec<ChatCommand>, String>>, fail_replies: bool) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                replies: Mutex::new(Vec::new()),
                fail_replies,
            }
        }
    }

    #[async_trait]
    impl CommandSource for ScriptedSource {
        async fn next_commands(&self) -> Result<Vec<ChatCommand>, ProviderError> {
            match self.polls.lock().await.pop_front() {
                Some(Ok(commands)) => Ok(commands),
                Some(Err(e)) => Err(e.into()),
                None => {
                    // Behave like an idle long poll
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn reply(&self, chat_id: i64, text: &str) -> Result<(), ProviderError> {
            self.replies.lock().await.push((chat_id, text.to_string()));
            if self.fail_replies {
                return Err("Forbidden: bot was blocked by the user".into());
            }
            Ok(())
        }
    }

    fn command(chat_id: i64, text: &str) -> ChatCommand {
        ChatCommand {
            chat_id,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_matches_trigger() {
        assert!(matches_trigger("/start", "/start"));
        assert!(matches_trigger("/start@pinger_bot", "/start"));
        assert!(matches_trigger("  /start now", "/start"));

        assert!(!matches_trigger("/stop", "/start"));
        assert!(!matches_trigger("/starting", "/start"));
        assert!(!matches_trigger("start", "/start"));
        assert!(!matches_trigger("", "/start"));
    }

    #[test]
    fn test_chat_id_reply() {
        assert_eq!(
            chat_id_reply(-100123),
            "This chat ID: <code>-100123</code>"
        );
    }

    #[tokio::test]
    async fn test_replies_only_to_trigger() {
        let source = Arc::new(ScriptedSource::new(Vec::new(), false));
        let responder = DiscoveryResponder::new(source.clone(), "/start");

        let replied = responder
            .handle_commands(vec![
                command(1, "hello"),
                command(2, "/start"),
                command(3, "/start@pinger_bot"),
            ])
            .await;

        assert_eq!(replied, 2);
        let replies = source.replies.lock().await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], (2, "This chat ID: <code>2</code>".to_string()));
        assert_eq!(replies[1].0, 3);
    }

    #[tokio::test]
    async fn test_failed_reply_is_not_retried() {
        let source = Arc::new(ScriptedSource::new(Vec::new(), true));
        let responder = DiscoveryResponder::new(source.clone(), "/start");

        let replied = responder.handle_commands(vec![command(9, "/start")]).await;

        assert_eq!(replied, 0);
        assert_eq!(source.replies.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_survives_poll_errors_and_stops_on_cancel() {
        let source = Arc::new(ScriptedSource::new(
            vec![
                Err("Bad Gateway".to_string()),
                Ok(vec![command(5, "/start")]),
            ],
            false,
        ));
        let cancel = CancellationToken::new();
        let responder = DiscoveryResponder::new(source.clone(), "/start")
            .with_poll_backoff(Duration::from_millis(10))
            .with_cancellation(cancel.clone());

        let handle = tokio::spawn(responder.run());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while source.replies.lock().await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no reply sent");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("responder did not stop")
            .unwrap();

        assert_eq!(source.replies.lock().await[0].0, 5);
    }
}
