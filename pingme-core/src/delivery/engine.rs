//! Retry-until-success delivery of notifications to one destination

use crate::models::{DestinationId, NotificationPayload};
use crate::server::providers::NotificationSink;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wait between attempts when none is configured.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// Where a single delivery currently stands.
///
/// There is no failed state: every error leads to `Waiting`
/// and from there back to `Attempting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Send number `attempt` (1-based) is in flight
    Attempting { attempt: u64 },
    /// Send number `attempt` failed, waiting out the retry interval
    Waiting { attempt: u64 },
    /// The API accepted the payload on send number `attempts`
    Succeeded { attempts: u64 },
}

impl DeliveryState {
    pub fn start() -> Self {
        DeliveryState::Attempting { attempt: 1 }
    }

    /// Transition after a send finished.
    pub fn on_attempt_result(self, succeeded: bool) -> Self {
        match self {
            DeliveryState::Attempting { attempt } if succeeded => {
                DeliveryState::Succeeded { attempts: attempt }
            }
            DeliveryState::Attempting { attempt } => DeliveryState::Waiting { attempt },
            other => other,
        }
    }

    /// Transition after the retry interval elapsed.
    pub fn on_wait_elapsed(self) -> Self {
        match self {
            DeliveryState::Waiting { attempt } => DeliveryState::Attempting {
                attempt: attempt.saturating_add(1),
            },
            other => other,
        }
    }
}

/// Result of [`DeliveryEngine::deliver`].
///
/// A delivery never fails; it can only be interrupted by cancellation.
/// `attempts` counts completed sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u64 },
    Cancelled { attempts: u64 },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u64 {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::Cancelled { attempts } => {
                *attempts
            }
        }
    }
}

/// Result of [`DeliveryEngine::deliver_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every payload was accepted by the API
    Completed { delivered: usize, attempts: u64 },
    /// Cancelled while payload number `delivered` (0-based) was still pending
    Cancelled { delivered: usize, pending: usize },
}

/// Sends payloads through a [`NotificationSink`], retrying forever with a
/// fixed interval until the sink accepts them.
///
/// A payload the provider will never accept (bad markup, oversized text)
/// is indistinguishable from a transient failure and keeps retrying.
#[derive(Clone)]
pub struct DeliveryEngine {
    sink: Arc<dyn NotificationSink>,
    retry_interval: Duration,
    cancel: CancellationToken,
}

impl DeliveryEngine {
    pub fn new(sink: Arc<dyn NotificationSink>, retry_interval: Duration) -> Self {
        Self {
            sink,
            retry_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop retry loops when `cancel` fires (process shutdown, tests).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Deliver one payload, retrying until the sink accepts it.
    pub async fn deliver(
        &self,
        destination: &DestinationId,
        payload: &NotificationPayload,
    ) -> DeliveryOutcome {
        let mut state = DeliveryState::start();

        loop {
            state = match state {
                DeliveryState::Attempting { attempt } => {
                    let result = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            // An interrupted send does not count as made
                            return DeliveryOutcome::Cancelled { attempts: attempt - 1 };
                        }
                        result = self.sink.send(destination, payload) => result,
                    };

                    if let Err(e) = &result {
                        tracing::warn!(
                            sink = self.sink.name(),
                            destination = %destination,
                            attempt = attempt,
                            retry_in_ms = self.retry_interval.as_millis() as u64,
                            error = %e,
                            "Error while trying to send message"
                        );
                    }
                    state.on_attempt_result(result.is_ok())
                }
                DeliveryState::Waiting { attempt } => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            return DeliveryOutcome::Cancelled { attempts: attempt };
                        }
                        _ = tokio::time::sleep(self.retry_interval) => state.on_wait_elapsed(),
                    }
                }
                DeliveryState::Succeeded { attempts } => {
                    if attempts > 1 {
                        tracing::info!(
                            sink = self.sink.name(),
                            destination = %destination,
                            attempts = attempts,
                            "Message delivered after retrying"
                        );
                    } else {
                        tracing::debug!(
                            sink = self.sink.name(),
                            destination = %destination,
                            preview = %payload.preview(),
                            "Message delivered"
                        );
                    }
                    return DeliveryOutcome::Delivered { attempts };
                }
            };
        }
    }

    /// Deliver payloads strictly in order: payload i+1 is not attempted
    /// before payload i was accepted.
    pub async fn deliver_batch(
        &self,
        destination: &DestinationId,
        payloads: &[NotificationPayload],
    ) -> BatchOutcome {
        let mut attempts = 0;

        for (index, payload) in payloads.iter().enumerate() {
            let outcome = self.deliver(destination, payload).await;
            if !outcome.is_delivered() {
                return BatchOutcome::Cancelled {
                    delivered: index,
                    pending: payloads.len() - index,
                };
            }
            attempts += outcome.attempts();
        }

        BatchOutcome::Completed {
            delivered: payloads.len(),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::providers::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Sink that fails a fixed number of times before accepting.
    struct FlakySink {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FlakySink {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(
            &self,
            _destination: &DestinationId,
            _payload: &NotificationPayload,
        ) -> Result<(), ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err("Bad Gateway".into());
            }
            Ok(())
        }
    }

    #[test]
    fn test_state_transitions() {
        let state = DeliveryState::start();
        assert_eq!(state, DeliveryState::Attempting { attempt: 1 });

        let state = state.on_attempt_result(false);
        assert_eq!(state, DeliveryState::Waiting { attempt: 1 });

        let state = state.on_wait_elapsed();
        assert_eq!(state, DeliveryState::Attempting { attempt: 2 });

        let state = state.on_attempt_result(true);
        assert_eq!(state, DeliveryState::Succeeded { attempts: 2 });

        // Terminal state absorbs further events
        assert_eq!(state.on_attempt_result(false), state);
        assert_eq!(state.on_wait_elapsed(), state);
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let sink = Arc::new(FlakySink::new(0));
        let engine = DeliveryEngine::new(sink.clone(), Duration::from_millis(10));

        let outcome = engine
            .deliver(&DestinationId::Chat(1), &NotificationPayload::text("hi"))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let sink = Arc::new(FlakySink::new(3));
        let engine = DeliveryEngine::new(sink.clone(), Duration::from_millis(10));

        let outcome = engine
            .deliver(&DestinationId::Chat(1), &NotificationPayload::text("hi"))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 4 });
        assert_eq!(sink.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_waits_retry_interval_between_attempts() {
        let sink = Arc::new(FlakySink::new(2));
        let interval = Duration::from_millis(50);
        let engine = DeliveryEngine::new(sink, interval);

        let start = Instant::now();
        let outcome = engine
            .deliver(&DestinationId::Chat(1), &NotificationPayload::text("hi"))
            .await;

        assert!(outcome.is_delivered());
        assert!(start.elapsed() >= interval * 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_endless_retry() {
        let sink = Arc::new(FlakySink::new(usize::MAX));
        let cancel = CancellationToken::new();
        let engine = DeliveryEngine::new(sink.clone(), Duration::from_millis(10))
            .with_cancellation(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(55)).await;
            cancel.cancel();
        });

        let outcome = engine
            .deliver(&DestinationId::Chat(1), &NotificationPayload::text("hi"))
            .await;
        canceller.await.unwrap();

        assert!(!outcome.is_delivered());
        assert!(outcome.attempts() >= 2);
        assert_eq!(outcome.attempts() as usize, sink.calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let sink = Arc::new(FlakySink::new(0));
        let engine = DeliveryEngine::new(sink.clone(), Duration::from_millis(10));

        let outcome = engine.deliver_batch(&DestinationId::Chat(1), &[]).await;

        assert_eq!(
            outcome,
            BatchOutcome::Completed {
                delivered: 0,
                attempts: 0
            }
        );
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_batch_reports_pending() {
        let sink = Arc::new(FlakySink::new(usize::MAX));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine =
            DeliveryEngine::new(sink, Duration::from_millis(10)).with_cancellation(cancel);

        let payloads = vec![NotificationPayload::text("a"), NotificationPayload::text("b")];
        let outcome = engine
            .deliver_batch(&DestinationId::Chat(1), &payloads)
            .await;

        assert_eq!(
            outcome,
            BatchOutcome::Cancelled {
                delivered: 0,
                pending: 2
            }
        );
    }
}
