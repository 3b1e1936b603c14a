//! Reporter: pushes notifications into a running relay

use anyhow::Context;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Per-request timeout when talking to the relay.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Wait between failed posts to the relay.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that stop a reporter before its queue reached the relay
#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Cancelled with {pending} notification(s) not yet accepted by the relay")]
    Cancelled { pending: usize },
}

/// Client side of the ingestion endpoint.
///
/// Messages are queued locally and the whole queue is posted as one batch
/// until the relay answers with a success status. Messages that failed to
/// go out are resent together with the next one.
pub struct Reporter {
    endpoint: Url,
    client: Client,
    retry_interval: Duration,
    queue: Vec<String>,
    cancel: CancellationToken,
}

impl Reporter {
    /// `server` is the relay base URL (`http://host:port`; the scheme may be omitted).
    pub fn new(server: &str, ingest_path: &str) -> Result<Self, ReporterError> {
        let endpoint = ingest_endpoint(server, ingest_path)?;
        let client = Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            endpoint,
            client,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            queue: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Messages not yet accepted by the relay.
    pub fn pending(&self) -> &[String] {
        &self.queue
    }

    /// Queue one message and flush.
    pub async fn send(&mut self, message: impl Into<String>) -> Result<(), ReporterError> {
        self.queue.push(message.into());
        self.flush().await
    }

    /// Queue several messages and flush them as one batch.
    pub async fn send_all<I, S>(&mut self, messages: I) -> Result<(), ReporterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queue.extend(messages.into_iter().map(Into::into));
        self.flush().await
    }

    /// Post the queue until the relay accepts it.
    pub async fn flush(&mut self) -> Result<(), ReporterError> {
        if self.queue.is_empty() {
            return Ok(());
        }

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            tracing::debug!(
                endpoint = %self.endpoint,
                queued = self.queue.len(),
                attempt = attempt,
                "Trying to send notifications"
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(ReporterError::Cancelled { pending: self.queue.len() });
                }
                result = self.post_queue() => result,
            };

            match result {
                Ok(()) => {
                    self.queue.clear();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        attempt = attempt,
                        error = %format!("{:#}", e),
                        "Relay did not accept notifications"
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ReporterError::Cancelled { pending: self.queue.len() });
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    async fn post_queue(&self) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&self.queue)
            .send()
            .await
            .context("Request to relay failed")?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("Relay error {}: {}", status, body.trim()))
        }
    }
}

fn ingest_endpoint(server: &str, ingest_path: &str) -> Result<Url, url::ParseError> {
    let server = server.trim();
    let base = if server.contains("://") {
        Url::parse(server)?
    } else {
        Url::parse(&format!("http://{}", server))?
    };
    // Keep any path prefix the relay sits behind
    let base = if base.path().ends_with('/') {
        base
    } else {
        let mut with_slash = base.clone();
        with_slash.set_path(&format!("{}/", base.path()));
        with_slash
    };
    base.join(ingest_path.trim_matches('/'))
}
