//! Relay loop between the upstream token stream and one HTTP response body.
//!
//! A request leaves the registry through whichever of these fires first:
//! the loop finishing (any outcome), the timeout task, or the body being
//! dropped by Rocket when the client goes away. Each path calls
//! [`RequestRegistry::remove`], which only takes effect once.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationParams;
use crate::engine::TextGenerator;
use crate::error::{GatewayError, Result};
use crate::prompt::HTML_PREAMBLE;
use crate::registry::RequestRegistry;
use crate::sse::Token;

const CLOSING_TAG: &str = "</html>";

/// Write half of a streamed response body.
pub struct ResponseSink {
    tx: Option<mpsc::Sender<String>>,
}

impl ResponseSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Returns `false` when the body is closed or the client is gone.
    pub async fn send(&self, chunk: String) -> bool {
        match &self.tx {
            Some(tx) => tx.send(chunk).await.is_ok(),
            None => false,
        }
    }

    /// Ends the body. Safe to call any number of times; never fails.
    pub fn close(&mut self) -> bool {
        match self.tx.take() {
            Some(tx) => {
                if tx.is_closed() {
                    tracing::debug!("client already gone when closing response");
                }
                true
            }
            None => {
                tracing::debug!("response already closed");
                false
            }
        }
    }
}

/// Why the relay loop stopped.
#[derive(Debug)]
pub enum RelayOutcome {
    /// `</html>` or the end-of-turn marker showed up.
    Completed,
    /// Upstream ran out of tokens.
    Exhausted,
    /// The request was removed from the registry mid-stream.
    Cancelled,
    ClientGone,
    Failed(GatewayError),
}

impl RelayOutcome {
    pub fn is_normal(&self) -> bool {
        matches!(self, RelayOutcome::Completed | RelayOutcome::Exhausted)
    }

    pub fn removal_reason(&self) -> String {
        match self {
            RelayOutcome::Completed | RelayOutcome::Exhausted => "normal end of stream".to_string(),
            RelayOutcome::Cancelled => "premature end of stream (cancelled)".to_string(),
            RelayOutcome::ClientGone => {
                "premature end of stream (client closed connection)".to_string()
            }
            RelayOutcome::Failed(e) => format!("premature end of stream ({e})"),
        }
    }
}

/// Forwards tokens to `sink` until a stop condition.
///
/// Cancellation is checked when a token arrives, before it is forwarded; the
/// upstream is never interrupted while it is producing. The accumulator holds
/// every relayed fragment so markers split across tokens are still found. It
/// is unbounded for the lifetime of one request.
pub async fn relay<S>(
    mut tokens: S,
    cancel: &CancellationToken,
    sink: &ResponseSink,
    end_marker: &str,
) -> RelayOutcome
where
    S: Stream<Item = Result<Token>> + Unpin,
{
    let mut accumulated = String::new();

    while let Some(next) = tokens.next().await {
        if cancel.is_cancelled() {
            return RelayOutcome::Cancelled;
        }

        let token = match next {
            Ok(token) => token,
            Err(e) => return RelayOutcome::Failed(e),
        };

        accumulated.push_str(&token.text);
        tracing::trace!(token_id = token.id, special = token.special, text = %token.text, "relaying token");
        if !sink.send(token.text).await {
            return RelayOutcome::ClientGone;
        }

        if accumulated.contains(CLOSING_TAG)
            || (!end_marker.is_empty() && accumulated.contains(end_marker))
        {
            return RelayOutcome::Completed;
        }
    }

    RelayOutcome::Exhausted
}

/// Everything one `/app` generation needs once the request has been accepted.
pub struct RelayJob {
    pub id: String,
    pub prompt: String,
    pub cancel: CancellationToken,
    pub params: GenerationParams,
    pub end_marker: String,
}

/// Sends the preamble, relays the upstream, then removes the request and
/// closes the body exactly once whatever happened.
pub async fn run(
    job: RelayJob,
    registry: Arc<RequestRegistry>,
    generator: Arc<dyn TextGenerator>,
    mut sink: ResponseSink,
) -> RelayOutcome {
    let outcome = if !sink.send(HTML_PREAMBLE.to_string()).await {
        RelayOutcome::ClientGone
    } else if !registry.is_pending(&job.id) {
        // gone before the upstream was even contacted
        RelayOutcome::Cancelled
    } else {
        match generator.stream(&job.prompt, &job.params).await {
            Ok(tokens) => relay(tokens, &job.cancel, &sink, &job.end_marker).await,
            Err(e) => RelayOutcome::Failed(e),
        }
    };

    match &outcome {
        RelayOutcome::Failed(e) => {
            tracing::warn!(id = %job.id, error = %e, "generation stream failed");
        }
        other if !other.is_normal() => {
            tracing::debug!(id = %job.id, outcome = ?other, "relay stopped early");
        }
        _ => {}
    }

    registry.remove(&job.id, &outcome.removal_reason());
    sink.close();
    outcome
}

/// Arms the timeout trigger. Exits quietly once `cancel` fires for any other reason.
pub fn spawn_timeout(
    registry: Arc<RequestRegistry>,
    id: String,
    cancel: CancellationToken,
    after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                registry.remove(&id, &format!("timed out after {}s", after.as_secs()));
            }
        }
    })
}

/// Removes its request when dropped. Rocket drops the response body when the
/// client disconnects, and also after the last chunk; the latter is a no-op
/// because the relay has already removed the id.
pub struct DisconnectGuard {
    registry: Arc<RequestRegistry>,
    id: String,
}

impl DisconnectGuard {
    pub fn new(registry: Arc<RequestRegistry>, id: String) -> Self {
        Self { registry, id }
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id, "client closed connection");
    }
}

/// Read half of the response body handed to Rocket.
pub struct RelayBody {
    chunks: ReceiverStream<String>,
    _guard: DisconnectGuard,
}

impl RelayBody {
    pub fn new(rx: mpsc::Receiver<String>, guard: DisconnectGuard) -> Self {
        Self {
            chunks: ReceiverStream::new(rx),
            _guard: guard,
        }
    }
}

impl Stream for RelayBody {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        Pin::new(&mut self.chunks).poll_next(cx)
    }
}
