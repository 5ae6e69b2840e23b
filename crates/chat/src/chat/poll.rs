use std::sync::Arc;
use std::time::Duration;

use mimir_remote::{RemoteMessage, RemoteRole, SessionCollaborator, ThreadSnapshot};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::chat::events::{PollEvent, PollEventPayload};
use crate::chat::thread::{ChatMessage, DeliveryStatus, PollRoundId, Thread};
use crate::error::{PollTickError, TickFetchSnafu};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3_000);
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5 * 60);

/// How a fetched thread is judged to hold a new reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyDetection {
    /// Compare the fetched last message's text with the baseline's text.
    ///
    /// Two identical consecutive replies are indistinguishable under this rule.
    #[default]
    ContentEquality,
    /// Compare backend message ids when both sides carry one, text otherwise.
    MessageIdentity,
}

/// What a round compares fetched threads against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyBaseline {
    pub last_confirmed: Option<ChatMessage>,
    /// Entries the backend holds or was asked to hold when the round started.
    /// Failed sends never reached it and are not counted.
    pub min_len: usize,
}

impl ReplyBaseline {
    pub fn from_thread(thread: &Thread) -> Self {
        Self {
            last_confirmed: thread.baseline().cloned(),
            min_len: thread
                .messages
                .iter()
                .filter(|message| !matches!(message.status, DeliveryStatus::Failed(_)))
                .count(),
        }
    }
}

impl ReplyDetection {
    /// Returns true when `fetched` ends in an assistant reply not yet seen.
    ///
    /// A fetched sequence shorter than the local one is never a reply, so
    /// applying it can not shrink the local thread.
    pub fn is_new_reply(self, baseline: &ReplyBaseline, fetched: &[RemoteMessage]) -> bool {
        if fetched.len() < baseline.min_len {
            return false;
        }

        let Some(last) = fetched.last() else {
            return false;
        };
        if last.role != RemoteRole::Assistant {
            return false;
        }

        let Some(previous) = &baseline.last_confirmed else {
            return true;
        };

        if self == Self::MessageIdentity
            && let (Some(fetched_id), Some(previous_id)) = (&last.id, &previous.remote_id)
        {
            return fetched_id != previous_id;
        }

        last.content != previous.content
    }
}

/// Tick cadence and limits for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Delay multiplier per consecutive failed tick. `1.0` keeps a fixed cadence.
    pub failure_backoff: f64,
    pub max_interval: Duration,
    /// Give up waiting after this long. `None` polls forever.
    pub max_wait: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub detection: ReplyDetection,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            failure_backoff: 1.0,
            max_interval: DEFAULT_MAX_POLL_INTERVAL,
            max_wait: Some(DEFAULT_MAX_WAIT),
            request_timeout: None,
            detection: ReplyDetection::default(),
        }
    }
}

impl PollPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_failure_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.failure_backoff = factor;
        self.max_interval = max_interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_detection(mut self, detection: ReplyDetection) -> Self {
        self.detection = detection;
        self
    }

    /// Delay before the next tick given how many ticks in a row have failed.
    pub fn delay_after_failures(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0
            || !self.failure_backoff.is_finite()
            || self.failure_backoff <= 1.0
        {
            return self.interval;
        }

        let exponent = consecutive_failures.min(32) as i32;
        let scaled = self.interval.as_secs_f64() * self.failure_backoff.powi(exponent);
        let capped = scaled.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped).max(self.interval)
    }
}

pub(crate) struct PollRequest {
    pub round: PollRoundId,
    pub thread_id: String,
    pub baseline: ReplyBaseline,
    pub policy: PollPolicy,
}

/// Owner side of a running poll worker.
///
/// Dropping the handle stops the worker before its next fetch.
pub struct PollHandle {
    events: mpsc::UnboundedReceiver<PollEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl PollHandle {
    pub(crate) fn spawn(collaborator: Arc<dyn SessionCollaborator>, request: PollRequest) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        tokio::spawn(run_poll_worker(collaborator, request, event_tx, cancel_rx));

        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<PollEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

async fn fetch_once(
    collaborator: &dyn SessionCollaborator,
    thread_id: &str,
    request_timeout: Option<Duration>,
    consecutive_failures: u32,
) -> Result<ThreadSnapshot, PollTickError> {
    let attempt_failures = consecutive_failures.saturating_add(1);
    let fetch = collaborator.fetch_thread(thread_id);

    let result = match request_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result,
            Err(_) => {
                return Err(PollTickError::TickTimeout {
                    consecutive_failures: attempt_failures,
                    timeout,
                });
            }
        },
        None => fetch.await,
    };

    match (result, request_timeout) {
        (Err(error), Some(timeout)) if error.is_timeout() => Err(PollTickError::TickTimeout {
            consecutive_failures: attempt_failures,
            timeout,
        }),
        (result, _) => result.context(TickFetchSnafu {
            consecutive_failures: attempt_failures,
        }),
    }
}

async fn run_poll_worker(
    collaborator: Arc<dyn SessionCollaborator>,
    request: PollRequest,
    event_tx: mpsc::UnboundedSender<PollEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let PollRequest {
        round,
        thread_id,
        baseline,
        policy,
    } = request;
    let started = Instant::now();
    let deadline = policy.max_wait.map(|max_wait| started + max_wait);
    let mut consecutive_failures = 0_u32;

    tracing::debug!(
        round = ?round,
        thread_id = %thread_id,
        interval_ms = policy.interval.as_millis() as u64,
        "poll worker started"
    );

    loop {
        let mut wake_at = Instant::now() + policy.delay_after_failures(consecutive_failures);
        if let Some(deadline) = deadline {
            wake_at = wake_at.min(deadline);
        }

        tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                tracing::debug!(round = ?round, "poll worker cancelled while sleeping");
                return;
            }
            _ = tokio::time::sleep_until(wake_at) => {}
        }

        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            let waited = started.elapsed();
            tracing::warn!(
                round = ?round,
                thread_id = %thread_id,
                waited_ms = waited.as_millis() as u64,
                "gave up waiting for an assistant reply"
            );
            let _ = event_tx.send(PollEvent::new(round, PollEventPayload::TimedOut { waited }));
            return;
        }

        let outcome = tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                tracing::debug!(round = ?round, "poll worker cancelled during fetch");
                return;
            }
            outcome = fetch_once(
                collaborator.as_ref(),
                &thread_id,
                policy.request_timeout,
                consecutive_failures,
            ) => outcome,
        };

        let payload = match outcome {
            Ok(snapshot) => {
                consecutive_failures = 0;
                if policy.detection.is_new_reply(&baseline, &snapshot.messages) {
                    tracing::debug!(
                        round = ?round,
                        message_count = snapshot.messages.len(),
                        "assistant reply observed"
                    );
                    let _ = event_tx.send(PollEvent::new(
                        round,
                        PollEventPayload::ReplyArrived(snapshot),
                    ));
                    return;
                }

                PollEventPayload::Unchanged {
                    message_count: snapshot.messages.len(),
                }
            }
            Err(error) => {
                consecutive_failures = error.consecutive_failures();
                tracing::warn!(
                    round = ?round,
                    thread_id = %thread_id,
                    error = %error,
                    "poll tick failed; retrying on next tick"
                );
                PollEventPayload::TickFailed(error)
            }
        };

        if event_tx.send(PollEvent::new(round, payload)).is_err() {
            return;
        }
    }
}
