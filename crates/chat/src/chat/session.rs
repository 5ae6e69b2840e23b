use std::sync::Arc;

use arc_swap::ArcSwap;
use mimir_remote::{SessionCollaborator, ThreadSnapshot};
use snafu::{ResultExt, ensure};

use crate::chat::events::{PollEvent, PollEventPayload, SessionEvent, SubmitOutcome};
use crate::chat::poll::{PollHandle, PollPolicy, PollRequest, ReplyBaseline};
use crate::chat::thread::{
    ChatMessage, ChatSnapshot, DeliveryStatus, PollRoundId, PollState, PollTransition, Thread,
    ThreadParams,
};
use crate::error::{
    AlreadyWaitingSnafu, EmptyMessageSnafu, FetchSnafu, SendSnafu, SessionResult,
    TransitionSnafu,
};

/// Read side of a session's published state.
///
/// Cheap to clone; every `load` returns a complete snapshot.
#[derive(Clone)]
pub struct SnapshotReader {
    inner: Arc<ArcSwap<ChatSnapshot>>,
}

impl SnapshotReader {
    pub fn load(&self) -> Arc<ChatSnapshot> {
        self.inner.load_full()
    }
}

/// One open chat thread: initial fetch, optimistic submit, poll-until-reply.
///
/// The session is the only writer of its snapshot. The poll worker fetches
/// and reports; `next_event` applies what it reports.
pub struct ChatSession {
    collaborator: Arc<dyn SessionCollaborator>,
    params: ThreadParams,
    policy: PollPolicy,
    snapshot: Arc<ArcSwap<ChatSnapshot>>,
    active_poll: Option<PollHandle>,
    next_round: u64,
}

impl ChatSession {
    /// Fetches the thread and opens a session on it.
    ///
    /// No tick can be scheduled before this returns.
    pub async fn mount(
        collaborator: Arc<dyn SessionCollaborator>,
        params: ThreadParams,
        policy: PollPolicy,
    ) -> SessionResult<Self> {
        let thread = Self::fetch_thread(collaborator.as_ref(), &params, "mount-fetch").await?;

        tracing::info!(
            thread_id = %params.thread_id,
            accelerator_id = %params.accelerator_id,
            message_count = thread.messages.len(),
            "chat session mounted"
        );

        Ok(Self {
            collaborator,
            params,
            policy,
            snapshot: Arc::new(ArcSwap::from_pointee(ChatSnapshot::new(thread))),
            active_poll: None,
            next_round: 1,
        })
    }

    async fn fetch_thread(
        collaborator: &dyn SessionCollaborator,
        params: &ThreadParams,
        stage: &'static str,
    ) -> SessionResult<Thread> {
        let snapshot = collaborator
            .fetch_thread(&params.thread_id)
            .await
            .context(FetchSnafu {
                stage,
                thread_id: params.thread_id.clone(),
            })?;
        Ok(Thread::from_snapshot(params.clone(), snapshot))
    }

    pub fn snapshot(&self) -> Arc<ChatSnapshot> {
        self.snapshot.load_full()
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            inner: Arc::clone(&self.snapshot),
        }
    }

    pub fn poll_state(&self) -> PollState {
        self.snapshot.load().poll_state.clone()
    }

    pub fn has_active_poll(&self) -> bool {
        self.active_poll.is_some()
    }

    /// Re-fetches the thread while no reply is awaited.
    pub async fn refresh(&mut self) -> SessionResult<()> {
        let current = self.snapshot();
        if let Some(active) = current.poll_state.active_round() {
            return AlreadyWaitingSnafu {
                stage: "refresh",
                active,
            }
            .fail();
        }

        let thread =
            Self::fetch_thread(self.collaborator.as_ref(), &self.params, "refresh-fetch").await?;
        self.publish(thread, current.poll_state.clone());
        Ok(())
    }

    /// Appends `content` optimistically, sends it, and starts waiting for a reply.
    ///
    /// On a rejected send the optimistic entry stays, marked failed, and input
    /// is re-enabled.
    pub async fn submit(&mut self, content: &str) -> SessionResult<SubmitOutcome> {
        ensure!(
            !content.trim().is_empty(),
            EmptyMessageSnafu { stage: "submit" }
        );

        let current = self.snapshot();
        if let Some(active) = current.poll_state.active_round() {
            return AlreadyWaitingSnafu {
                stage: "submit",
                active,
            }
            .fail();
        }

        let round = self.reserve_round();
        let waiting = self.transition(
            &current.poll_state,
            PollTransition::Start(round),
            "submit-start",
        )?;

        let pending_index = current.thread.messages.len();
        let thread = current
            .thread
            .with_appended(ChatMessage::user_pending(content));
        let baseline = ReplyBaseline::from_thread(&thread);
        self.publish(thread, waiting);

        tracing::debug!(
            round = ?round,
            thread_id = %self.params.thread_id,
            "sending user message"
        );

        let sent = self
            .collaborator
            .send_message(&self.params.thread_id, &self.params.accelerator_id, content)
            .await;

        let ack = match sent {
            Ok(ack) => ack,
            Err(source) => {
                tracing::warn!(
                    round = ?round,
                    thread_id = %self.params.thread_id,
                    error = %source,
                    "send failed; re-enabling input"
                );
                let current = self.snapshot();
                let thread = current
                    .thread
                    .with_status_at(pending_index, DeliveryStatus::Failed(source.to_string()));
                let reverted = self.transition(
                    &current.poll_state,
                    PollTransition::SendFailed(round),
                    "submit-send-failed",
                )?;
                self.publish(thread, reverted);

                return Err(source).context(SendSnafu {
                    stage: "submit-send",
                    thread_id: self.params.thread_id.clone(),
                });
            }
        };

        let current = self.snapshot();
        let thread = current
            .thread
            .with_status_at(pending_index, DeliveryStatus::Sent);
        self.publish(thread, current.poll_state.clone());

        if let Some(messages) = ack.messages
            && self.policy.detection.is_new_reply(&baseline, &messages)
        {
            self.apply_reply(
                round,
                ThreadSnapshot {
                    messages,
                    title: None,
                    status: None,
                },
            )?;
            return Ok(SubmitOutcome::Replied(round));
        }

        self.active_poll = Some(PollHandle::spawn(
            Arc::clone(&self.collaborator),
            PollRequest {
                round,
                thread_id: self.params.thread_id.clone(),
                baseline,
                policy: self.policy,
            },
        ));

        Ok(SubmitOutcome::Polling(round))
    }

    /// Waits for the poll worker's next report and applies it.
    ///
    /// Returns `None` when no poll is running.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let handle = self.active_poll.as_mut()?;
            let Some(event) = handle.recv().await else {
                tracing::debug!("poll worker stopped without a terminal event");
                self.active_poll = None;
                return None;
            };

            if !self.snapshot.load().poll_state.accepts_poll_event(event.round) {
                tracing::debug!(round = ?event.round, "dropping stale poll event");
                continue;
            }

            match self.apply_poll_event(event) {
                Ok(session_event) => return Some(session_event),
                Err(error) => {
                    tracing::error!(error = %error, "failed to apply poll event");
                    self.stop_poll();
                    return None;
                }
            }
        }
    }

    /// Stops any running poll and discards the session.
    pub fn teardown(mut self) {
        self.cancel_active_poll();
    }

    /// Cancels the running poll, if any, and re-enables input.
    pub fn cancel_active_poll(&mut self) {
        let current = self.snapshot();
        if let Some(round) = current.poll_state.active_round()
            && let Ok(next) = current.poll_state.apply(PollTransition::Cancel(round))
        {
            tracing::debug!(round = ?round, "cancelling active poll");
            self.publish(current.thread.clone(), next);
        }
        self.stop_poll();
    }

    fn apply_poll_event(&mut self, event: PollEvent) -> SessionResult<SessionEvent> {
        let round = event.round;
        let transition = event.transition();

        match event.payload {
            PollEventPayload::Unchanged { message_count } => Ok(SessionEvent::StillWaiting {
                round,
                message_count,
            }),
            PollEventPayload::TickFailed(error) => Ok(SessionEvent::TickFailed { round, error }),
            PollEventPayload::ReplyArrived(snapshot) => {
                self.apply_reply(round, snapshot)?;
                Ok(SessionEvent::ReplyReceived { round })
            }
            PollEventPayload::TimedOut { waited } => {
                let current = self.snapshot();
                if let Some(transition) = transition {
                    let next = self.transition(&current.poll_state, transition, "poll-timed-out")?;
                    self.publish(current.thread.clone(), next);
                }
                self.stop_poll();
                Ok(SessionEvent::TimedOut { round, waited })
            }
        }
    }

    /// Replaces the local thread with the fetched one and finishes the round.
    fn apply_reply(&mut self, round: PollRoundId, snapshot: ThreadSnapshot) -> SessionResult<()> {
        let current = self.snapshot();
        let next_state = self.transition(
            &current.poll_state,
            PollTransition::ReplyObserved(round),
            "apply-reply",
        )?;

        // A send acknowledgment carries messages only; keep what the mount fetch learned.
        let keep_title = snapshot.title.is_none();
        let keep_status = snapshot.status.is_none();
        let mut thread = Thread::from_snapshot(self.params.clone(), snapshot);
        if keep_title {
            thread.title = current.thread.title.clone();
        }
        if keep_status {
            thread.status = current.thread.status;
        }

        tracing::info!(
            round = ?round,
            thread_id = %self.params.thread_id,
            message_count = thread.messages.len(),
            "assistant reply applied"
        );

        self.publish(thread, next_state);
        self.stop_poll();
        Ok(())
    }

    fn transition(
        &self,
        state: &PollState,
        transition: PollTransition,
        stage: &'static str,
    ) -> SessionResult<PollState> {
        state
            .apply(transition)
            .map_err(|rejection| TransitionSnafu { stage, rejection }.build())
    }

    fn publish(&self, thread: Thread, poll_state: PollState) {
        self.snapshot
            .store(Arc::new(ChatSnapshot { thread, poll_state }));
    }

    fn stop_poll(&mut self) {
        if let Some(mut handle) = self.active_poll.take() {
            handle.cancel();
        }
    }

    fn reserve_round(&mut self) -> PollRoundId {
        let round = PollRoundId::new(self.next_round);
        self.next_round = self.next_round.saturating_add(1);
        round
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.stop_poll();
    }
}
