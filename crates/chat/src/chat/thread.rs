use mimir_remote::{RemoteMessage, RemoteRole, ThreadSnapshot, ThreadStatus};

/// Title shown until the backend supplies one.
pub const DEFAULT_THREAD_TITLE: &str = "Accelerator Agent";

/// Navigation parameters identifying the thread on screen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadParams {
    pub thread_id: String,
    pub accelerator_id: String,
}

impl ThreadParams {
    /// Returns `None` when either parameter is missing or blank.
    pub fn from_navigation(thread_id: Option<&str>, accelerator_id: Option<&str>) -> Option<Self> {
        let thread_id = thread_id.map(str::trim).filter(|value| !value.is_empty())?;
        let accelerator_id = accelerator_id
            .map(str::trim)
            .filter(|value| !value.is_empty())?;

        Some(Self {
            thread_id: thread_id.to_string(),
            accelerator_id: accelerator_id.to_string(),
        })
    }
}

/// Identifier for one submit-to-reply cycle.
///
/// Changes on every submit so events from an abandoned cycle can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PollRoundId(pub u64);

impl PollRoundId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl From<RemoteRole> for Role {
    fn from(value: RemoteRole) -> Self {
        match value {
            RemoteRole::User => Self::User,
            RemoteRole::Assistant => Self::Assistant,
        }
    }
}

/// Where a local message stands relative to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Appended locally, send still in flight.
    Pending,
    /// Accepted by the backend but not yet seen in a fetched thread.
    Sent,
    /// Present in a fetched thread.
    Confirmed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub remote_id: Option<String>,
    pub status: DeliveryStatus,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>, status: DeliveryStatus) -> Self {
        Self {
            role,
            content: content.into(),
            remote_id: None,
            status,
        }
    }

    /// Creates the optimistic entry for a message the user just submitted.
    pub fn user_pending(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, DeliveryStatus::Pending)
    }

    pub fn from_remote(message: RemoteMessage) -> Self {
        Self {
            role: message.role.into(),
            content: message.content,
            remote_id: message.id,
            status: DeliveryStatus::Confirmed,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == DeliveryStatus::Confirmed
    }
}

/// Transient view of one conversation.
///
/// Values are never edited in place once published; every change builds a new
/// `Thread` so readers always observe a whole sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub params: ThreadParams,
    pub title: String,
    pub status: Option<ThreadStatus>,
    pub messages: Vec<ChatMessage>,
}

impl Thread {
    pub fn from_snapshot(params: ThreadParams, snapshot: ThreadSnapshot) -> Self {
        let title = snapshot
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| DEFAULT_THREAD_TITLE.to_string());

        Self {
            params,
            title,
            status: snapshot.status,
            messages: snapshot
                .messages
                .into_iter()
                .map(ChatMessage::from_remote)
                .collect(),
        }
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Last message the backend has confirmed; optimistic entries are skipped.
    pub fn baseline(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|message| message.is_confirmed())
    }

    pub fn with_appended(&self, message: ChatMessage) -> Self {
        let mut next = self.clone();
        next.messages.push(message);
        next
    }

    /// Rewrites the status of the message at `index`, returning a new thread.
    pub fn with_status_at(&self, index: usize, status: DeliveryStatus) -> Self {
        let mut next = self.clone();
        if let Some(message) = next.messages.get_mut(index) {
            message.status = status;
        }
        next
    }
}

/// Poll lifecycle for one chat session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PollState {
    #[default]
    Idle,
    Waiting(PollRoundId),
    Done(PollRoundId),
    TimedOut(PollRoundId),
}

/// State transition input for the poll lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollTransition {
    Start(PollRoundId),
    ReplyObserved(PollRoundId),
    SendFailed(PollRoundId),
    TimedOut(PollRoundId),
    Cancel(PollRoundId),
    ResetToIdle,
}

/// Rejection reason for illegal poll transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollTransitionRejection {
    AlreadyWaiting {
        active: PollRoundId,
        attempted: PollRoundId,
    },
    NoActiveWait,
    RoundMismatch {
        active: PollRoundId,
        attempted: PollRoundId,
    },
}

pub type PollTransitionResult = Result<PollState, PollTransitionRejection>;

impl PollState {
    /// Returns the active round if and only if state is `Waiting`.
    pub fn active_round(&self) -> Option<PollRoundId> {
        match self {
            Self::Waiting(round) => Some(*round),
            Self::Idle | Self::Done(_) | Self::TimedOut(_) => None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.active_round().is_some()
    }

    /// Input is only locked while a reply is awaited.
    pub fn input_enabled(&self) -> bool {
        !self.is_waiting()
    }

    pub fn accepts_poll_event(&self, round: PollRoundId) -> bool {
        matches!(self, Self::Waiting(active) if *active == round)
    }

    /// Applies one transition deterministically.
    ///
    /// Any non-waiting state may start a new round. Terminal transitions must
    /// name the active round exactly.
    pub fn apply(&self, transition: PollTransition) -> PollTransitionResult {
        match transition {
            PollTransition::Start(round) => self.apply_start(round),
            PollTransition::ReplyObserved(round) => self.finish(round, Self::Done(round)),
            PollTransition::SendFailed(round) => self.finish(round, Self::Idle),
            PollTransition::TimedOut(round) => self.finish(round, Self::TimedOut(round)),
            PollTransition::Cancel(round) => self.finish(round, Self::Idle),
            PollTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn apply_start(&self, round: PollRoundId) -> PollTransitionResult {
        match self {
            Self::Waiting(active) if *active != round => {
                Err(PollTransitionRejection::AlreadyWaiting {
                    active: *active,
                    attempted: round,
                })
            }
            Self::Waiting(_) => Ok(self.clone()),
            Self::Idle | Self::Done(_) | Self::TimedOut(_) => Ok(Self::Waiting(round)),
        }
    }

    fn finish(&self, round: PollRoundId, next: PollState) -> PollTransitionResult {
        match self {
            Self::Waiting(active) if *active == round => Ok(next),
            Self::Waiting(active) => Err(PollTransitionRejection::RoundMismatch {
                active: *active,
                attempted: round,
            }),
            Self::Idle | Self::Done(_) | Self::TimedOut(_) => {
                Err(PollTransitionRejection::NoActiveWait)
            }
        }
    }
}

/// What the renderer reads: the thread plus the poll lifecycle it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub thread: Thread,
    pub poll_state: PollState,
}

impl ChatSnapshot {
    pub fn new(thread: Thread) -> Self {
        Self {
            thread,
            poll_state: PollState::Idle,
        }
    }

    pub fn input_enabled(&self) -> bool {
        self.poll_state.input_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ThreadParams {
        ThreadParams::from_navigation(Some("t1"), Some("a1")).expect("params")
    }

    #[test]
    fn navigation_requires_both_parameters() {
        assert!(ThreadParams::from_navigation(Some("t1"), None).is_none());
        assert!(ThreadParams::from_navigation(None, Some("a1")).is_none());
        assert!(ThreadParams::from_navigation(Some("  "), Some("a1")).is_none());
        assert_eq!(
            ThreadParams::from_navigation(Some(" t1 "), Some("a1")),
            Some(ThreadParams {
                thread_id: "t1".to_string(),
                accelerator_id: "a1".to_string(),
            })
        );
    }

    #[test]
    fn missing_or_blank_title_falls_back_to_placeholder() {
        let snapshot = ThreadSnapshot {
            messages: Vec::new(),
            title: Some("   ".to_string()),
            status: None,
        };
        let thread = Thread::from_snapshot(params(), snapshot);
        assert_eq!(thread.title, DEFAULT_THREAD_TITLE);
    }

    #[test]
    fn baseline_skips_unconfirmed_messages() {
        let snapshot = ThreadSnapshot {
            messages: vec![RemoteMessage::new(RemoteRole::Assistant, "Welcome")],
            title: None,
            status: None,
        };
        let thread = Thread::from_snapshot(params(), snapshot)
            .with_appended(ChatMessage::user_pending("hello"));

        assert_eq!(thread.last_message().map(|m| m.content.as_str()), Some("hello"));
        assert_eq!(thread.baseline().map(|m| m.content.as_str()), Some("Welcome"));
    }

    #[test]
    fn start_while_waiting_on_other_round_is_rejected() {
        let state = PollState::Waiting(PollRoundId::new(1));
        assert_eq!(
            state.apply(PollTransition::Start(PollRoundId::new(2))),
            Err(PollTransitionRejection::AlreadyWaiting {
                active: PollRoundId::new(1),
                attempted: PollRoundId::new(2),
            })
        );
    }

    #[test]
    fn terminal_transitions_require_matching_round() {
        let state = PollState::Waiting(PollRoundId::new(3));
        assert_eq!(
            state.apply(PollTransition::ReplyObserved(PollRoundId::new(2))),
            Err(PollTransitionRejection::RoundMismatch {
                active: PollRoundId::new(3),
                attempted: PollRoundId::new(2),
            })
        );
        assert_eq!(
            PollState::Idle.apply(PollTransition::Cancel(PollRoundId::new(3))),
            Err(PollTransitionRejection::NoActiveWait)
        );
    }

    #[test]
    fn done_and_timed_out_reenable_input() {
        let round = PollRoundId::new(1);
        let waiting = PollState::Idle
            .apply(PollTransition::Start(round))
            .expect("start");
        assert!(!waiting.input_enabled());

        let done = waiting
            .apply(PollTransition::ReplyObserved(round))
            .expect("reply");
        assert!(done.input_enabled());

        let timed_out = waiting.apply(PollTransition::TimedOut(round)).expect("timeout");
        assert!(timed_out.input_enabled());

        let reverted = waiting.apply(PollTransition::SendFailed(round)).expect("send failed");
        assert_eq!(reverted, PollState::Idle);
    }

    #[test]
    fn reset_clears_any_state() {
        let round = PollRoundId::new(4);
        for state in [
            PollState::Waiting(round),
            PollState::Done(round),
            PollState::TimedOut(round),
        ] {
            assert_eq!(state.apply(PollTransition::ResetToIdle), Ok(PollState::Idle));
        }
    }
}
