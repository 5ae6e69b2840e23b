use std::time::Duration;

use mimir_remote::ThreadSnapshot;

use crate::chat::thread::{PollRoundId, PollTransition};
use crate::error::PollTickError;

/// What one poll tick observed.
#[derive(Debug)]
pub enum PollEventPayload {
    /// Fetched thread holds no new reply yet.
    Unchanged { message_count: usize },
    ReplyArrived(ThreadSnapshot),
    TickFailed(PollTickError),
    TimedOut { waited: Duration },
}

/// Emitted by the poll worker, tagged with the round it belongs to.
#[derive(Debug)]
pub struct PollEvent {
    pub round: PollRoundId,
    pub payload: PollEventPayload,
}

impl PollEvent {
    pub fn new(round: PollRoundId, payload: PollEventPayload) -> Self {
        Self { round, payload }
    }

    /// Maps terminal payloads to poll state transitions.
    ///
    /// Non-terminal payloads return `None`; the round keeps waiting.
    pub fn transition(&self) -> Option<PollTransition> {
        match self.payload {
            PollEventPayload::Unchanged { .. } | PollEventPayload::TickFailed(_) => None,
            PollEventPayload::ReplyArrived(_) => Some(PollTransition::ReplyObserved(self.round)),
            PollEventPayload::TimedOut { .. } => Some(PollTransition::TimedOut(self.round)),
        }
    }
}

/// Outcome of a submit that the backend accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A poll worker is running for the round.
    Polling(PollRoundId),
    /// The send acknowledgment already carried the reply.
    Replied(PollRoundId),
}

impl SubmitOutcome {
    pub fn round(self) -> PollRoundId {
        match self {
            Self::Polling(round) | Self::Replied(round) => round,
        }
    }
}

/// Session-level change observed after applying a poll event.
#[derive(Debug)]
pub enum SessionEvent {
    StillWaiting {
        round: PollRoundId,
        message_count: usize,
    },
    ReplyReceived {
        round: PollRoundId,
    },
    TickFailed {
        round: PollRoundId,
        error: PollTickError,
    },
    TimedOut {
        round: PollRoundId,
        waited: Duration,
    },
}

impl SessionEvent {
    pub fn round(&self) -> PollRoundId {
        match self {
            Self::StillWaiting { round, .. }
            | Self::ReplyReceived { round }
            | Self::TickFailed { round, .. }
            | Self::TimedOut { round, .. } => *round,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReplyReceived { .. } | Self::TimedOut { .. })
    }
}
