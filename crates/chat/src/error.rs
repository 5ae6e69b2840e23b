use std::time::Duration;

use mimir_remote::RemoteError;
use snafu::Snafu;

use crate::chat::{PollRoundId, PollTransitionRejection};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("failed to fetch thread '{thread_id}' on `{stage}`, {source}"))]
    Fetch {
        stage: &'static str,
        thread_id: String,
        source: RemoteError,
    },
    #[snafu(display("message for thread '{thread_id}' was not accepted on `{stage}`, {source}"))]
    Send {
        stage: &'static str,
        thread_id: String,
        source: RemoteError,
    },
    #[snafu(display("cannot send an empty message"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("still waiting for a reply to round {active:?}"))]
    AlreadyWaiting {
        stage: &'static str,
        active: PollRoundId,
    },
    #[snafu(display("poll transition rejected on `{stage}`: {rejection:?}"))]
    Transition {
        stage: &'static str,
        rejection: PollTransitionRejection,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// A failed poll tick. Logged and reported, never fatal to the loop.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PollTickError {
    #[snafu(display("poll fetch failed ({consecutive_failures} in a row), {source}"))]
    TickFetch {
        consecutive_failures: u32,
        source: RemoteError,
    },
    #[snafu(display(
        "poll fetch timed out after {timeout:?} ({consecutive_failures} in a row)"
    ))]
    TickTimeout {
        consecutive_failures: u32,
        timeout: Duration,
    },
}

impl PollTickError {
    pub fn consecutive_failures(&self) -> u32 {
        match self {
            Self::TickFetch {
                consecutive_failures,
                ..
            }
            | Self::TickTimeout {
                consecutive_failures,
                ..
            } => *consecutive_failures,
        }
    }
}
