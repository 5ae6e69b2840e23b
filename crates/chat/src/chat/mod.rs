/// Poll worker reports and session-level events.
pub mod events;
pub mod poll;
pub mod session;
/// Thread entities and the deterministic poll state boundary.
pub mod thread;

pub use events::{PollEvent, PollEventPayload, SessionEvent, SubmitOutcome};
pub use poll::{
    DEFAULT_MAX_POLL_INTERVAL, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, PollHandle, PollPolicy,
    ReplyBaseline, ReplyDetection,
};
pub use session::{ChatSession, SnapshotReader};
pub use thread::{
    ChatMessage, ChatSnapshot, DEFAULT_THREAD_TITLE, DeliveryStatus, PollRoundId, PollState,
    PollTransition, PollTransitionRejection, PollTransitionResult, Role, Thread, ThreadParams,
};
