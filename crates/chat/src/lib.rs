pub mod chat;
pub mod error;
pub mod settings;

pub use error::{PollTickError, SessionError, SessionResult};
