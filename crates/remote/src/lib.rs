use std::sync::Arc;

mod collaborator;
mod http_adapter;
pub mod wire;

pub use collaborator::{
    Credentials, Operation, RemoteConfig, RemoteError, RemoteResult, SessionCollaborator,
};
pub use http_adapter::HttpCollaborator;
pub use wire::{RemoteMessage, RemoteRole, SendAck, ThreadSnapshot, ThreadStatus, ThreadSummary};

pub fn create_collaborator(config: RemoteConfig) -> RemoteResult<Arc<dyn SessionCollaborator>> {
    Ok(Arc::new(HttpCollaborator::new(config)?))
}
