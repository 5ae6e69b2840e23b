use std::time::Duration;

use futures::future::BoxFuture;
use secrecy::SecretString;
use snafu::Snafu;

use super::wire::{SendAck, ThreadSnapshot, ThreadSummary};

/// HTTP Basic credentials injected at construction time.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into().trim().to_string(),
            password: SecretString::from(password.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub instance_id: String,
    pub credentials: Option<Credentials>,
    pub request_timeout: Option<Duration>,
}

impl RemoteConfig {
    pub fn new(endpoint: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim().to_string(),
            instance_id: instance_id.into().trim().to_string(),
            credentials: None,
            request_timeout: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Which endpoint call an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchThread,
    SendMessage,
    ListThreads,
    CreateThread,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchThread => "fetch-thread",
            Self::SendMessage => "send-message",
            Self::ListThreads => "list-threads",
            Self::CreateThread => "create-thread",
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RemoteError {
    #[snafu(display("chat endpoint is not configured"))]
    MissingEndpoint { stage: &'static str },
    #[snafu(display("instance id is not configured"))]
    MissingInstanceId { stage: &'static str },
    #[snafu(display("{operation:?} requires a non-empty {field}"))]
    EmptyArgument {
        stage: &'static str,
        operation: Operation,
        field: &'static str,
    },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("{operation:?} transport failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        operation: Operation,
        source: reqwest::Error,
    },
    #[snafu(display("{operation:?} returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        operation: Operation,
        status: u16,
        body: String,
    },
    #[snafu(display("{operation:?} response could not be decoded on `{stage}`, {source}"))]
    Decode {
        stage: &'static str,
        operation: Operation,
        source: serde_json::Error,
    },
}

impl RemoteError {
    /// True when the http client gave up waiting for the response.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }
}

/// The remote side of a chat thread.
///
/// Implementations must not mutate caller state; every call returns a fresh
/// value that the caller decides whether to apply.
pub trait SessionCollaborator: Send + Sync {
    fn fetch_thread<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, RemoteResult<ThreadSnapshot>>;

    /// Submits a user message. Acceptance does not imply the reply has started.
    fn send_message<'a>(
        &'a self,
        thread_id: &'a str,
        accelerator_id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, RemoteResult<SendAck>>;

    fn list_threads(&self) -> BoxFuture<'_, RemoteResult<Vec<ThreadSummary>>>;

    fn create_thread<'a>(&'a self, accelerator_id: &'a str) -> BoxFuture<'a, RemoteResult<String>>;
}
