#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use mimir_chat::chat::{ChatSession, PollPolicy, ThreadParams};
use mimir_remote::{
    Operation, RemoteError, RemoteMessage, RemoteResult, RemoteRole, SendAck,
    SessionCollaborator, ThreadSnapshot, ThreadStatus, ThreadSummary,
};
use tokio::sync::Notify;
use tokio::time::Instant;

pub fn user(content: &str) -> RemoteMessage {
    RemoteMessage::new(RemoteRole::User, content)
}

pub fn assistant(content: &str) -> RemoteMessage {
    RemoteMessage::new(RemoteRole::Assistant, content)
}

pub fn thread_of(messages: Vec<RemoteMessage>) -> ThreadSnapshot {
    ThreadSnapshot {
        messages,
        title: Some("Accelerator Agent".to_string()),
        status: Some(ThreadStatus::Ready),
    }
}

pub fn status_error(operation: Operation, status: u16) -> RemoteError {
    RemoteError::Status {
        stage: "scripted",
        operation,
        status,
        body: "unavailable".to_string(),
    }
}

pub fn params() -> ThreadParams {
    ThreadParams::from_navigation(Some("t1"), Some("a1")).expect("navigation params")
}

/// One scripted answer to `fetch_thread`.
pub enum FetchStep {
    Return(ThreadSnapshot),
    Fail(u16),
    /// Answers only after `delay`.
    Stall(Duration, ThreadSnapshot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub thread_id: String,
    pub accelerator_id: String,
    pub content: String,
}

struct Script {
    fetches: VecDeque<FetchStep>,
    backend: ThreadSnapshot,
    sends: VecDeque<RemoteResult<SendAck>>,
    fetch_times: Vec<Instant>,
    sent: Vec<SentMessage>,
    gate_sends: bool,
}

/// In-memory collaborator answering from a queue, then from `backend`.
pub struct ScriptedCollaborator {
    script: Mutex<Script>,
    send_started: Notify,
    send_release: Notify,
}

impl ScriptedCollaborator {
    pub fn new(backend: ThreadSnapshot) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script {
                fetches: VecDeque::new(),
                backend,
                sends: VecDeque::new(),
                fetch_times: Vec::new(),
                sent: Vec::new(),
                gate_sends: false,
            }),
            send_started: Notify::new(),
            send_release: Notify::new(),
        })
    }

    pub fn queue_fetch(&self, step: FetchStep) {
        self.script.lock().expect("script").fetches.push_back(step);
    }

    pub fn set_backend(&self, backend: ThreadSnapshot) {
        self.script.lock().expect("script").backend = backend;
    }

    pub fn queue_send(&self, result: RemoteResult<SendAck>) {
        self.script.lock().expect("script").sends.push_back(result);
    }

    /// Holds every send until `release_send` is called.
    pub fn gate_sends(&self) {
        self.script.lock().expect("script").gate_sends = true;
    }

    pub async fn wait_for_send(&self) {
        self.send_started.notified().await;
    }

    pub fn release_send(&self) {
        self.send_release.notify_one();
    }

    pub fn fetch_count(&self) -> usize {
        self.script.lock().expect("script").fetch_times.len()
    }

    pub fn fetch_times(&self) -> Vec<Instant> {
        self.script.lock().expect("script").fetch_times.clone()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.script.lock().expect("script").sent.clone()
    }

    fn next_fetch(&self) -> FetchStep {
        let mut script = self.script.lock().expect("script");
        script.fetch_times.push(Instant::now());
        match script.fetches.pop_front() {
            Some(step) => step,
            None => FetchStep::Return(script.backend.clone()),
        }
    }
}

impl SessionCollaborator for ScriptedCollaborator {
    fn fetch_thread<'a>(&'a self, _thread_id: &'a str) -> BoxFuture<'a, RemoteResult<ThreadSnapshot>> {
        let step = self.next_fetch();
        Box::pin(async move {
            match step {
                FetchStep::Return(snapshot) => Ok(snapshot),
                FetchStep::Fail(status) => Err(status_error(Operation::FetchThread, status)),
                FetchStep::Stall(delay, snapshot) => {
                    tokio::time::sleep(delay).await;
                    Ok(snapshot)
                }
            }
        })
    }

    fn send_message<'a>(
        &'a self,
        thread_id: &'a str,
        accelerator_id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, RemoteResult<SendAck>> {
        let (gated, result) = {
            let mut script = self.script.lock().expect("script");
            script.sent.push(SentMessage {
                thread_id: thread_id.to_string(),
                accelerator_id: accelerator_id.to_string(),
                content: content.to_string(),
            });
            let result = script.sends.pop_front().unwrap_or_else(|| Ok(SendAck::default()));
            (script.gate_sends, result)
        };

        Box::pin(async move {
            if gated {
                self.send_started.notify_one();
                self.send_release.notified().await;
            }
            result
        })
    }

    fn list_threads(&self) -> BoxFuture<'_, RemoteResult<Vec<ThreadSummary>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn create_thread<'a>(&'a self, _accelerator_id: &'a str) -> BoxFuture<'a, RemoteResult<String>> {
        Box::pin(async { Ok("t-new".to_string()) })
    }
}

pub async fn mount(collaborator: &Arc<ScriptedCollaborator>, policy: PollPolicy) -> ChatSession {
    ChatSession::mount(collaborator.clone(), params(), policy)
        .await
        .expect("mount")
}
