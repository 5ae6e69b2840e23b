//! JSON bodies exchanged with the chat endpoint.
//!
//! Every operation is a POST to the same URL; the backend dispatches on which
//! fields are present, so request shapes must not grow optional keys.

use serde::{Deserialize, Deserializer, Serialize};

/// Speaker role as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRole {
    User,
    // One backend variant stores canned replies with role "bot".
    #[serde(alias = "bot")]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub content: String,
    pub role: RemoteRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl RemoteMessage {
    pub fn new(role: RemoteRole, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role,
            id: None,
            timestamp: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Processing status the backend attaches to a fetched thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Ready,
    Processing,
}

/// One fetched view of a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    // A thread with no messages yet is sent as `"messages": null`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<RemoteMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ThreadStatus>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<RemoteMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<RemoteMessage>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Result of an accepted send.
///
/// Some backend builds answer with the updated message list, others with an
/// empty body. `messages` is `None` for the latter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendAck {
    pub messages: Option<Vec<RemoteMessage>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub accelerator_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FetchThreadBody<'a> {
    pub instance_id: &'a str,
    pub thread_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OutgoingMessage<'a> {
    pub content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessageBody<'a> {
    pub instance_id: &'a str,
    pub thread_id: &'a str,
    pub message: OutgoingMessage<'a>,
    pub accelerator_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListThreadsBody<'a> {
    pub instance_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateThreadBody<'a> {
    pub instance_id: &'a str,
    pub create_thread: bool,
    pub accelerator_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreatedThread {
    pub thread_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SendPayload {
    #[serde(default)]
    pub messages: Option<Vec<RemoteMessage>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_role_decodes_as_assistant() {
        let message: RemoteMessage =
            serde_json::from_str(r#"{"content":"This is a bot response","role":"bot"}"#)
                .expect("bot role should decode");
        assert_eq!(message.role, RemoteRole::Assistant);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let result = serde_json::from_str::<RemoteMessage>(r#"{"content":"x","role":"system"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_ignores_backend_bookkeeping_fields() {
        let snapshot: ThreadSnapshot = serde_json::from_str(
            r#"{
                "id": "t1",
                "user_id": "dev274800",
                "title": "Incident triage",
                "messages": [
                    {"id": "m1", "role": "user", "content": "hello", "timestamp": "2024-09-01T10:00:00Z"}
                ],
                "is_active": true,
                "status": "ready"
            }"#,
        )
        .expect("backend thread payload should decode");

        assert_eq!(snapshot.title.as_deref(), Some("Incident triage"));
        assert_eq!(snapshot.status, Some(ThreadStatus::Ready));
        assert_eq!(snapshot.messages[0].id.as_deref(), Some("m1"));
    }

    #[test]
    fn snapshot_without_messages_field_is_empty() {
        let snapshot: ThreadSnapshot =
            serde_json::from_str(r#"{"status":"processing"}"#).expect("decode");
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.title.is_none());
    }

    #[test]
    fn fresh_thread_with_null_messages_decodes_as_empty() {
        let snapshot: ThreadSnapshot = serde_json::from_str(
            r#"{"id":"t1","title":"New Chat Thread","messages":null,"is_active":true,"status":"processing"}"#,
        )
        .expect("fresh thread payload should decode");

        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.title.as_deref(), Some("New Chat Thread"));
        assert_eq!(snapshot.status, Some(ThreadStatus::Processing));
    }

    #[test]
    fn send_ack_with_null_messages_has_none() {
        let payload: SendPayload =
            serde_json::from_str(r#"{"id":"t1","messages":null}"#).expect("decode");
        assert!(payload.messages.is_none());
    }

    #[test]
    fn send_body_uses_camel_case_keys() {
        let body = SendMessageBody {
            instance_id: "dev274800",
            thread_id: "t1",
            message: OutgoingMessage { content: "hello" },
            accelerator_id: "a1",
        };

        let value = serde_json::to_value(&body).expect("encode");
        assert_eq!(
            value,
            serde_json::json!({
                "instanceId": "dev274800",
                "threadId": "t1",
                "message": {"content": "hello"},
                "acceleratorId": "a1",
            })
        );
    }

    #[test]
    fn create_body_sets_create_flag() {
        let body = CreateThreadBody {
            instance_id: "dev274800",
            create_thread: true,
            accelerator_id: "a9",
        };

        let value = serde_json::to_value(&body).expect("encode");
        assert_eq!(value["createThread"], serde_json::json!(true));
        assert_eq!(value["acceleratorId"], serde_json::json!("a9"));
    }
}
