use futures::future::BoxFuture;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::{ResultExt, ensure};

use super::collaborator::{
    BuildClientSnafu, DecodeSnafu, EmptyArgumentSnafu, MissingEndpointSnafu,
    MissingInstanceIdSnafu, Operation, RemoteConfig, RemoteResult, SessionCollaborator,
    StatusSnafu, TransportSnafu,
};
use super::wire::{
    CreateThreadBody, CreatedThread, FetchThreadBody, ListThreadsBody, OutgoingMessage, SendAck,
    SendMessageBody, SendPayload, ThreadSnapshot, ThreadSummary,
};

/// Talks to the chat endpoint with JSON POST requests.
pub struct HttpCollaborator {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl HttpCollaborator {
    pub fn new(config: RemoteConfig) -> RemoteResult<Self> {
        ensure!(
            !config.endpoint.is_empty(),
            MissingEndpointSnafu {
                stage: "http-collaborator-new",
            }
        );
        ensure!(
            !config.instance_id.is_empty(),
            MissingInstanceIdSnafu {
                stage: "http-collaborator-new",
            }
        );

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context(BuildClientSnafu {
            stage: "build-client",
        })?;

        Ok(Self { config, client })
    }

    async fn post_json<B>(&self, operation: Operation, body: &B) -> RemoteResult<String>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.client.post(self.config.endpoint.as_str()).json(body);
        if let Some(credentials) = &self.config.credentials {
            request = request.basic_auth(
                &credentials.username,
                Some(credentials.password.expose_secret()),
            );
        }

        tracing::debug!(
            operation = operation.as_str(),
            endpoint = %self.config.endpoint,
            "posting chat request"
        );

        let response = request.send().await.context(TransportSnafu {
            stage: "send-request",
            operation,
        })?;
        let status = response.status();
        let payload = response.text().await.context(TransportSnafu {
            stage: "read-response",
            operation,
        })?;

        if !status.is_success() {
            tracing::warn!(
                operation = operation.as_str(),
                status = status.as_u16(),
                "chat endpoint rejected request"
            );
            return StatusSnafu {
                stage: "response-status",
                operation,
                status: status.as_u16(),
                body: payload,
            }
            .fail();
        }

        Ok(payload)
    }

    fn decode<T>(operation: Operation, payload: &str) -> RemoteResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_str(payload).context(DecodeSnafu {
            stage: "decode-response",
            operation,
        })
    }

    fn decode_send_ack(payload: &str) -> RemoteResult<SendAck> {
        if payload.trim().is_empty() {
            return Ok(SendAck::default());
        }

        let value: serde_json::Value = Self::decode(Operation::SendMessage, payload)?;
        if !value.is_object() {
            // A bare acknowledgment such as `"ok"` or `null` carries no thread data.
            return Ok(SendAck::default());
        }

        let parsed: SendPayload =
            serde_json::from_value(value).context(DecodeSnafu {
                stage: "decode-send-ack",
                operation: Operation::SendMessage,
            })?;
        Ok(SendAck {
            messages: parsed.messages,
        })
    }

    fn require(operation: Operation, field: &'static str, value: &str) -> RemoteResult<()> {
        ensure!(
            !value.trim().is_empty(),
            EmptyArgumentSnafu {
                stage: "validate-argument",
                operation,
                field,
            }
        );
        Ok(())
    }
}

impl SessionCollaborator for HttpCollaborator {
    fn fetch_thread<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, RemoteResult<ThreadSnapshot>> {
        Box::pin(async move {
            let operation = Operation::FetchThread;
            Self::require(operation, "thread id", thread_id)?;

            let body = FetchThreadBody {
                instance_id: &self.config.instance_id,
                thread_id,
            };
            let payload = self.post_json(operation, &body).await?;
            Self::decode(operation, &payload)
        })
    }

    fn send_message<'a>(
        &'a self,
        thread_id: &'a str,
        accelerator_id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, RemoteResult<SendAck>> {
        Box::pin(async move {
            let operation = Operation::SendMessage;
            Self::require(operation, "thread id", thread_id)?;
            Self::require(operation, "accelerator id", accelerator_id)?;
            Self::require(operation, "message content", content)?;

            let body = SendMessageBody {
                instance_id: &self.config.instance_id,
                thread_id,
                message: OutgoingMessage { content },
                accelerator_id,
            };
            let payload = self.post_json(operation, &body).await?;
            Self::decode_send_ack(&payload)
        })
    }

    fn list_threads(&self) -> BoxFuture<'_, RemoteResult<Vec<ThreadSummary>>> {
        Box::pin(async move {
            let operation = Operation::ListThreads;
            let body = ListThreadsBody {
                instance_id: &self.config.instance_id,
            };
            let payload = self.post_json(operation, &body).await?;
            Self::decode(operation, &payload)
        })
    }

    fn create_thread<'a>(&'a self, accelerator_id: &'a str) -> BoxFuture<'a, RemoteResult<String>> {
        Box::pin(async move {
            let operation = Operation::CreateThread;
            Self::require(operation, "accelerator id", accelerator_id)?;

            let body = CreateThreadBody {
                instance_id: &self.config.instance_id,
                create_thread: true,
                accelerator_id,
            };
            let payload = self.post_json(operation, &body).await?;
            let created: CreatedThread = Self::decode(operation, &payload)?;
            Ok(created.thread_id)
        })
    }
}
