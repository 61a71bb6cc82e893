use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use threadrun_common::{Error, Message, Result, Role, ThreadHandle};
use tracing::debug;

use crate::gateway::{
    AssistantGateway, HIDDEN_KEY, Metadata, RequiredAction, Run, RunError, RunStatus, ToolCall,
    ToolOutput,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Metadata key recording the role a message had before adaptation; the
/// service only accepts `user` and `assistant` authors.
const ORIGIN_ROLE_KEY: &str = "origin_role";

const PAGE_LIMIT: u32 = 100;

const CHECK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Gateway backed by the OpenAI Assistants API (v2).
#[derive(Clone)]
pub struct OpenAiAssistantGateway {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAssistantGateway {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Bound every request to the service by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(self)
    }

    /// One-shot chat completion outside any thread, used to check that the
    /// credential and model work end to end.
    pub async fn complete_prompt(&self, model: &str, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model,
            messages: [
                WireChatMessage {
                    role: "system",
                    content: CHECK_SYSTEM_PROMPT,
                },
                WireChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };
        let completion: WireChatCompletion = self
            .send(self.client.post(self.url("/chat/completions")).json(&request))
            .await?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Provider {
                status: 200,
                detail: "chat completion returned no content".into(),
            })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read OpenAI response: {e}")))?;

        if !status.is_success() {
            return Err(Error::Provider {
                status: status.as_u16(),
                detail: provider_detail(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Provider {
            status: status.as_u16(),
            detail: format!("malformed response: {e}"),
        })
    }
}

#[async_trait]
impl AssistantGateway for OpenAiAssistantGateway {
    async fn create_thread(&self) -> Result<ThreadHandle> {
        let thread: WireThread = self
            .send(self.client.post(self.url("/threads")).json(&serde_json::json!({})))
            .await?;
        Ok(ThreadHandle::new(thread.id))
    }

    async fn append_message(
        &self,
        thread: &ThreadHandle,
        role: Role,
        content: &str,
        mut metadata: Metadata,
    ) -> Result<Message> {
        let wire_role = match role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => {
                metadata.insert(ORIGIN_ROLE_KEY.to_string(), "system".to_string());
                "assistant"
            }
        };
        let request = CreateMessageRequest {
            role: wire_role,
            content,
            metadata: (!metadata.is_empty()).then_some(&metadata),
        };

        let message: WireMessage = self
            .send(
                self.client
                    .post(self.url(&format!("/threads/{thread}/messages")))
                    .json(&request),
            )
            .await?;
        Ok(message.into_message())
    }

    async fn create_run(&self, thread: &ThreadHandle, assistant_id: &str) -> Result<Run> {
        let run: WireRun = self
            .send(
                self.client
                    .post(self.url(&format!("/threads/{thread}/runs")))
                    .json(&serde_json::json!({ "assistant_id": assistant_id })),
            )
            .await?;
        Ok(run.into_run())
    }

    async fn retrieve_run(&self, thread: &ThreadHandle, run_id: &str) -> Result<Run> {
        let run: WireRun = self
            .send(
                self.client
                    .get(self.url(&format!("/threads/{thread}/runs/{run_id}"))),
            )
            .await?;
        Ok(run.into_run())
    }

    async fn submit_tool_outputs(
        &self,
        thread: &ThreadHandle,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        let request = SubmitToolOutputsRequest {
            tool_outputs: outputs
                .iter()
                .map(|o| WireToolOutput {
                    tool_call_id: &o.call_id,
                    output: &o.output,
                })
                .collect(),
        };
        let run: WireRun = self
            .send(
                self.client
                    .post(self.url(&format!(
                        "/threads/{thread}/runs/{run_id}/submit_tool_outputs"
                    )))
                    .json(&request),
            )
            .await?;
        Ok(run.into_run())
    }

    async fn list_messages(&self, thread: &ThreadHandle) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![
                ("order", "asc".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let page: WireMessageList = self
                .send(
                    self.client
                        .get(self.url(&format!("/threads/{thread}/messages")))
                        .query(&query),
                )
                .await?;

            let next = page
                .last_id
                .clone()
                .or_else(|| page.data.last().map(|m| m.id.clone()));
            messages.extend(page.data.into_iter().map(WireMessage::into_message));

            match (page.has_more, next) {
                (true, Some(cursor)) if after.as_deref() != Some(cursor.as_str()) => {
                    debug!("fetching next message page after {cursor}");
                    after = Some(cursor);
                }
                _ => break,
            }
        }

        Ok(messages)
    }
}

/// Pull the human-readable message out of an error body when there is one.
fn provider_detail(body: &str) -> String {
    serde_json::from_str::<WireErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

// Request Types
#[derive(Serialize)]
struct CreateMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
}

#[derive(Serialize)]
struct SubmitToolOutputsRequest<'a> {
    tool_outputs: Vec<WireToolOutput<'a>>,
}

#[derive(Serialize)]
struct WireToolOutput<'a> {
    tool_call_id: &'a str,
    output: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [WireChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct WireChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

// Response Types
#[derive(Deserialize)]
struct WireChatCompletion {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireThread {
    id: String,
}

#[derive(Deserialize)]
struct WireMessageList {
    data: Vec<WireMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    id: String,
    #[serde(default)]
    created_at: i64,
    role: String,
    content: WireContent,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
}

impl WireMessage {
    fn into_message(self) -> Message {
        let metadata = self.metadata.unwrap_or_default();
        let role = match (self.role.as_str(), metadata.get(ORIGIN_ROLE_KEY)) {
            (_, Some(origin)) if origin == "system" => Role::System,
            ("assistant", _) => Role::Assistant,
            ("system", _) => Role::System,
            _ => Role::User,
        };
        Message {
            id: self.id,
            role,
            content: self.content.into_text(),
            created_at: DateTime::<Utc>::from_timestamp(self.created_at, 0).unwrap_or_default(),
            hidden: metadata.get(HIDDEN_KEY).is_some_and(|v| v == "true"),
            run_id: self.run_id,
        }
    }
}

/// Message content arrives either as a bare string or as typed parts.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WireContentPart>),
}

impl WireContent {
    fn into_text(self) -> String {
        match self {
            WireContent::Text(text) => text,
            WireContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|p| match p {
                    WireContentPart::Text { text } => Some(text.into_value()),
                    WireContentPart::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentPart {
    Text {
        text: WireText,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireText {
    Plain(String),
    Annotated { value: String },
}

impl WireText {
    fn into_value(self) -> String {
        match self {
            WireText::Plain(s) | WireText::Annotated { value: s } => s,
        }
    }
}

#[derive(Deserialize)]
struct WireRun {
    id: String,
    thread_id: String,
    status: RunStatus,
    #[serde(default)]
    required_action: Option<WireRequiredAction>,
    #[serde(default)]
    last_error: Option<WireRunError>,
}

impl WireRun {
    fn into_run(self) -> Run {
        Run {
            id: self.id,
            thread_id: self.thread_id,
            status: self.status,
            required_action: self.required_action.map(|a| RequiredAction {
                tool_calls: a
                    .submit_tool_outputs
                    .tool_calls
                    .into_iter()
                    .map(WireToolCall::into_tool_call)
                    .collect(),
            }),
            last_error: self.last_error.map(|e| RunError {
                code: e.code,
                message: e.message,
            }),
        }
    }
}

#[derive(Deserialize)]
struct WireRequiredAction {
    submit_tool_outputs: WireSubmitToolOutputs,
}

#[derive(Deserialize)]
struct WireSubmitToolOutputs {
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunctionCall,
}

impl WireToolCall {
    fn into_tool_call(self) -> ToolCall {
        let arguments = serde_json::from_str(&self.function.arguments)
            .unwrap_or(serde_json::Value::String(self.function.arguments));
        ToolCall {
            call_id: self.id,
            function_name: self.function.name,
            arguments,
        }
    }
}

#[derive(Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireRunError {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct WireErrorBody {
    error: WireErrorDetail,
}

#[derive(Deserialize)]
struct WireErrorDetail {
    message: String,
}
