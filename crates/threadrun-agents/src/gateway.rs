use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use threadrun_common::{Message, Result, Role, ThreadHandle};

/// Free-form string metadata attached to messages.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key marking a message as injected by the orchestrator.
pub const HIDDEN_KEY: &str = "hidden";

pub fn hidden_metadata() -> Metadata {
    Metadata::from([(HIDDEN_KEY.to_string(), "true".to_string())])
}

/// The remote assistant service, seen as thread/message/run primitives.
///
/// Implementations surface every failure as `Error::Transport` or
/// `Error::Provider` and never retry on their own.
#[async_trait]
pub trait AssistantGateway: Send + Sync {
    async fn create_thread(&self) -> Result<ThreadHandle>;

    async fn append_message(
        &self,
        thread: &ThreadHandle,
        role: Role,
        content: &str,
        metadata: Metadata,
    ) -> Result<Message>;

    async fn create_run(&self, thread: &ThreadHandle, assistant_id: &str) -> Result<Run>;

    async fn retrieve_run(&self, thread: &ThreadHandle, run_id: &str) -> Result<Run>;

    async fn submit_tool_outputs(
        &self,
        thread: &ThreadHandle,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run>;

    /// All messages on the thread, oldest first.
    async fn list_messages(&self, thread: &ThreadHandle) -> Result<Vec<Message>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Cancelled
                | RunStatus::Expired
                | RunStatus::Incomplete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One asynchronous processing cycle over a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    /// Present only while `status == RequiresAction`.
    pub required_action: Option<RequiredAction>,
    pub last_error: Option<RunError>,
}

impl Run {
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            status,
            required_action: None,
            last_error: None,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.required_action = Some(RequiredAction { tool_calls });
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.last_error = Some(RunError {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        self.required_action
            .as_ref()
            .map(|a| a.tool_calls.as_slice())
            .unwrap_or_default()
    }

    pub fn pending_call_ids(&self) -> Vec<String> {
        self.pending_tool_calls()
            .iter()
            .map(|c| c.call_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredAction {
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub function_name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        call_id: impl Into<String>,
        function_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            function_name: function_name.into(),
            arguments,
        }
    }
}

/// The result of one tool call, submitted back to the paused run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: String,
    pub output: String,
}

impl ToolOutput {
    pub fn new(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    /// An output carrying an error payload the assistant can read.
    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        let payload = serde_json::json!({ "error": message.into() });
        Self::new(call_id, payload.to_string())
    }

    pub fn is_error(&self) -> bool {
        serde_json::from_str::<serde_json::Value>(&self.output)
            .map(|v| v.get("error").is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Expired.is_terminal());
        assert!(RunStatus::Incomplete.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::InProgress.is_terminal());
        assert!(!RunStatus::RequiresAction.is_terminal());
        assert!(!RunStatus::Cancelling.is_terminal());
    }

    #[test]
    fn status_wire_names() {
        let status: RunStatus = serde_json::from_str("\"requires_action\"").unwrap();
        assert_eq!(status, RunStatus::RequiresAction);
        assert_eq!(RunStatus::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn error_output_is_marked() {
        let output = ToolOutput::error("call_1", "unknown tool: nope");
        assert!(output.is_error());
        assert!(output.output.contains("unknown tool: nope"));
        assert!(!ToolOutput::new("call_2", "42").is_error());
    }

    #[test]
    fn pending_calls_empty_without_action() {
        let run = Run::new("run_1", "thread_1", RunStatus::InProgress);
        assert!(run.pending_tool_calls().is_empty());
    }
}
