use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A message stored on a thread, in the one canonical shape the core reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Injected by the orchestrator; never rendered in a client transcript.
    #[serde(default)]
    pub hidden: bool,
    /// The run that produced this message, when the service reports one.
    #[serde(default)]
    pub run_id: Option<String>,
}

impl Message {
    pub fn text(id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: text.into(),
            created_at: Utc::now(),
            hidden: false,
            run_id: None,
        }
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// True when this is an assistant reply produced by `run_id`.
    pub fn is_reply_to(&self, run_id: &str) -> bool {
        self.role == Role::Assistant && self.run_id.as_deref() == Some(run_id)
    }
}
