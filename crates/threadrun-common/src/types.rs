use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque thread identifier issued by the assistant service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadHandle(String);

impl ThreadHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a logical conversation.
///
/// A deployment picks how many dimensions of isolation it needs: one thread
/// per user, per user and assistant, or per explicit conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ConversationKey {
    User {
        user: String,
    },
    UserAssistant {
        user: String,
        assistant: String,
    },
    Conversation {
        user: String,
        assistant: String,
        conversation: String,
    },
}

impl ConversationKey {
    pub fn user(user: impl Into<String>) -> Self {
        Self::User { user: user.into() }
    }

    pub fn user_assistant(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self::UserAssistant {
            user: user.into(),
            assistant: assistant.into(),
        }
    }

    pub fn conversation(
        user: impl Into<String>,
        assistant: impl Into<String>,
        conversation: impl Into<String>,
    ) -> Self {
        Self::Conversation {
            user: user.into(),
            assistant: assistant.into(),
            conversation: conversation.into(),
        }
    }

    /// Build a key from the optional fields of an inbound request.
    ///
    /// Blank parts count as absent. A conversation id without an assistant
    /// is rejected because it would silently collapse onto the user scope.
    pub fn from_parts(
        user: &str,
        assistant: Option<&str>,
        conversation: Option<&str>,
    ) -> Result<Self> {
        let user = user.trim();
        if user.is_empty() {
            return Err(Error::InvalidRequest("user id must not be empty".into()));
        }
        let assistant = assistant.map(str::trim).filter(|s| !s.is_empty());
        let conversation = conversation.map(str::trim).filter(|s| !s.is_empty());

        match (assistant, conversation) {
            (None, None) => Ok(Self::user(user)),
            (Some(a), None) => Ok(Self::user_assistant(user, a)),
            (Some(a), Some(c)) => Ok(Self::conversation(user, a, c)),
            (None, Some(_)) => Err(Error::InvalidRequest(
                "conversation id requires an assistant id".into(),
            )),
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::User { user }
            | Self::UserAssistant { user, .. }
            | Self::Conversation { user, .. } => user,
        }
    }

    /// The assistant pinned by this key, if any.
    pub fn assistant(&self) -> Option<&str> {
        match self {
            Self::User { .. } => None,
            Self::UserAssistant { assistant, .. } | Self::Conversation { assistant, .. } => {
                Some(assistant)
            }
        }
    }

    /// Stable string form used as the primary key in durable storage.
    pub fn storage_key(&self) -> String {
        match self {
            Self::User { user } => format!("u:{}", escape(user)),
            Self::UserAssistant { user, assistant } => {
                format!("ua:{}/{}", escape(user), escape(assistant))
            }
            Self::Conversation {
                user,
                assistant,
                conversation,
            } => format!(
                "uac:{}/{}/{}",
                escape(user),
                escape(assistant),
                escape(conversation)
            ),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

// Keeps the separator unambiguous when parts contain '/'.
fn escape(part: &str) -> String {
    part.replace('%', "%25").replace('/', "%2F")
}
