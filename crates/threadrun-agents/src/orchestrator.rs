use std::sync::Arc;

use dashmap::DashMap;
use threadrun_common::{
    ConversationKey, Error, Message, Result, Role, RunFailureCause, ThreadHandle,
};
use threadrun_db::ThreadStore;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::dispatcher::ToolDispatcher;
use crate::gateway::{AssistantGateway, Metadata, RunStatus};
use crate::poller::{PollPolicy, RunPoller};
use crate::registry::ThreadRegistry;
use crate::tools::ToolRegistry;

/// Turns one user message into one assistant reply.
///
/// Turns for the same conversation run strictly one after another in arrival
/// order (tokio's mutex is FIFO); different conversations proceed
/// concurrently.
pub struct Orchestrator {
    gateway: Arc<dyn AssistantGateway>,
    registry: ThreadRegistry,
    poller: RunPoller,
    default_assistant: String,
    turn_locks: DashMap<ConversationKey, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn builder(
        gateway: Arc<dyn AssistantGateway>,
        default_assistant: impl Into<String>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            gateway,
            default_assistant: default_assistant.into(),
            tools: ToolRegistry::new(),
            policy: PollPolicy::default(),
            greeting: None,
            store: None,
        }
    }

    #[instrument(skip(self, text), fields(key = %key))]
    pub async fn converse(&self, key: &ConversationKey, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::InvalidRequest("message must not be empty".into()));
        }

        let lock = self.turn_locks.entry(key.clone()).or_default().clone();
        let _turn = lock.lock().await;

        let thread = self.registry.resolve_or_create(key).await?;
        self.gateway
            .append_message(&thread, Role::User, text, Metadata::new())
            .await?;

        let assistant = key.assistant().unwrap_or(&self.default_assistant);
        let run = self.gateway.create_run(&thread, assistant).await?;
        info!(thread = %thread, run_id = %run.id, assistant, "started run");

        let run = self.poller.drive(&thread, run).await?;
        if run.status != RunStatus::Completed {
            warn!(run_id = %run.id, status = %run.status, "run did not complete");
            return Err(Error::RunFailure {
                cause: RunFailureCause::Status {
                    status: run.status.as_str().to_string(),
                    last_error: run.last_error.as_ref().map(ToString::to_string),
                },
                run_id: run.id,
            });
        }

        let messages = self.gateway.list_messages(&thread).await?;
        let reply = messages
            .into_iter()
            .rev()
            .find(|m| m.is_reply_to(&run.id))
            .ok_or_else(|| {
                Error::DataConsistency(format!(
                    "run {} completed on thread {} without an assistant message",
                    run.id, thread
                ))
            })?;

        info!(run_id = %run.id, chars = reply.content.len(), "assistant replied");
        Ok(reply.content)
    }

    /// The client-visible transcript for `key`; hidden messages are dropped.
    pub async fn history(&self, key: &ConversationKey) -> Result<Vec<Message>> {
        let Some(thread) = self.registry.lookup(key)? else {
            return Ok(Vec::new());
        };
        let messages = self.gateway.list_messages(&thread).await?;
        Ok(messages.into_iter().filter(|m| !m.hidden).collect())
    }

    pub fn thread_for(&self, key: &ConversationKey) -> Result<Option<ThreadHandle>> {
        self.registry.lookup(key)
    }

    pub fn thread_count(&self) -> usize {
        self.registry.len()
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.poller.dispatcher().tools()
    }

    pub fn default_assistant(&self) -> &str {
        &self.default_assistant
    }
}

pub struct OrchestratorBuilder {
    gateway: Arc<dyn AssistantGateway>,
    default_assistant: String,
    tools: ToolRegistry,
    policy: PollPolicy,
    greeting: Option<String>,
    store: Option<Arc<dyn ThreadStore>>,
}

impl OrchestratorBuilder {
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn greeting(mut self, greeting: Option<String>) -> Self {
        self.greeting = greeting;
        self
    }

    pub fn thread_store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Orchestrator {
        let mut registry = ThreadRegistry::new(self.gateway.clone()).with_greeting(self.greeting);
        if let Some(store) = self.store {
            registry = registry.with_store(store);
        }
        let dispatcher = ToolDispatcher::new(self.gateway.clone(), self.tools);
        let poller = RunPoller::new(self.gateway.clone(), dispatcher, self.policy);

        Orchestrator {
            gateway: self.gateway,
            registry,
            poller,
            default_assistant: self.default_assistant,
            turn_locks: DashMap::new(),
        }
    }
}
