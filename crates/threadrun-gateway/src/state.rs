use std::sync::Arc;

use threadrun_agents::{OpenAiAssistantGateway, Orchestrator, PollPolicy, ToolRegistry};
use threadrun_common::{Error, Result};
use threadrun_config::{AppConfig, PollingConfig};
use threadrun_db::SqliteThreadStore;
use tracing::info;

/// Shared state handed to every request handler.
pub struct AppState {
    pub config: AppConfig,
    /// Direct provider access for the credential check route.
    pub openai: Arc<OpenAiAssistantGateway>,
    pub orchestrator: Orchestrator,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: AppConfig,
        openai: Arc<OpenAiAssistantGateway>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            config,
            openai,
            orchestrator,
        }
    }

    /// Wire the OpenAI-backed orchestrator described by `config`.
    ///
    /// Fails when credentials are missing so the process never starts
    /// half-configured.
    pub fn from_config(config: AppConfig, tools: ToolRegistry) -> Result<Self> {
        config.validate()?;

        let assistant = &config.assistant;
        let api_key = assistant
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".into()))?;
        let assistant_id = assistant
            .assistant_id
            .clone()
            .ok_or_else(|| Error::Config("ASSISTANT_ID is not set".into()))?;

        let openai = Arc::new(
            OpenAiAssistantGateway::new(api_key, assistant.base_url.clone())
                .with_request_timeout(assistant.request_timeout())?,
        );

        let mut builder = Orchestrator::builder(openai.clone(), assistant_id)
            .tools(tools)
            .poll_policy(poll_policy(&config.polling))
            .greeting(assistant.greeting.clone());

        if let Some(path) = &config.storage.sqlite_path {
            builder = builder.thread_store(Arc::new(SqliteThreadStore::open(path)?));
        } else {
            info!("no sqlite_path configured, thread mappings live in memory only");
        }

        Ok(Self::new(config, openai, builder.build()))
    }
}

pub fn poll_policy(polling: &PollingConfig) -> PollPolicy {
    PollPolicy {
        interval: polling.interval(),
        backoff_factor: polling.backoff_factor,
        max_interval: polling.max_interval(),
        timeout: polling.timeout(),
        max_polls: polling.max_polls,
    }
}
