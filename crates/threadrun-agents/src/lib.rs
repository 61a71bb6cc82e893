pub mod dispatcher;
pub mod gateway;
pub mod openai;
pub mod orchestrator;
pub mod poller;
pub mod registry;
pub mod tools;

#[cfg(test)]
mod testing;

pub use dispatcher::ToolDispatcher;
pub use gateway::{
    AssistantGateway, Metadata, RequiredAction, Run, RunError, RunStatus, ToolCall, ToolOutput,
};
pub use openai::OpenAiAssistantGateway;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use poller::{PollPolicy, RunPoller};
pub use registry::ThreadRegistry;
pub use tools::{FnTool, Tool, ToolContext, ToolDefinition, ToolRegistry};
