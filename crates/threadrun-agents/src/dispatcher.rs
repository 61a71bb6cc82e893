use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use threadrun_common::{Error, Result, RunFailureCause, ThreadHandle};
use tracing::{info, instrument, warn};

use crate::gateway::{AssistantGateway, Run, ToolCall, ToolOutput};
use crate::tools::{ToolContext, ToolRegistry};

/// Answers a run paused in `requires_action`.
pub struct ToolDispatcher {
    gateway: Arc<dyn AssistantGateway>,
    tools: ToolRegistry,
}

impl ToolDispatcher {
    pub fn new(gateway: Arc<dyn AssistantGateway>, tools: ToolRegistry) -> Self {
        Self { gateway, tools }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Execute every pending tool call and submit the outputs as one batch.
    ///
    /// Individual tool failures become error-bearing outputs; only a missing
    /// batch or a failed submission fails the run.
    #[instrument(skip(self, run), fields(thread = %thread, run_id = %run.id))]
    pub async fn handle(&self, thread: &ThreadHandle, run: &Run) -> Result<Run> {
        let calls = run.pending_tool_calls();
        if calls.is_empty() {
            return Err(Error::RunFailure {
                run_id: run.id.clone(),
                cause: RunFailureCause::Dispatch(
                    "run requires action but listed no tool calls".into(),
                ),
            });
        }

        let outputs = join_all(calls.iter().map(|call| self.execute(thread, run, call))).await;
        let failed = outputs.iter().filter(|o| o.is_error()).count();
        info!(calls = outputs.len(), failed, "submitting tool outputs");

        self.gateway
            .submit_tool_outputs(thread, &run.id, &outputs)
            .await
            .map_err(|e| {
                warn!("tool output submission failed: {e}");
                Error::RunFailure {
                    run_id: run.id.clone(),
                    cause: RunFailureCause::Dispatch(e.to_string()),
                }
            })
    }

    async fn execute(&self, thread: &ThreadHandle, run: &Run, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.tools.get(&call.function_name) else {
            warn!(call_id = %call.call_id, "unknown tool: {}", call.function_name);
            return ToolOutput::error(
                &call.call_id,
                format!("unknown tool: {}", call.function_name),
            );
        };

        let context = ToolContext {
            thread: thread.clone(),
            run_id: run.id.clone(),
            call_id: call.call_id.clone(),
        };
        let outcome = AssertUnwindSafe(tool.execute(&context, call.arguments.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => ToolOutput::new(&call.call_id, output),
            Ok(Err(e)) => {
                warn!(call_id = %call.call_id, tool = %call.function_name, "tool failed: {e}");
                ToolOutput::error(&call.call_id, e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(call_id = %call.call_id, tool = %call.function_name, "tool panicked: {reason}");
                ToolOutput::error(&call.call_id, format!("tool panicked: {reason}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
