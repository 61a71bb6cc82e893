//! Scripted in-process gateway for exercising the core without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use threadrun_common::{Error, Message, Result, Role, ThreadHandle};

use crate::gateway::{AssistantGateway, HIDDEN_KEY, Metadata, Run, RunStatus, ToolOutput};

/// Plays back a script of run states.
///
/// `create_run` always answers `queued` with a fresh id; every
/// `retrieve_run` and `submit_tool_outputs` pops the next scripted state
/// (ids rewritten to the requested run). Once the script is drained the last
/// state repeats, or `completed` if nothing was scripted. When a run is
/// reported `completed` and a reply is configured, an assistant message for
/// that run is appended to the thread first.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Run>>,
    last: Mutex<Option<Run>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    replied: Mutex<Vec<String>>,
    reply: Mutex<Option<String>>,
    submissions: Mutex<Vec<(String, Vec<ToolOutput>)>>,
    created_runs: Mutex<Vec<(String, String)>>,
    events: Mutex<Vec<String>>,
    reject_submit: Mutex<bool>,
    create_delay: Duration,
    threads_created: AtomicUsize,
    retrieves: AtomicUsize,
    next_id: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn with_reply(self, reply: &str) -> Self {
        *self.reply.lock().unwrap() = Some(reply.to_string());
        self
    }

    pub fn with_script(self, runs: Vec<Run>) -> Self {
        self.script.lock().unwrap().extend(runs);
        self
    }

    pub fn rejecting_submissions(self) -> Self {
        *self.reject_submit.lock().unwrap() = true;
        self
    }

    pub fn threads_created(&self) -> usize {
        self.threads_created.load(Ordering::SeqCst)
    }

    pub fn retrieves(&self) -> usize {
        self.retrieves.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<(String, Vec<ToolOutput>)> {
        self.submissions.lock().unwrap().clone()
    }

    /// `(thread_id, assistant_id)` for every run created, in order.
    pub fn created_runs(&self) -> Vec<(String, String)> {
        self.created_runs.lock().unwrap().clone()
    }

    /// Calls as they reached the gateway: `append <text>`, `create <run>`,
    /// `<status> <run>`.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn thread_messages(&self, thread: &ThreadHandle) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap()
            .get(thread.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a message directly, bypassing `append_message`.
    pub fn push_message(&self, thread: &ThreadHandle, message: Message) {
        self.messages
            .lock()
            .unwrap()
            .entry(thread.as_str().to_string())
            .or_default()
            .push(message);
    }

    fn id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn next_state(&self, thread: &ThreadHandle, run_id: &str) -> Run {
        let scripted = self.script.lock().unwrap().pop_front();
        let mut run = match scripted {
            Some(run) => run,
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Run::new(run_id, thread.as_str(), RunStatus::Completed)),
        };
        run.id = run_id.to_string();
        run.thread_id = thread.as_str().to_string();
        *self.last.lock().unwrap() = Some(run.clone());
        self.record(format!("{} {run_id}", run.status));

        if run.status == RunStatus::Completed {
            self.reply_once(thread, run_id);
        }
        run
    }

    fn reply_once(&self, thread: &ThreadHandle, run_id: &str) {
        let Some(reply) = self.reply.lock().unwrap().clone() else {
            return;
        };
        let mut replied = self.replied.lock().unwrap();
        if replied.iter().any(|r| r == run_id) {
            return;
        }
        replied.push(run_id.to_string());
        let message = Message::text(self.id("msg"), Role::Assistant, reply).with_run(run_id);
        self.push_message(thread, message);
    }
}

#[async_trait]
impl AssistantGateway for ScriptedGateway {
    async fn create_thread(&self) -> Result<ThreadHandle> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.threads_created.fetch_add(1, Ordering::SeqCst);
        Ok(ThreadHandle::new(self.id("thread")))
    }

    async fn append_message(
        &self,
        thread: &ThreadHandle,
        role: Role,
        content: &str,
        metadata: Metadata,
    ) -> Result<Message> {
        self.record(format!("append {content}"));
        let mut message = Message::text(self.id("msg"), role, content);
        message.hidden = metadata.get(HIDDEN_KEY).is_some_and(|v| v == "true");
        self.push_message(thread, message.clone());
        Ok(message)
    }

    async fn create_run(&self, thread: &ThreadHandle, assistant_id: &str) -> Result<Run> {
        self.created_runs
            .lock()
            .unwrap()
            .push((thread.as_str().to_string(), assistant_id.to_string()));
        let run = Run::new(self.id("run"), thread.as_str(), RunStatus::Queued);
        self.record(format!("create {}", run.id));
        Ok(run)
    }

    async fn retrieve_run(&self, thread: &ThreadHandle, run_id: &str) -> Result<Run> {
        self.retrieves.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_state(thread, run_id))
    }

    async fn submit_tool_outputs(
        &self,
        thread: &ThreadHandle,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        if *self.reject_submit.lock().unwrap() {
            return Err(Error::Provider {
                status: 400,
                detail: format!("no pending tool call matches run {run_id}"),
            });
        }
        self.submissions
            .lock()
            .unwrap()
            .push((run_id.to_string(), outputs.to_vec()));
        Ok(self.next_state(thread, run_id))
    }

    async fn list_messages(&self, thread: &ThreadHandle) -> Result<Vec<Message>> {
        Ok(self.thread_messages(thread))
    }
}
