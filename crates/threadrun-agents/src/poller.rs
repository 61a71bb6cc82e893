use std::sync::Arc;
use std::time::Duration;

use threadrun_common::{Error, Result, RunFailureCause, ThreadHandle};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, warn};

use crate::dispatcher::ToolDispatcher;
use crate::gateway::{AssistantGateway, Run, RunStatus};

/// How often and for how long a run is observed.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    /// 1.0 keeps the interval constant; above that it grows per poll.
    pub backoff_factor: f64,
    pub max_interval: Duration,
    /// Wall-clock budget for the whole run.
    pub timeout: Duration,
    /// Optional cap on `retrieve_run` calls in addition to the timeout.
    pub max_polls: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            backoff_factor: 1.0,
            max_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
            max_polls: None,
        }
    }
}

impl PollPolicy {
    pub fn constant(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            timeout,
            ..Self::default()
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff_factor <= 1.0 {
            return current;
        }
        let cap = self.max_interval.max(self.interval);
        // NaN or overflowing factors saturate at the cap
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
            .map_or(cap, |next| next.min(cap))
    }
}

/// Drives a run from creation to a terminal status.
pub struct RunPoller {
    gateway: Arc<dyn AssistantGateway>,
    dispatcher: ToolDispatcher,
    policy: PollPolicy,
}

impl RunPoller {
    pub fn new(
        gateway: Arc<dyn AssistantGateway>,
        dispatcher: ToolDispatcher,
        policy: PollPolicy,
    ) -> Self {
        Self {
            gateway,
            dispatcher,
            policy,
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Observe `run` until it reaches a terminal status.
    ///
    /// The budget covers polling and tool dispatch alike: a call still
    /// pending at the deadline is abandoned and the drive fails with a
    /// timeout. The remote run is left alone.
    #[instrument(skip(self, run), fields(thread = %thread, run_id = %run.id))]
    pub async fn drive(&self, thread: &ThreadHandle, mut run: Run) -> Result<Run> {
        let started = Instant::now();
        let deadline = started + self.policy.timeout;
        let mut delay = self.policy.interval;
        let mut polls: u32 = 0;
        let mut submitted: Option<Vec<String>> = None;

        loop {
            if run.status.is_terminal() {
                debug!(status = %run.status, polls, "run reached terminal status");
                return Ok(run);
            }

            let out_of_polls = self.policy.max_polls.is_some_and(|max| polls >= max);
            if Instant::now() >= deadline || out_of_polls {
                return Err(self.give_up(&run, started, polls));
            }

            // A run still listing the batch we just answered has not caught
            // up yet; keep polling instead of answering twice.
            if run.status == RunStatus::RequiresAction {
                let pending = run.pending_call_ids();
                if submitted.as_ref() != Some(&pending) {
                    let handled = timeout_at(deadline, self.dispatcher.handle(thread, &run)).await;
                    run = match handled {
                        Ok(resumed) => resumed?,
                        Err(_) => return Err(self.give_up(&run, started, polls)),
                    };
                    submitted = Some(pending);
                    continue;
                }
            }

            tokio::time::sleep_until((Instant::now() + delay).min(deadline)).await;
            let retrieved = timeout_at(deadline, self.gateway.retrieve_run(thread, &run.id)).await;
            run = match retrieved {
                Ok(observed) => observed?,
                Err(_) => return Err(self.give_up(&run, started, polls)),
            };
            polls += 1;
            debug!(status = %run.status, polls, "polled run");
            delay = self.policy.next_interval(delay);
        }
    }

    fn give_up(&self, run: &Run, started: Instant, polls: u32) -> Error {
        let elapsed = started.elapsed();
        warn!(status = %run.status, polls, ?elapsed, "giving up on run");
        Error::RunFailure {
            run_id: run.id.clone(),
            cause: RunFailureCause::Timeout { elapsed },
        }
    }
}
