//! Test doubles for the coordinator's collaborators
//!
//! [`ScriptedExecutor`] resolves submissions after scripted delays with
//! scripted failures and records every call. [`ManualTrigger`] ticks only
//! when its [`ManualTriggerHandle`] fires. Both sleep on the tokio clock, so
//! tests can drive them with `tokio::time::pause` and `advance`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::batch::{
    Submission, SubmissionError, SubmissionExecutor, SubmissionId, SubmissionOutcome,
};
use crate::trigger::TriggerSource;

#[derive(Debug, Default)]
struct Script {
    default_delay: Duration,
    stagger: Option<Duration>,
    delays: HashMap<SubmissionId, Duration>,
    failures: HashMap<SubmissionId, SubmissionError>,
    hanging: HashSet<SubmissionId>,
    calls: Vec<SubmissionId>,
    completed: Vec<SubmissionId>,
}

/// Executor whose behavior is scripted per submission
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<Script>>,
}

impl ScriptedExecutor {
    /// Executor that succeeds immediately for every submission
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to submissions without their own delay
    pub fn with_default_delay(self, delay: Duration) -> Self {
        self.lock().default_delay = delay;
        self
    }

    /// The n-th call (zero based) sleeps `n * step` before resolving
    pub fn with_staggered_delays(self, step: Duration) -> Self {
        self.lock().stagger = Some(step);
        self
    }

    pub fn with_delay(self, id: SubmissionId, delay: Duration) -> Self {
        self.lock().delays.insert(id, delay);
        self
    }

    pub fn with_failure(self, id: SubmissionId, cause: SubmissionError) -> Self {
        self.lock().failures.insert(id, cause);
        self
    }

    /// The submission never resolves
    pub fn with_hang(self, id: SubmissionId) -> Self {
        self.lock().hanging.insert(id);
        self
    }

    /// Ids passed to `execute`, in call order
    pub fn calls(&self) -> Vec<SubmissionId> {
        self.lock().calls.clone()
    }

    /// Ids whose execution ran to completion, in completion order
    pub fn completed(&self) -> Vec<SubmissionId> {
        self.lock().completed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SubmissionExecutor for ScriptedExecutor {
    async fn execute(&self, submission: Submission) -> SubmissionOutcome {
        let id = submission.id();
        let (delay, hang) = {
            let mut script = self.lock();
            let nth = script.calls.len() as u32;
            script.calls.push(id);

            let delay = match (script.delays.get(&id), script.stagger) {
                (Some(delay), _) => *delay,
                (None, Some(step)) => step * nth,
                (None, None) => script.default_delay,
            };
            (delay, script.hanging.contains(&id))
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.lock();
        script.completed.push(id);
        match script.failures.get(&id) {
            Some(cause) => SubmissionOutcome::failure(id, cause.clone()),
            None => SubmissionOutcome::success(id),
        }
    }
}

/// Trigger that ticks only when fired through its handle
#[derive(Debug)]
pub struct ManualTrigger {
    ticks: mpsc::UnboundedReceiver<()>,
}

/// Fires ticks into a [`ManualTrigger`]
#[derive(Debug, Clone)]
pub struct ManualTriggerHandle {
    ticks: mpsc::UnboundedSender<()>,
}

/// Create a manual trigger and the handle that fires it
pub fn manual_trigger() -> (ManualTrigger, ManualTriggerHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ManualTrigger { ticks: rx }, ManualTriggerHandle { ticks: tx })
}

impl ManualTriggerHandle {
    /// Fire one tick. Returns `false` once the trigger is dropped.
    pub fn fire(&self) -> bool {
        self.ticks.send(()).is_ok()
    }
}

#[async_trait]
impl TriggerSource for ManualTrigger {
    async fn tick(&mut self) {
        if self.ticks.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    /// Ticks fired while stopped are discarded
    fn reset(&mut self) {
        while self.ticks.try_recv().is_ok() {}
    }
}
