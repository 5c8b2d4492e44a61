//! Batch coordinator
//!
//! [`BatchCoordinator`] owns the queue and the in-flight batch. All of its
//! state changes happen inside one event loop that selects over three
//! sources: commands from [`CoordinatorHandle`]s, the [`ResultRelay`] of the
//! running batch, and the trigger source while it is started. Because only
//! that loop touches [`CoordinatorState`], no locking is needed.
//!
//! Lifecycle of a batch:
//!
//! 1. `enqueue` or a trigger tick calls [`BatchCoordinator::attempt_start`].
//! 2. If idle with a non-empty queue, the queue is snapshotted and fanned
//!    out, one task per submission.
//! 3. Outcomes arrive through the relay in completion order
//!    ([`BatchCoordinator::on_result_received`]).
//! 4. The terminal marker closes out the batch
//!    ([`BatchCoordinator::on_batch_finished`]).
//!
//! [`BatchCoordinator::cancel`] may interrupt this at any point.

pub mod config;
pub mod events;
pub mod state;

pub use config::*;
pub use events::*;
pub use state::*;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::batch::{
    relay, spawn_fan_out, FanOutHandle, RelayEvent, ResultRelay, Submission, SubmissionExecutor,
    SubmissionOutcome,
};
use crate::metrics;
use crate::trigger::{IntervalTrigger, TriggerSource};
use crate::{QueueError, Result};

/// Request sent from a handle into the event loop
#[derive(Debug)]
enum Command {
    StartTrigger,
    Enqueue(Submission),
    AttemptStart,
    Cancel,
    State(oneshot::Sender<CoordinatorState>),
    Shutdown,
}

/// What woke the event loop
enum Step {
    Command(Option<Command>),
    Relay(Option<RelayEvent>),
    Tick,
}

/// State machine driving queued submissions through batches
pub struct BatchCoordinator {
    config: CoordinatorConfig,
    state: CoordinatorState,
    executor: Arc<dyn SubmissionExecutor>,
    trigger: Box<dyn TriggerSource>,
    trigger_running: bool,
    relay: Option<ResultRelay>,
    fan_out: Option<FanOutHandle>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("trigger_running", &self.trigger_running)
            .field("executor", &"SubmissionExecutor")
            .finish()
    }
}

impl BatchCoordinator {
    /// Create an idle coordinator with an empty queue.
    ///
    /// Fails only if `config` does not validate.
    pub fn new<T>(
        config: CoordinatorConfig,
        executor: Arc<dyn SubmissionExecutor>,
        trigger: T,
    ) -> Result<Self>
    where
        T: TriggerSource + 'static,
    {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            config,
            state: CoordinatorState::default(),
            executor,
            trigger: Box::new(trigger),
            trigger_running: false,
            relay: None,
            fan_out: None,
            events,
        })
    }

    /// Create an idle coordinator whose trigger fires every
    /// `config.tick_interval`
    pub fn with_interval_trigger(
        config: CoordinatorConfig,
        executor: Arc<dyn SubmissionExecutor>,
    ) -> Result<Self> {
        let trigger = IntervalTrigger::from_config(&config)?;
        Self::new(config, executor, trigger)
    }

    /// Seed the queue, e.g. with submissions left over from an earlier run
    pub fn with_queue(mut self, queue: Vec<Submission>) -> Self {
        self.state.queue = queue;
        metrics::set_queue_depth(self.state.queue.len());
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn is_trigger_running(&self) -> bool {
        self.trigger_running
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Start polling the trigger source. No-op if already running.
    pub fn start_trigger(&mut self) {
        if self.trigger_running {
            return;
        }
        self.trigger.reset();
        self.trigger_running = true;
        debug!("Trigger started");
    }

    /// Stop polling the trigger source. A running batch is unaffected.
    pub fn stop_trigger(&mut self) {
        if self.trigger_running {
            self.trigger_running = false;
            debug!("Trigger stopped");
        }
    }

    /// Append `submission` to the live queue, then try to start a batch.
    ///
    /// While a batch is in flight the submission waits for a later batch.
    pub fn enqueue(&mut self, submission: Submission) {
        debug!(submission_id = %submission.id(), "Submission enqueued");
        self.state.queue.push(submission);
        metrics::set_queue_depth(self.state.queue.len());
        self.attempt_start();
    }

    /// Start a batch over the current queue if idle and the queue is not
    /// empty. Returns whether a batch was started.
    pub fn attempt_start(&mut self) -> bool {
        if self.state.in_flight.is_some() {
            debug!("Batch already in flight, attempt ignored");
            return false;
        }
        if self.state.queue.is_empty() {
            debug!("Queue empty, attempt ignored");
            return false;
        }

        let batch = InFlightBatch::new(self.state.queue.clone());
        let batch_id = batch.id;
        let total = batch.total();

        let (sender, receiver) = relay(total + 1);
        let handle = spawn_fan_out(
            batch_id,
            batch.snapshot.clone(),
            Arc::clone(&self.executor),
            self.config.submit_timeout,
            sender,
        );

        self.state.in_flight = Some(batch);
        self.relay = Some(receiver);
        self.fan_out = Some(handle);

        metrics::record_batch_started();
        info!(batch_id = %batch_id, total, "Batch started");
        self.emit(CoordinatorEvent::BatchStarted { batch_id, total });
        true
    }

    /// Record one outcome of the running batch and publish progress.
    ///
    /// Outcomes arriving while idle, for submissions outside the snapshot,
    /// or answering an already answered submission are dropped.
    pub fn on_result_received(&mut self, outcome: SubmissionOutcome) {
        let Some(batch) = self.state.in_flight.as_mut() else {
            warn!(submission_id = %outcome.id(), "Outcome received while idle, dropped");
            return;
        };

        let id = outcome.id();
        if !batch.contains(id) {
            warn!(
                batch_id = %batch.id,
                submission_id = %id,
                "Outcome for submission outside batch, dropped"
            );
            return;
        }
        if batch.has_result_for(id) {
            warn!(batch_id = %batch.id, submission_id = %id, "Duplicate outcome, dropped");
            return;
        }

        metrics::record_submission(outcome.status_label());
        match &outcome {
            SubmissionOutcome::Success { .. } => {
                debug!(batch_id = %batch.id, submission_id = %id, "Submission succeeded")
            }
            SubmissionOutcome::Failure { cause, .. } => {
                warn!(
                    batch_id = %batch.id,
                    submission_id = %id,
                    error = %cause,
                    "Submission failed"
                )
            }
        }

        batch.results.push(outcome.clone());
        let event = CoordinatorEvent::Progress {
            batch_id: batch.id,
            completed: batch.completed(),
            total: batch.total(),
            outcome,
        };
        self.emit(event);
    }

    /// Close out the running batch, apply the requeue policy and go idle
    pub fn on_batch_finished(&mut self) {
        let Some(batch) = self.state.in_flight.take() else {
            warn!("Batch finished while idle, ignored");
            return;
        };
        self.release_batch_resources();

        match self.config.requeue_policy {
            RequeuePolicy::ClearAll => self.state.queue.clear(),
            RequeuePolicy::RetainFailed => {
                // The snapshot is always a prefix of the live queue.
                let failed = batch.failed_ids();
                let split = batch.total().min(self.state.queue.len());
                let later = self.state.queue.split_off(split);
                self.state.queue.retain(|s| failed.contains(&s.id()));
                self.state.queue.extend(later);
            }
        }
        metrics::set_queue_depth(self.state.queue.len());

        let failed = batch.results.iter().filter(|r| !r.is_success()).count();
        metrics::record_batch_ended("finished", elapsed_secs(&batch));
        info!(
            batch_id = %batch.id,
            total = batch.total(),
            failed,
            requeued = self.state.queue.len(),
            "Batch finished"
        );

        self.emit(CoordinatorEvent::BatchFinished {
            batch_id: batch.id,
            outcomes: batch.results,
        });
    }

    /// Stop the trigger and abandon the running batch, if any.
    ///
    /// The queue is left untouched. Once this returns no outcome or
    /// terminal marker of the abandoned batch is observed.
    pub fn cancel(&mut self) {
        self.stop_trigger();

        let Some(batch) = self.state.in_flight.take() else {
            debug!("Cancel while idle");
            return;
        };
        self.release_batch_resources();

        metrics::record_batch_ended("cancelled", elapsed_secs(&batch));
        info!(
            batch_id = %batch.id,
            completed = batch.completed(),
            total = batch.total(),
            "Batch cancelled"
        );
        self.emit(CoordinatorEvent::BatchCancelled {
            batch_id: batch.id,
            completed: batch.completed(),
            total: batch.total(),
        });
    }

    /// Move the coordinator onto its own task.
    ///
    /// The loop runs until [`CoordinatorHandle::shutdown`] or until every
    /// handle is dropped; a batch still running at that point is cancelled.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle {
            commands: commands_tx,
            events: self.events.clone(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    #[instrument(skip_all)]
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            queued = self.state.queue.len(),
            "Coordinator started"
        );

        loop {
            let step = tokio::select! {
                biased;
                command = commands.recv() => Step::Command(command),
                event = next_relay_event(&mut self.relay) => Step::Relay(event),
                _ = self.trigger.tick(), if self.trigger_running => Step::Tick,
            };

            match step {
                Step::Command(None) | Step::Command(Some(Command::Shutdown)) => break,
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Relay(event) => self.handle_relay_event(event),
                Step::Tick => {
                    debug!("Trigger tick");
                    self.attempt_start();
                }
            }
        }

        self.cancel();
        info!("Coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartTrigger => self.start_trigger(),
            Command::Enqueue(submission) => self.enqueue(submission),
            Command::AttemptStart => {
                self.attempt_start();
            }
            Command::Cancel => self.cancel(),
            Command::State(reply) => {
                let _ = reply.send(self.state.clone());
            }
            Command::Shutdown => {}
        }
    }

    fn handle_relay_event(&mut self, event: Option<RelayEvent>) {
        match event {
            Some(RelayEvent::Received(outcome)) => self.on_result_received(outcome),
            Some(RelayEvent::Finished) => self.on_batch_finished(),
            None => {
                // Only reachable when a submission task died without an outcome.
                error!("Relay closed before the batch finished, abandoning batch");
                if let Some(batch) = self.state.in_flight.take() {
                    self.release_batch_resources();
                    metrics::record_batch_ended("abandoned", elapsed_secs(&batch));
                    self.emit(CoordinatorEvent::BatchCancelled {
                        batch_id: batch.id,
                        completed: batch.completed(),
                        total: batch.total(),
                    });
                } else {
                    self.relay = None;
                }
            }
        }
    }

    fn release_batch_resources(&mut self) {
        if let Some(fan_out) = self.fan_out.take() {
            fan_out.cancel();
        }
        if let Some(mut relay) = self.relay.take() {
            relay.close();
        }
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

async fn next_relay_event(relay: &mut Option<ResultRelay>) -> Option<RelayEvent> {
    match relay {
        Some(relay) => relay.recv().await,
        None => std::future::pending().await,
    }
}

fn elapsed_secs(batch: &InFlightBatch) -> f64 {
    (Utc::now() - batch.started_at)
        .to_std()
        .unwrap_or_default()
        .as_secs_f64()
}

/// Cloneable command surface of a spawned coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    /// Start the periodic trigger
    pub fn start(&self) -> Result<()> {
        self.send(Command::StartTrigger)
    }

    /// Append `submission` to the queue and try to start a batch
    pub fn enqueue(&self, submission: Submission) -> Result<()> {
        self.send(Command::Enqueue(submission))
    }

    /// Start a batch if idle and the queue is not empty
    pub fn attempt_start(&self) -> Result<()> {
        self.send(Command::AttemptStart)
    }

    /// Stop the trigger and abandon the running batch
    pub fn cancel(&self) -> Result<()> {
        self.send(Command::Cancel)
    }

    /// Snapshot of the coordinator state after every earlier command has
    /// been processed
    pub async fn state(&self) -> Result<CoordinatorState> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::State(tx))?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Receive progress and terminal events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Stop the event loop, cancelling any running batch
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| QueueError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{AcceptingExecutor, SubmissionError};
    use crate::testing::ScriptedExecutor;
    use crate::trigger::NeverTrigger;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn coordinator(executor: Arc<dyn SubmissionExecutor>) -> BatchCoordinator {
        BatchCoordinator::new(CoordinatorConfig::default(), executor, NeverTrigger).unwrap()
    }

    async fn pump(coordinator: &mut BatchCoordinator) -> Option<RelayEvent> {
        let event = next_relay_event(&mut coordinator.relay).await;
        coordinator.handle_relay_event(event.clone());
        event
    }

    #[tokio::test]
    async fn test_attempt_start_noop_when_queue_empty() {
        let mut coordinator = coordinator(Arc::new(AcceptingExecutor));
        assert!(!coordinator.attempt_start());
        assert_eq!(coordinator.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_second_attempt_while_submitting_is_noop() {
        let executor = ScriptedExecutor::new().with_default_delay(Duration::from_secs(10));
        let mut coordinator = coordinator(Arc::new(executor.clone()));

        coordinator.enqueue(Submission::new());
        let batch_id = coordinator.state().in_flight.as_ref().map(|b| b.id);

        assert!(!coordinator.attempt_start());
        assert_eq!(coordinator.state().in_flight.as_ref().map(|b| b.id), batch_id);
        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_single_submission_lifecycle() {
        let mut coordinator = coordinator(Arc::new(AcceptingExecutor));
        let mut events = coordinator.subscribe();
        let submission = Submission::new();

        coordinator.enqueue(submission.clone());
        assert_eq!(coordinator.phase(), Phase::Submitting);
        assert_eq!(
            coordinator.state().in_flight.as_ref().unwrap().snapshot,
            vec![submission.clone()]
        );

        let success = SubmissionOutcome::success(submission.id());
        assert_eq!(pump(&mut coordinator).await, Some(RelayEvent::Received(success.clone())));
        assert_eq!(pump(&mut coordinator).await, Some(RelayEvent::Finished));

        assert_eq!(coordinator.state(), &CoordinatorState::default());

        let batch_id = match events.recv().await.unwrap() {
            CoordinatorEvent::BatchStarted { batch_id, total } => {
                assert_eq!(total, 1);
                batch_id
            }
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(
            events.recv().await.unwrap(),
            CoordinatorEvent::Progress {
                batch_id,
                completed: 1,
                total: 1,
                outcome: success.clone(),
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CoordinatorEvent::BatchFinished {
                batch_id,
                outcomes: vec![success],
            }
        );
    }

    #[tokio::test]
    async fn test_enqueue_while_submitting_extends_queue_only() {
        let executor = ScriptedExecutor::new().with_default_delay(Duration::from_secs(10));
        let mut coordinator = coordinator(Arc::new(executor));
        let first = Submission::new();
        let second = Submission::new();

        coordinator.enqueue(first.clone());
        coordinator.enqueue(second.clone());

        let state = coordinator.state();
        assert_eq!(state.queue, vec![first.clone(), second]);
        assert_eq!(state.in_flight.as_ref().unwrap().snapshot, vec![first]);
        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_foreign_and_duplicate_outcomes_are_dropped() {
        let executor = ScriptedExecutor::new().with_default_delay(Duration::from_secs(10));
        let mut coordinator = coordinator(Arc::new(executor));
        let submission = Submission::new();
        coordinator.enqueue(submission.clone());

        coordinator.on_result_received(SubmissionOutcome::success(Submission::new().id()));
        coordinator.on_result_received(SubmissionOutcome::success(submission.id()));
        coordinator.on_result_received(SubmissionOutcome::success(submission.id()));

        assert_eq!(coordinator.state().in_flight.as_ref().unwrap().completed(), 1);
        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_outcome_while_idle_is_dropped() {
        let mut coordinator = coordinator(Arc::new(AcceptingExecutor));
        coordinator.on_result_received(SubmissionOutcome::success(Submission::new().id()));
        coordinator.on_batch_finished();
        assert_eq!(coordinator.state(), &CoordinatorState::default());
    }

    #[tokio::test]
    async fn test_cancel_keeps_queue_and_closes_relay() {
        let executor = ScriptedExecutor::new().with_default_delay(Duration::from_secs(10));
        let mut coordinator = coordinator(Arc::new(executor));
        let mut events = coordinator.subscribe();
        let submission = Submission::new();

        coordinator.start_trigger();
        coordinator.enqueue(submission.clone());
        coordinator.cancel();

        assert!(!coordinator.is_trigger_running());
        assert_eq!(coordinator.phase(), Phase::Idle);
        assert_eq!(coordinator.state().queue, vec![submission]);
        assert!(coordinator.relay.is_none());
        assert!(coordinator.fan_out.is_none());

        assert!(matches!(events.recv().await.unwrap(), CoordinatorEvent::BatchStarted { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            CoordinatorEvent::BatchCancelled { completed: 0, total: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_idle_only_stops_trigger() {
        let mut coordinator = coordinator(Arc::new(AcceptingExecutor));
        coordinator.start_trigger();
        coordinator.cancel();
        assert!(!coordinator.is_trigger_running());
        assert_eq!(coordinator.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_retain_failed_policy_keeps_failures_and_late_arrivals() {
        let ok = Submission::new();
        let bad = Submission::new();
        let late = Submission::new();
        let executor = ScriptedExecutor::new()
            .with_failure(bad.id(), SubmissionError::Rejected("invalid".into()));
        let config = CoordinatorConfig::default().with_requeue_policy(RequeuePolicy::RetainFailed);
        let mut coordinator =
            BatchCoordinator::new(config, Arc::new(executor), NeverTrigger)
                .unwrap()
                .with_queue(vec![ok.clone(), bad.clone()]);

        assert!(coordinator.attempt_start());
        coordinator.enqueue(late.clone());

        while pump(&mut coordinator).await != Some(RelayEvent::Finished) {}

        assert_eq!(coordinator.phase(), Phase::Idle);
        assert_eq!(coordinator.state().queue, vec![bad, late]);
    }

    #[tokio::test]
    async fn test_clear_all_policy_drops_everything() {
        let bad = Submission::new();
        let late = Submission::new();
        let executor = ScriptedExecutor::new()
            .with_failure(bad.id(), SubmissionError::Transport("reset".into()));
        let mut coordinator = coordinator(Arc::new(executor)).with_queue(vec![bad]);

        assert!(coordinator.attempt_start());
        coordinator.enqueue(late);

        while pump(&mut coordinator).await != Some(RelayEvent::Finished) {}

        assert!(coordinator.state().queue.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = CoordinatorConfig::default().with_event_capacity(0);
        let result = BatchCoordinator::new(config, Arc::new(AcceptingExecutor), NeverTrigger);
        assert!(matches!(result, Err(QueueError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_zero_tick_interval_rejected_without_panic() {
        let config = CoordinatorConfig::default().with_tick_interval(Duration::ZERO);
        let result = BatchCoordinator::with_interval_trigger(config, Arc::new(AcceptingExecutor));
        assert!(matches!(result, Err(QueueError::InvalidConfig(_))));
    }
}
