//! Periodic trigger sources
//!
//! A trigger source tells the coordinator when to try starting a batch.
//! The coordinator polls [`TriggerSource::tick`] from its event loop only
//! while the trigger is started; stopping the trigger simply stops polling.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::coordinator::CoordinatorConfig;
use crate::{QueueError, Result};

/// Source of "attempt submission" ticks
#[async_trait]
pub trait TriggerSource: Send {
    /// Wait for the next tick.
    ///
    /// Polled inside `tokio::select!`, so implementations must be
    /// cancel-safe: dropping the future must not lose a tick that was not
    /// yet returned.
    async fn tick(&mut self);

    /// Restart the period from now. Called whenever the trigger is started.
    fn reset(&mut self) {}
}

/// Fires once per period, first tick one full period after start
#[derive(Debug)]
pub struct IntervalTrigger {
    period: Duration,
    interval: Interval,
}

impl IntervalTrigger {
    /// Create a trigger firing every `period`. A zero period is rejected.
    pub fn new(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(QueueError::InvalidConfig(
                "trigger period must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            period,
            interval: Self::build(period),
        })
    }

    /// Create a trigger firing every `config.tick_interval`, after
    /// validating the whole config
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.tick_interval)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn build(period: Duration) -> Interval {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }
}

#[async_trait]
impl TriggerSource for IntervalTrigger {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }

    fn reset(&mut self) {
        self.interval = Self::build(self.period);
    }
}

/// Trigger that never fires; batches start only from enqueue or explicit
/// attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverTrigger;

#[async_trait]
impl TriggerSource for NeverTrigger {
    async fn tick(&mut self) {
        std::future::pending::<()>().await;
    }
}
