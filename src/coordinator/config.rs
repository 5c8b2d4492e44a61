use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{QueueError, Result};

/// Period between trigger ticks unless configured otherwise
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Buffer of the observer event channel unless configured otherwise
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happens to the queue once a batch finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeuePolicy {
    /// Empty the queue unconditionally, including items enqueued while the
    /// batch was running.
    #[default]
    ClearAll,
    /// Keep failed snapshot items and anything enqueued during the batch,
    /// in queue order, for the next tick.
    RetainFailed,
}

/// Coordinator configuration, passed explicitly at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Interval of the interval trigger
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Upper bound on a single executor call; unbounded when `None`
    #[serde(default)]
    pub submit_timeout: Option<Duration>,

    /// Queue policy applied when a batch finishes
    #[serde(default)]
    pub requeue_policy: RequeuePolicy,

    /// Capacity of the broadcast channel carrying observer events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_tick_interval() -> Duration {
    DEFAULT_TICK_INTERVAL
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            submit_timeout: None,
            requeue_policy: RequeuePolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = Some(timeout);
        self
    }

    pub fn with_requeue_policy(mut self, policy: RequeuePolicy) -> Self {
        self.requeue_policy = policy;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Reject values the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(QueueError::InvalidConfig(
                "tick_interval must be greater than zero".to_string(),
            ));
        }
        if self.submit_timeout.is_some_and(|t| t.is_zero()) {
            return Err(QueueError::InvalidConfig(
                "submit_timeout must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.submit_timeout, None);
        assert_eq!(config.requeue_policy, RequeuePolicy::ClearAll);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = CoordinatorConfig::default()
            .with_tick_interval(Duration::from_millis(250))
            .with_submit_timeout(Duration::from_secs(3))
            .with_requeue_policy(RequeuePolicy::RetainFailed)
            .with_event_capacity(8);

        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.submit_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.requeue_policy, RequeuePolicy::RetainFailed);
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero_tick = CoordinatorConfig::default().with_tick_interval(Duration::ZERO);
        assert!(matches!(zero_tick.validate(), Err(QueueError::InvalidConfig(_))));

        let zero_timeout = CoordinatorConfig::default().with_submit_timeout(Duration::ZERO);
        assert!(matches!(zero_timeout.validate(), Err(QueueError::InvalidConfig(_))));

        let zero_capacity = CoordinatorConfig::default().with_event_capacity(0);
        assert!(matches!(zero_capacity.validate(), Err(QueueError::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{ "requeue_policy": "retain_failed" }"#).unwrap();

        assert_eq!(config.requeue_policy, RequeuePolicy::RetainFailed);
        assert_eq!(config.tick_interval, DEFAULT_TICK_INTERVAL);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }
}
