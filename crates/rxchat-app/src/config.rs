//! Service configuration.

use std::time::Duration;

use rxchat_client::ClientConfig;

/// Default capacity of the command channel into the runtime.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default upper bound on how long the runtime sleeps without a tick.
pub const DEFAULT_IDLE_TICK: Duration = Duration::from_secs(1);

/// Chat service configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// State machine settings
    pub client: ClientConfig,
    /// Pending requests before callers wait
    pub command_capacity: usize,
    /// Events buffered per slow observer before it lags
    pub event_capacity: usize,
    /// Maximum sleep between ticks when no deadline is pending
    pub idle_tick: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            idle_tick: DEFAULT_IDLE_TICK,
        }
    }
}

impl ChatConfig {
    /// Replace the state machine settings.
    #[must_use]
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Replace the command channel capacity. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    /// Replace the event channel capacity. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Replace the idle tick interval.
    #[must_use]
    pub fn with_idle_tick(mut self, idle_tick: Duration) -> Self {
        self.idle_tick = idle_tick;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacities_never_reach_zero() {
        let config = ChatConfig::default().with_command_capacity(0).with_event_capacity(0);

        assert_eq!(config.command_capacity, 1);
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn defaults() {
        let config = ChatConfig::default();

        assert_eq!(config.command_capacity, DEFAULT_COMMAND_CAPACITY);
        assert_eq!(config.idle_tick, DEFAULT_IDLE_TICK);
        assert_eq!(config.client.delivery_timeout, None);
    }
}
