//! Driver configuration.

use std::time::Duration;

/// Bounds for the driver's settlement waits.
///
/// Defaults mirror the windows the scenarios were written against: one
/// second each for the busy and idle waits after a clock advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Bound on waiting for the engine to start reacting to a clock advance.
    pub busy_timeout: Duration,
    /// Bound on waiting for the engine to settle after any command.
    pub idle_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(1),
        }
    }
}

impl DriverConfig {
    /// Override the busy-wait bound.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Override the idle-wait bound.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_scenario_windows() {
        let config = DriverConfig::default();
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, Duration::from_secs(1));
    }

    #[test]
    fn builders_override_bounds() {
        let config = DriverConfig::default()
            .with_busy_timeout(Duration::from_millis(100))
            .with_idle_timeout(Duration::from_secs(5));
        assert_eq!(config.busy_timeout, Duration::from_millis(100));
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
    }
}
