//! Engine tunables

use std::time::Duration;

/// Configuration for the sync engine.
///
/// Defaults match the dashboard deployment: a 30 second drain timer, a
/// 5 second status poll, exponential backoff from 5 seconds to 5 minutes, and
/// 5 automatic delivery attempts per action.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between automatic drain passes while online
    pub drain_interval: Duration,
    /// Interval between status-aggregator refreshes
    pub status_refresh_interval: Duration,
    /// Base delay for the first backoff step
    pub backoff_base: Duration,
    /// Upper bound on the backoff delay
    pub backoff_max: Duration,
    /// Automatic delivery attempts before an action is terminally `FAILED`
    pub max_attempts: u32,
    /// Optional reachability-probe URL for platforms with unreliable
    /// connectivity signals. `None` disables probing.
    pub probe_url: Option<String>,
    /// Interval between reachability probes
    pub probe_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(30),
            status_refresh_interval: Duration::from_secs(5),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            max_attempts: 5,
            probe_url: None,
            probe_interval: Duration::from_secs(15),
        }
    }
}

impl SyncConfig {
    /// Set the automatic drain interval
    #[must_use]
    pub const fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Set the backoff window
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Set the automatic attempt cap
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Enable the periodic reachability probe against the given URL
    #[must_use]
    pub fn with_probe(mut self, url: impl Into<String>) -> Self {
        self.probe_url = Some(url.into());
        self
    }
}
