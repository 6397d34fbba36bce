use std::time::Duration;

use retro_settings::SessionSettings;

use crate::backoff::Backoff;

/// Timing configuration for a [`crate::SessionManager`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub backoff: Backoff,
    /// Period of the liveness check.
    pub monitor_interval: Duration,
    /// Keep-alive silence after which the stream counts as lagging.
    pub keep_alive_threshold: Duration,
    /// Byte silence after which the SSE connection is dropped and reopened.
    pub stream_idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            monitor_interval: Duration::from_secs(2),
            keep_alive_threshold: Duration::from_secs(12),
            stream_idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            backoff: Backoff::new(
                Duration::from_millis(settings.backoff_base_ms),
                Duration::from_millis(settings.backoff_max_ms),
            ),
            monitor_interval: Duration::from_millis(settings.monitor_interval_ms),
            keep_alive_threshold: Duration::from_millis(settings.keep_alive_threshold_ms),
            stream_idle_timeout: Duration::from_millis(settings.stream_idle_timeout_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}
