//! Settings types. All structs deserialize with `camelCase` keys and fall
//! back to their defaults for missing fields.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`~/.retro/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetroSettings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

impl RetroSettings {
    /// Reject combinations the session manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.session;
        if self.server.base_url.trim().is_empty() {
            return Err(SettingsError::invalid("server.baseUrl", "must not be empty"));
        }
        if s.monitor_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "session.monitorIntervalMs",
                "must be positive",
            ));
        }
        if s.keep_alive_threshold_ms <= s.monitor_interval_ms {
            return Err(SettingsError::invalid(
                "session.keepAliveThresholdMs",
                format!(
                    "{} must exceed monitorIntervalMs ({})",
                    s.keep_alive_threshold_ms, s.monitor_interval_ms
                ),
            ));
        }
        if s.backoff_base_ms == 0 || s.backoff_max_ms < s.backoff_base_ms {
            return Err(SettingsError::invalid(
                "session.backoffBaseMs",
                format!(
                    "must satisfy 0 < backoffBaseMs ({}) <= backoffMaxMs ({})",
                    s.backoff_base_ms, s.backoff_max_ms
                ),
            ));
        }
        Ok(())
    }
}

/// Where the room service lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Base URL; commands go to `{baseUrl}/command`.
    pub base_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
        }
    }
}

/// Timing knobs of the session manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// First retry delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Retry delay cap in milliseconds.
    pub backoff_max_ms: u64,
    /// How often keep-alive recency is checked.
    pub monitor_interval_ms: u64,
    /// Silence longer than this marks the stream as lagging.
    pub keep_alive_threshold_ms: u64,
    /// Silence longer than this drops and reopens the stream.
    pub stream_idle_timeout_ms: u64,
    /// TCP connect timeout for both channels.
    pub connect_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
            backoff_max_ms: 16_000,
            monitor_interval_ms: 2_000,
            keep_alive_threshold_ms: 12_000,
            stream_idle_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let settings: RetroSettings =
            serde_json::from_str(r#"{"session": {"backoffMaxMs": 4000}}"#).unwrap();
        assert_eq!(settings.session.backoff_max_ms, 4_000);
        assert_eq!(settings.session.backoff_base_ms, 500);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(RetroSettings::default()).unwrap();
        assert_eq!(value["session"]["keepAliveThresholdMs"], 12_000);
        assert_eq!(value["server"]["baseUrl"], "http://localhost:8080/api");
    }

    #[test]
    fn rejects_zero_monitor_interval() {
        let mut settings = RetroSettings::default();
        settings.session.monitor_interval_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue { key: "session.monitorIntervalMs", .. })
        ));
    }

    #[test]
    fn rejects_threshold_not_above_interval() {
        let mut settings = RetroSettings::default();
        settings.session.keep_alive_threshold_ms = 2_000;
        let err = settings.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid session.keepAliveThresholdMs: 2000 must exceed monitorIntervalMs (2000)"
        );
    }

    #[test]
    fn rejects_inverted_backoff() {
        let mut settings = RetroSettings::default();
        settings.session.backoff_base_ms = 5_000;
        settings.session.backoff_max_ms = 1_000;
        assert_eq!(
            settings.validate().unwrap_err().to_string(),
            "invalid session.backoffBaseMs: must satisfy 0 < backoffBaseMs (5000) <= backoffMaxMs (1000)"
        );
    }

    #[test]
    fn rejects_blank_base_url() {
        let mut settings = RetroSettings::default();
        settings.server.base_url = "  ".into();
        assert_eq!(
            settings.validate().unwrap_err().to_string(),
            "invalid server.baseUrl: must not be empty"
        );
    }
}
