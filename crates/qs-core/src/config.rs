//! Engine tunables
//!
//! The rule tables are compiled in; only timing and naming knobs live here.
//! Every field has a default so partial option objects deserialize cleanly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Catch-all re-check period while nothing is playing.
    pub idle_check_interval_ms: u32,
    /// Re-check period while the media element is playing.
    pub playing_check_interval_ms: u32,
    /// Period of the scan for freshly created media elements.
    pub media_scan_interval_ms: u32,
    /// Delay between a history API call and the navigation reset.
    pub history_settle_delay_ms: u32,
    /// Distance from the end the skipped ad is parked at.
    pub skip_epsilon_secs: f64,
    /// Playback rate applied while an ad is being skipped.
    pub skip_playback_rate: f64,
    /// Window after the last user input during which pauses are honored.
    pub activity_window_ms: f64,
    /// Id of the injected stylesheet node.
    pub style_element_id: String,
    /// Attribute marking media elements that already carry a src observer.
    pub monitored_marker: String,
    /// Max log level: "off", "error", "warn", "info", "debug" or "trace".
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_check_interval_ms: 1000,
            playing_check_interval_ms: 500,
            media_scan_interval_ms: 2000,
            history_settle_delay_ms: 100,
            skip_epsilon_secs: 0.1,
            skip_playback_rate: 16.0,
            activity_window_ms: 3000.0,
            style_element_id: "ytm-adblock-css".to_string(),
            monitored_marker: "adblock_monitored".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse the configured log level, falling back to `Warn`.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Warn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"playingCheckIntervalMs": 250, "logLevel": "debug"}"#).unwrap();
        assert_eq!(config.playing_check_interval_ms, 250);
        assert_eq!(config.idle_check_interval_ms, 1000);
        assert_eq!(config.level_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_bad_log_level_falls_back() {
        let config = EngineConfig {
            log_level: "loud".to_string(),
            ..EngineConfig::default()
        };
        assert_eq!(config.level_filter(), log::LevelFilter::Warn);
    }
}
