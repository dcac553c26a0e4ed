//! # Configuration
//!
//! Runtime settings for the player, read from YAML with kebab-case keys. Every key is
//! optional; missing keys take their defaults.
//!
//! ## Example
//! ```rust
//! use legato::PlayerConfig;
//!
//! let config = PlayerConfig::from_yaml("poll-interval-ms: 50\nremote:\n  synthesize-path: /api/synthesize\n").unwrap();
//! assert_eq!(config.poll_interval().as_millis(), 50);
//! assert_eq!(config.remote.synthesize_path, "/api/synthesize");
//! assert_eq!(config.remote.health_path, "/health");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::abc::{AbcTypesetter, LayoutOptions, DEFAULT_TEMPO};
use crate::error::LegatoError;
use crate::synth::timeline::{NoteOutput, TimelineSynth, DEFAULT_VELOCITY};

/// Upper bound on the completion-polling interval, and so on how late the end of a
/// polled session can be observed.
pub const MAX_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlayerConfig {
    pub poll_interval_ms: u64,
    /// Editor line height used for scroll positioning
    pub line_height: f64,
    pub velocity: u8,
    pub warmup_ms: u64,
    pub default_tempo: u16,
    pub layout: LayoutOptions,
    pub remote: RemoteConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            line_height: 20.0,
            velocity: DEFAULT_VELOCITY,
            warmup_ms: 0,
            default_tempo: DEFAULT_TEMPO,
            layout: LayoutOptions::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// Endpoints of the remote synthesis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RemoteConfig {
    pub synthesize_path: String,
    pub health_path: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            synthesize_path: "/synthesize".to_string(),
            health_path: "/health".to_string(),
        }
    }
}

impl PlayerConfig {
    pub fn from_yaml(content: &str) -> Result<Self, LegatoError> {
        let config: PlayerConfig = serde_yaml::from_str(content).map_err(|e| LegatoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LegatoError> {
        if !(1..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            return Err(LegatoError::InvalidConfig(format!(
                "poll-interval-ms must be between 1 and {}, got {}",
                MAX_POLL_INTERVAL_MS, self.poll_interval_ms
            )));
        }
        if !(1..=127).contains(&self.velocity) {
            return Err(LegatoError::InvalidConfig(format!(
                "velocity must be between 1 and 127, got {}",
                self.velocity
            )));
        }
        if self.default_tempo == 0 {
            return Err(LegatoError::InvalidConfig("default-tempo must be positive".to_string()));
        }
        if !(self.line_height.is_finite() && self.line_height > 0.0) {
            return Err(LegatoError::InvalidConfig(format!(
                "line-height must be positive, got {}",
                self.line_height
            )));
        }
        for (name, path) in [
            ("synthesize-path", &self.remote.synthesize_path),
            ("health-path", &self.remote.health_path),
        ] {
            if !path.starts_with('/') {
                return Err(LegatoError::InvalidConfig(format!("{} must start with '/', got '{}'", name, path)));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn typesetter(&self) -> AbcTypesetter {
        AbcTypesetter {
            layout: self.layout.clone(),
            default_tempo: self.default_tempo,
        }
    }

    pub fn timeline_synth<O: NoteOutput + 'static>(&self, output: O) -> TimelineSynth<O> {
        TimelineSynth::new(output)
            .with_velocity(self.velocity)
            .with_warmup(self.warmup())
    }
}
