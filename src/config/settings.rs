//! Bot settings
//!
//! Loaded from a JSON file. Every section has defaults, so a partial file
//! (or none at all) is accepted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::game::layout;
use crate::game::modes::PushModeKind;
use crate::game::outcome::OutcomeLayout;
use crate::vision::Region;

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Device connection
    pub device: DeviceSettings,
    /// Template matching defaults
    pub matching: MatchingSettings,
    /// Wait timings
    pub timings: TimingSettings,
    /// Recovery protocol
    pub recovery: RecoverySettings,
    /// Stage pushing
    pub pushing: PushSettings,
    /// Asset and output directories
    pub paths: PathSettings,
    /// Per-activity toggles; absent entries are enabled
    pub activities: BTreeMap<String, bool>,
}

impl Settings {
    /// Load and validate settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&text)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parse and validate settings from a JSON string
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if self.pushing.defeat_rotation_threshold == 0 {
            return invalid("pushing.defeat_rotation_threshold must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.matching.confidence) {
            return invalid("matching.confidence must be within [0, 1]");
        }
        if self.timings.wait_multiplier.is_nan() || self.timings.wait_multiplier <= 0.0 {
            return invalid("timings.wait_multiplier must be positive");
        }
        if self.recovery.max_attempts == 0 {
            return invalid("recovery.max_attempts must be at least 1");
        }
        if self.pushing.battle_timeout_polls == 0 {
            return invalid("pushing.battle_timeout_polls must be at least 1");
        }
        if self.device.max_fps == 0 {
            return invalid("device.max_fps must be at least 1");
        }
        Ok(())
    }

    /// Check whether an activity is enabled
    pub fn activity_enabled(&self, name: &str) -> bool {
        self.activities.get(name).copied().unwrap_or(true)
    }
}

/// How the device is found and mirrored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Path or name of the adb executable
    pub adb_path: String,
    /// Explicit device serial
    pub serial: Option<String>,
    /// Use the first attached device
    pub auto_find_device: bool,
    /// Local port for `adb connect` when no serial is given
    pub port: u16,
    /// Upper bound on mirrored frames per second
    pub max_fps: u32,
    /// How long to wait for the first frame (ms)
    pub first_frame_timeout_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            serial: None,
            auto_find_device: true,
            port: 5555,
            max_fps: 5,
            first_frame_timeout_ms: 10_000,
        }
    }
}

/// Template matching defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// Default confidence threshold
    pub confidence: f32,
    /// Default capture-and-match cycles
    pub retries: u32,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            confidence: 0.9,
            retries: 3,
        }
    }
}

/// Wait timings, in wait units (seconds before the multiplier)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Multiplier for slow devices
    pub wait_multiplier: f32,
    /// Settle time after a tap or swipe
    pub tap_settle: f32,
    /// Wait between matcher re-samples
    pub retry_wait: f32,
    /// Interval between pause-flag polls
    pub pause_poll: f32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            wait_multiplier: 1.0,
            tap_settle: 1.0,
            retry_wait: 1.0,
            pause_poll: 1.0,
        }
    }
}

/// Recovery protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Back/dismiss rounds before giving up
    pub max_attempts: u32,
    /// Template marking the anchor screen
    pub anchor_template: String,
    /// Where the anchor template appears
    pub anchor_region: Region,
    /// Templates tapped to back out of unknown screens, in order
    pub dismiss_templates: Vec<String>,
    /// Coordinate that closes popups without triggering anything
    pub neutral_point: (i32, i32),
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            anchor_template: layout::ANCHOR.to_string(),
            anchor_region: layout::ANCHOR_REGION,
            dismiss_templates: layout::DISMISS.iter().map(|s| s.to_string()).collect(),
            neutral_point: layout::NEUTRAL,
        }
    }
}

/// Stage pushing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSettings {
    /// Consecutive defeats before switching formation
    pub defeat_rotation_threshold: u32,
    /// Load suggested formations from the records menu
    pub load_formations: bool,
    /// Stop after this many battles (0 = unlimited)
    pub max_battles: u32,
    /// Classifier polls before the result screen counts as unknown
    pub battle_timeout_polls: u32,
    /// Start tapping the neutral point after this many polls
    pub neutral_tap_after_polls: u32,
    /// Times a mode may be re-opened after recovery
    pub max_reopens: u32,
    /// Victory/defeat screen layout
    pub outcome: OutcomeLayout,
    /// Mode run by the binary
    pub mode: Option<PushModeKind>,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            defeat_rotation_threshold: 10,
            load_formations: true,
            max_battles: 0,
            battle_timeout_polls: 60,
            neutral_tap_after_polls: 30,
            max_reopens: 3,
            outcome: OutcomeLayout::default(),
            mode: None,
        }
    }
}

/// Asset and output directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Root of the template images
    pub template_dir: PathBuf,
    /// Where diagnostic screenshots are written
    pub diagnostics_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("img"),
            diagnostics_dir: PathBuf::from("diagnostics"),
        }
    }
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}
