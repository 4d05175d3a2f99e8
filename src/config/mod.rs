//! Configuration module
//!
//! Handles bot settings: device connection, matching defaults, timings,
//! recovery and stage-push policy.

pub mod settings;

pub use settings::{
    ConfigError, DeviceSettings, MatchingSettings, PathSettings, PushSettings,
    RecoverySettings, Settings, TimingSettings,
};
