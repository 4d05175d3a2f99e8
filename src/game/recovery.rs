//! Recovery protocol
//!
//! Every task starts and ends on the anchor screen. [`Recovery::recover`]
//! gets back there from an unknown screen with a bounded number of
//! back/dismiss rounds, and [`Recovery::safe_open_and_close`] enforces the
//! invariant around a task.

use std::path::PathBuf;

use super::state::{CheckpointPhase, ScreenState, TaskCheckpoint};
use crate::android::Controller;
use crate::config::RecoverySettings;
use crate::vision::{MatchOptions, Region};

/// Task-level failures
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("could not return to the anchor screen after {task}")]
    RecoveryExhausted {
        task: String,
        screenshot: Option<PathBuf>,
    },
    #[error("could not open {0}")]
    ModeUnavailable(String),
}

/// Bounded return-to-anchor procedure
#[derive(Debug, Clone)]
pub struct Recovery {
    max_attempts: u32,
    anchor: String,
    anchor_region: Region,
    dismiss: Vec<String>,
}

impl Recovery {
    /// Build from settings
    pub fn new(settings: &RecoverySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            anchor: settings.anchor_template.clone(),
            anchor_region: settings.anchor_region,
            dismiss: settings.dismiss_templates.clone(),
        }
    }

    /// Override the attempt bound
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Get the attempt bound
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classify the current screen
    pub fn screen_state(&self, ctl: &Controller) -> crate::Result<ScreenState> {
        let opts = ctl.options().with_region(self.anchor_region).quiet();
        Ok(ctl.is_visible(&self.anchor, &opts)?.into())
    }

    /// Return to the anchor screen
    ///
    /// Returns `true` immediately if already there. Otherwise taps the
    /// dismiss templates and the neutral point up to `max_attempts` times,
    /// checking the anchor after each round. On exhaustion a diagnostic
    /// screenshot is saved and `false` returned.
    pub fn recover(&self, ctl: &mut Controller) -> crate::Result<bool> {
        if self.screen_state(ctl)?.is_anchored() {
            return Ok(true);
        }

        let dismiss_opts = MatchOptions::new()
            .with_confidence(ctl.options().confidence)
            .with_retries(1)
            .quiet();

        for attempt in 1..=self.max_attempts {
            log::debug!("Recovery attempt {}/{}", attempt, self.max_attempts);
            for name in &self.dismiss {
                ctl.click(name, &dismiss_opts)?;
            }
            ctl.tap_neutral()?;

            if self.screen_state(ctl)?.is_anchored() {
                log::info!("Recovered after {} attempt(s)", attempt);
                return Ok(true);
            }
        }

        log::error!("Recovery failed after {} attempts", self.max_attempts);
        if let Err(e) = ctl.save_diagnostic("recovery_timeout") {
            log::error!("Could not save recovery screenshot: {}", e);
        }
        Ok(false)
    }

    /// Check the anchor invariant at one side of a task
    ///
    /// A failed open is logged and tolerated. A failed close saves a
    /// screenshot tagged with the task and returns
    /// [`TaskError::RecoveryExhausted`].
    pub fn safe_open_and_close(
        &self,
        ctl: &mut Controller,
        checkpoint: &TaskCheckpoint,
    ) -> crate::Result<()> {
        if self.recover(ctl)? {
            return Ok(());
        }

        match checkpoint.phase {
            CheckpointPhase::Open => {
                log::warn!(
                    "{} started away from the anchor screen, continuing anyway",
                    checkpoint.task
                );
                Ok(())
            }
            CheckpointPhase::Close => {
                let tag = format!("{}_close_error", checkpoint.task);
                let screenshot = match ctl.save_diagnostic(&tag) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        log::error!("Could not save screenshot for {}: {}", checkpoint.task, e);
                        None
                    }
                };
                log::error!("{} did not end on the anchor screen", checkpoint.task);
                Err(TaskError::RecoveryExhausted {
                    task: checkpoint.task.clone(),
                    screenshot,
                }
                .into())
            }
        }
    }
}
