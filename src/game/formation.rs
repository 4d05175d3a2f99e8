//! Formation rotation
//!
//! [`FormationState`] counts consecutive defeats and picks the formation to
//! battle with. Every `T` consecutive defeats the next suggested formation
//! is loaded; a victory goes back to the first one.

use serde::{Deserialize, Serialize};

use super::layout::{buttons, labels, points};
use crate::android::Controller;
use crate::config::ConfigError;

/// Highest formation index in the records menu
pub const MAX_FORMATION: u32 = 7;

/// What a defeat means for the next battle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Battle again with the same formation
    Retry,
    /// Load `formation` before the next battle
    Rotate { formation: u32 },
}

/// Formation index and defeat counter of one pushing session
///
/// Deserializing checks the same bounds the transitions keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StateRecord")]
pub struct FormationState {
    formation_index: u32,
    consecutive_defeats: u32,
    defeat_rotation_threshold: u32,
    first_stage_won: bool,
}

impl FormationState {
    /// Fresh state on formation 1; a zero threshold is treated as 1
    pub fn new(defeat_rotation_threshold: u32) -> Self {
        Self {
            formation_index: 1,
            consecutive_defeats: 0,
            defeat_rotation_threshold: defeat_rotation_threshold.max(1),
            first_stage_won: false,
        }
    }

    /// Current formation, always within `1..=7`
    pub fn formation_index(&self) -> u32 {
        self.formation_index
    }

    /// Defeats since the last victory or reset
    pub fn consecutive_defeats(&self) -> u32 {
        self.consecutive_defeats
    }

    /// Defeats per formation
    pub fn defeat_rotation_threshold(&self) -> u32 {
        self.defeat_rotation_threshold
    }

    /// Whether the first round of a two-round stage has been won
    pub fn first_stage_won(&self) -> bool {
        self.first_stage_won
    }

    /// Mark the first round of the current stage won or not
    pub fn set_first_stage_won(&mut self, won: bool) {
        self.first_stage_won = won;
    }

    /// Count a defeat and decide whether to rotate
    pub fn record_defeat(&mut self) -> Transition {
        self.consecutive_defeats += 1;
        let t = self.defeat_rotation_threshold;

        if self.consecutive_defeats % t != 0 {
            return Transition::Retry;
        }

        let mut next = self.consecutive_defeats / t + 1;
        if next > MAX_FORMATION {
            log::info!(
                "Formation #{} is past the last one, starting from 1 again",
                next
            );
            next = 1;
        }
        self.formation_index = next;
        Transition::Rotate { formation: next }
    }

    /// Count a victory: back to formation 1 with no defeats
    pub fn record_victory(&mut self) {
        self.reset();
        self.first_stage_won = false;
    }

    /// Explicit formation reset
    pub fn reset(&mut self) {
        self.consecutive_defeats = 0;
        self.formation_index = 1;
    }

    /// Move to the next formation without touching the defeat count
    fn skip_formation(&mut self) {
        self.formation_index = if self.formation_index >= MAX_FORMATION {
            1
        } else {
            self.formation_index + 1
        };
    }
}

/// Unchecked wire form of [`FormationState`]
#[derive(Deserialize)]
struct StateRecord {
    formation_index: u32,
    consecutive_defeats: u32,
    defeat_rotation_threshold: u32,
    #[serde(default)]
    first_stage_won: bool,
}

impl TryFrom<StateRecord> for FormationState {
    type Error = ConfigError;

    fn try_from(record: StateRecord) -> Result<Self, Self::Error> {
        if !(1..=MAX_FORMATION).contains(&record.formation_index) {
            return Err(ConfigError::Invalid(format!(
                "formation_index {} is outside 1..={}",
                record.formation_index, MAX_FORMATION
            )));
        }
        if record.defeat_rotation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "defeat_rotation_threshold must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            formation_index: record.formation_index,
            consecutive_defeats: record.consecutive_defeats,
            defeat_rotation_threshold: record.defeat_rotation_threshold,
            first_stage_won: record.first_stage_won,
        })
    }
}

/// Applies a suggested formation from the records menu
#[derive(Debug, Clone, Copy)]
pub struct FormationLoader {
    enabled: bool,
}

impl FormationLoader {
    /// Create a loader; a disabled loader never touches the screen
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Check if formation loading is enabled
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Load the formation at `state.formation_index()`
    ///
    /// Formations with unowned heroes or artifacts are skipped, advancing the
    /// index, for at most 7 attempts. Returns whether a formation was applied.
    pub fn load(
        &self,
        ctl: &mut Controller,
        state: &mut FormationState,
        already_open: bool,
    ) -> crate::Result<bool> {
        if !self.enabled {
            log::info!("Formation loading disabled");
            return Ok(false);
        }

        log::info!("Loading formation #{}", state.formation_index());
        ctl.wait(1.0);
        if !already_open {
            ctl.click(buttons::RECORDS, &ctl.options().with_settle(3.0))?;
        }
        let (nx, ny) = points::NEXT_FORMATION;
        for _ in 1..state.formation_index() {
            ctl.tap(nx, ny)?;
        }
        ctl.click(buttons::COPY, &ctl.options().with_settle(2.0))?;

        let not_owned = ctl.options().with_retries(1).quiet();
        let mut unowned = 0;
        let mut applied = true;
        while ctl.is_visible(labels::NOT_OWNED, &not_owned)? {
            log::info!("Hero/Artifact not owned, trying next formation..");
            let (cx, cy) = points::CLOSE_NOT_OWNED;
            ctl.tap(cx, cy)?;
            ctl.tap(nx, ny)?;
            ctl.click(buttons::COPY, &ctl.options())?;
            state.skip_formation();
            unowned += 1;

            if unowned >= MAX_FORMATION {
                log::info!("All formations contained an unowned hero!");
                ctl.tap_neutral()?;
                ctl.tap_neutral()?;
                applied = false;
                break;
            }
        }

        ctl.click(buttons::CONFIRM, &ctl.options().with_settle(0.0).quiet())?;
        Ok(applied)
    }
}
