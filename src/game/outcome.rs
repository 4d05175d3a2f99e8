//! Battle outcome classification
//!
//! How a result screen is read differs between game versions, so the push
//! loop takes the classifier as a pluggable capability chosen by
//! [`OutcomeLayout`].

use serde::{Deserialize, Serialize};

use crate::android::Controller;
use crate::vision::{Match, Region};

/// Result of one battle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleOutcome {
    Victory,
    Defeat,
}

/// Result buttons a mode shows after battle, in priority order
#[derive(Debug, Clone, Copy)]
pub struct ResultScreen {
    /// Where the buttons appear
    pub region: Region,
    /// Template and the outcome it stands for
    pub templates: &'static [(&'static str, BattleOutcome)],
    /// Template that only the post-battle screen shows, checked first
    pub gate: Option<(&'static str, Region)>,
}

impl ResultScreen {
    /// Check that the post-battle screen is up
    ///
    /// Screens without a gate are always considered up.
    pub fn is_shown(&self, ctl: &Controller) -> crate::Result<bool> {
        let Some((gate, region)) = self.gate else {
            return Ok(true);
        };
        let opts = ctl.options().with_region(region).with_retries(1).quiet();
        ctl.is_visible(gate, &opts)
    }

    /// Template names in priority order
    pub fn names(&self) -> Vec<&'static str> {
        self.templates.iter().map(|(name, _)| *name).collect()
    }

    /// Outcome a template stands for
    pub fn outcome_of(&self, name: &str) -> Option<BattleOutcome> {
        self.templates
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, outcome)| *outcome)
    }
}

/// A recognised result screen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classified {
    pub outcome: BattleOutcome,
    /// Result template that was seen, if the classifier matched one
    pub template: Option<&'static str>,
    /// Where it was seen
    pub matched: Option<Match>,
}

/// Reads the outcome of a finished battle
pub trait OutcomeClassifier: Send {
    /// Classify the current screen, `None` if it is not a result screen yet
    ///
    /// Classifiers never tap; acknowledging the result is up to the mode.
    fn classify(
        &mut self,
        ctl: &mut Controller,
        screen: &ResultScreen,
    ) -> crate::Result<Option<Classified>>;
}

/// Configured result-screen layout
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeLayout {
    /// Outcome given by which result button is shown
    #[default]
    Buttons,
    /// Outcome given by the red channel of one pixel
    PixelRed {
        x: u32,
        y: u32,
        threshold: u8,
        /// Outcome when the red value is above the threshold
        above: BattleOutcome,
    },
}

impl OutcomeLayout {
    /// Build the classifier for this layout
    pub fn classifier(&self) -> Box<dyn OutcomeClassifier> {
        match *self {
            OutcomeLayout::Buttons => Box::new(ButtonClassifier),
            OutcomeLayout::PixelRed {
                x,
                y,
                threshold,
                above,
            } => Box::new(PixelRed {
                x,
                y,
                threshold,
                above,
            }),
        }
    }
}

/// Classifies by the first visible result button
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonClassifier;

impl OutcomeClassifier for ButtonClassifier {
    fn classify(
        &mut self,
        ctl: &mut Controller,
        screen: &ResultScreen,
    ) -> crate::Result<Option<Classified>> {
        if !screen.is_shown(ctl)? {
            return Ok(None);
        }
        let opts = ctl.options().with_region(screen.region).with_retries(1).quiet();
        let hit = ctl.first_of(&screen.names(), &opts)?;
        Ok(hit.and_then(|(name, m)| {
            screen.outcome_of(name).map(|outcome| Classified {
                outcome,
                template: Some(name),
                matched: Some(m),
            })
        }))
    }
}

/// Classifies by comparing one pixel's red channel to a threshold
///
/// Only consulted once a result button is visible, so battle animations
/// are never read as an outcome.
#[derive(Debug, Clone, Copy)]
pub struct PixelRed {
    pub x: u32,
    pub y: u32,
    pub threshold: u8,
    pub above: BattleOutcome,
}

impl OutcomeClassifier for PixelRed {
    fn classify(
        &mut self,
        ctl: &mut Controller,
        screen: &ResultScreen,
    ) -> crate::Result<Option<Classified>> {
        if !screen.is_shown(ctl)? {
            return Ok(None);
        }
        let opts = ctl.options().with_region(screen.region).with_retries(1).quiet();
        let Some((name, m)) = ctl.first_of(&screen.names(), &opts)? else {
            return Ok(None);
        };
        let Some(pixel) = ctl.pixel(self.x, self.y)? else {
            log::warn!("Outcome pixel ({}, {}) is outside the frame", self.x, self.y);
            return Ok(None);
        };

        let outcome = if pixel[0] > self.threshold {
            self.above
        } else {
            match self.above {
                BattleOutcome::Victory => BattleOutcome::Defeat,
                BattleOutcome::Defeat => BattleOutcome::Victory,
            }
        };
        log::debug!("Outcome pixel red {} -> {:?}", pixel[0], outcome);
        Ok(Some(Classified {
            outcome,
            template: Some(name),
            matched: Some(m),
        }))
    }
}
