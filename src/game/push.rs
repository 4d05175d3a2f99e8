//! Stage-push state machine
//!
//! Battles a stage over and over: retry on defeat, rotate the formation
//! every `T` consecutive defeats, reset on victory, stop on a mode's
//! terminal signal. The loop is iterative and owns its [`FormationState`],
//! so sessions of thousands of battles run in constant stack.

use serde::{Deserialize, Serialize};

use super::formation::{FormationLoader, FormationState, Transition};
use super::outcome::{BattleOutcome, Classified, OutcomeClassifier, ResultScreen};
use super::recovery::{Recovery, TaskError};
use crate::android::Controller;
use crate::config::PushSettings;

/// Why a push ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushExit {
    /// The mode has no attempts left
    OutOfAttempts,
    /// The highest available stage is cleared
    MaxProgressReached,
    /// The configured battle limit was hit
    BattleLimit,
    /// The mode stops at its first defeat
    FirstDefeat,
}

/// What happened when a mode tried to start a battle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleStart {
    /// The battle is running
    Started,
    /// The start button was not on screen
    Missed,
    /// Starting showed there is nothing left to battle
    Exit(PushExit),
}

/// Summary of a finished push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReport {
    pub exit: PushExit,
    pub battles: u32,
    pub victories: u32,
    pub defeats: u32,
    pub final_state: FormationState,
}

/// One grinding mode (tower, AFK stages, trials...)
///
/// The push loop owns the state transitions; a mode only navigates,
/// starts battles and acknowledges result screens.
pub trait StagePushMode {
    /// Name used in logs and screenshot tags
    fn name(&self) -> &str;

    /// Navigate from the anchor screen to the stage, `false` if it is not reachable
    fn open(&mut self, ctl: &mut Controller) -> crate::Result<bool>;

    /// Result buttons shown after a battle
    fn result_screen(&self) -> ResultScreen;

    /// Start one battle from the stage screen
    ///
    /// A [`BattleStart::Missed`] is handled like an unknown screen: nothing
    /// is counted and the stage is re-opened after recovery.
    fn start_battle(
        &mut self,
        ctl: &mut Controller,
        state: &FormationState,
    ) -> crate::Result<BattleStart>;

    /// Check for a terminal signal before the next battle
    fn is_terminal(
        &mut self,
        _ctl: &mut Controller,
        _state: &FormationState,
    ) -> crate::Result<Option<PushExit>> {
        Ok(None)
    }

    /// Acknowledge a victory; `state` has already been reset
    fn on_victory(
        &mut self,
        ctl: &mut Controller,
        state: &mut FormationState,
        result: &Classified,
    ) -> crate::Result<()>;

    /// Acknowledge a defeat; `state` has already counted it
    fn on_defeat(
        &mut self,
        ctl: &mut Controller,
        state: &FormationState,
        transition: Transition,
        result: &Classified,
    ) -> crate::Result<()>;

    /// Called after a formation has been (re)loaded
    fn after_formation_load(
        &mut self,
        _ctl: &mut Controller,
        _state: &FormationState,
    ) -> crate::Result<()> {
        Ok(())
    }

    /// Reload formation 1 after every victory
    fn reload_on_victory(&self) -> bool {
        false
    }
}

/// The push loop
pub struct StagePush {
    classifier: Box<dyn OutcomeClassifier>,
    loader: FormationLoader,
    state: FormationState,
    max_battles: u32,
    battle_timeout_polls: u32,
    neutral_tap_after_polls: u32,
    max_reopens: u32,
}

impl StagePush {
    /// Create a push loop from settings, using the configured outcome layout
    pub fn new(settings: &PushSettings) -> Self {
        Self {
            classifier: settings.outcome.classifier(),
            loader: FormationLoader::new(settings.load_formations),
            state: FormationState::new(settings.defeat_rotation_threshold),
            max_battles: settings.max_battles,
            battle_timeout_polls: settings.battle_timeout_polls.max(1),
            neutral_tap_after_polls: settings.neutral_tap_after_polls,
            max_reopens: settings.max_reopens,
        }
    }

    /// Replace the outcome classifier
    pub fn with_classifier(mut self, classifier: Box<dyn OutcomeClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Get the formation state
    pub fn state(&self) -> &FormationState {
        &self.state
    }

    /// Push `mode` until it reports a terminal signal
    ///
    /// Fails with [`TaskError::ModeUnavailable`] if the mode cannot be
    /// opened and [`TaskError::RecoveryExhausted`] if an unknown screen
    /// cannot be recovered from.
    pub fn run(
        &mut self,
        ctl: &mut Controller,
        recovery: &Recovery,
        mode: &mut dyn StagePushMode,
    ) -> crate::Result<PushReport> {
        let name = mode.name().to_string();
        log::info!(
            "Pushing {}, changing formations after {} defeats",
            name,
            self.state.defeat_rotation_threshold()
        );
        self.open(ctl, recovery, mode)?;

        let screen = mode.result_screen();
        let mut reload = true;
        let mut reopens = 0;
        let (mut battles, mut victories, mut defeats) = (0, 0, 0);

        let exit = loop {
            ctl.hold_while_paused();

            if let Some(exit) = mode.is_terminal(ctl, &self.state)? {
                break exit;
            }
            if self.max_battles > 0 && battles >= self.max_battles {
                log::info!("Battle limit of {} reached", self.max_battles);
                break PushExit::BattleLimit;
            }

            if reload {
                self.loader.load(ctl, &mut self.state, false)?;
                mode.after_formation_load(ctl, &self.state)?;
            }

            let outcome = match mode.start_battle(ctl, &self.state)? {
                BattleStart::Exit(exit) => break exit,
                BattleStart::Missed => {
                    log::warn!("Could not start a battle in {}", name);
                    None
                }
                BattleStart::Started => {
                    battles += 1;
                    self.await_outcome(ctl, &screen)?
                }
            };

            match outcome {
                Some(result) if result.outcome == BattleOutcome::Victory => {
                    victories += 1;
                    self.state.record_victory();
                    log::info!("Victory! Stage passed");
                    mode.on_victory(ctl, &mut self.state, &result)?;
                    reload = mode.reload_on_victory();
                }
                Some(result) => {
                    defeats += 1;
                    let transition = self.state.record_defeat();
                    match transition {
                        Transition::Rotate { formation } => log::info!(
                            "{} defeats, trying formation #{}",
                            self.state.consecutive_defeats(),
                            formation
                        ),
                        Transition::Retry => log::info!(
                            "Defeat #{}! Retrying",
                            self.state.consecutive_defeats()
                        ),
                    }
                    mode.on_defeat(ctl, &self.state, transition, &result)?;
                    reload = matches!(transition, Transition::Rotate { .. });
                }
                None => {
                    log::warn!("No battle result in {}, recovering", name);
                    if !recovery.recover(ctl)? {
                        let screenshot = ctl.save_diagnostic(&format!("{name}_push_error")).ok();
                        return Err(TaskError::RecoveryExhausted {
                            task: name,
                            screenshot,
                        }
                        .into());
                    }
                    if reopens >= self.max_reopens {
                        log::error!("{} could not be resumed after {} re-opens", name, reopens);
                        return Err(TaskError::ModeUnavailable(name).into());
                    }
                    reopens += 1;
                    self.open(ctl, recovery, mode)?;
                    reload = true;
                }
            }
        };

        log::info!(
            "{} finished ({:?}): {} battles, {} victories, {} defeats",
            name,
            exit,
            battles,
            victories,
            defeats
        );
        Ok(PushReport {
            exit,
            battles,
            victories,
            defeats,
            final_state: self.state,
        })
    }

    fn open(
        &mut self,
        ctl: &mut Controller,
        recovery: &Recovery,
        mode: &mut dyn StagePushMode,
    ) -> crate::Result<()> {
        if mode.open(ctl)? {
            return Ok(());
        }
        let name = mode.name().to_string();
        log::error!("Something went wrong opening {}!", name);
        if let Err(e) = ctl.save_diagnostic(&format!("{name}_open_error")) {
            log::error!("Could not save screenshot: {}", e);
        }
        recovery.recover(ctl)?;
        Err(TaskError::ModeUnavailable(name).into())
    }

    /// Poll the classifier until a result screen shows up
    fn await_outcome(
        &mut self,
        ctl: &mut Controller,
        screen: &ResultScreen,
    ) -> crate::Result<Option<Classified>> {
        for poll in 1..=self.battle_timeout_polls {
            if let Some(result) = self.classifier.classify(ctl, screen)? {
                return Ok(Some(result));
            }
            // Battery saver covers the result screen until touched
            if poll > self.neutral_tap_after_polls {
                ctl.tap_neutral()?;
            }
            ctl.wait(1.0);
        }
        Ok(None)
    }
}

/// Push several modes one after another
///
/// Each mode gets a fresh loop and starts from the anchor screen. When
/// more than one mode is given, a mode that cannot be opened is logged
/// and skipped.
pub fn run_sequence(
    settings: &PushSettings,
    ctl: &mut Controller,
    recovery: &Recovery,
    modes: &mut [Box<dyn StagePushMode>],
) -> crate::Result<Vec<PushReport>> {
    let skippable = modes.len() > 1;
    let mut reports = Vec::with_capacity(modes.len());
    for (i, mode) in modes.iter_mut().enumerate() {
        if i > 0 {
            recovery.recover(ctl)?;
        }
        match StagePush::new(settings).run(ctl, recovery, mode.as_mut()) {
            Ok(report) => reports.push(report),
            Err(crate::AutoError::Task(TaskError::ModeUnavailable(name))) if skippable => {
                log::warn!("{} unavailable, moving on", name);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(reports)
}
