//! Push modes
//!
//! Each grinding mode is a [`StagePushMode`] handler; [`PushModeKind`] is
//! the configured choice between them. Kinds that cover several stages
//! (the trial floors, the daily towers) expand into one handler per stage.

use serde::{Deserialize, Serialize};

use super::formation::{FormationState, Transition};
use super::layout::{self, buttons, labels, points};
use super::outcome::{BattleOutcome, Classified, ResultScreen};
use super::push::{BattleStart, PushExit, StagePushMode};
use crate::android::Controller;
use crate::vision::Region;

/// Faction towers of the Legend Trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    Graveborn,
    Light,
    Mauler,
    Wilder,
}

impl Faction {
    /// Order the daily tower run visits the factions in
    pub const DAILY_ORDER: [Faction; 4] = [
        Faction::Light,
        Faction::Wilder,
        Faction::Graveborn,
        Faction::Mauler,
    ];

    /// Tower entry template
    pub fn template(&self) -> &'static str {
        match self {
            Faction::Graveborn => "towers/graveborn",
            Faction::Light => "towers/light",
            Faction::Mauler => "towers/mauler",
            Faction::Wilder => "towers/wilder",
        }
    }
}

/// Configured push mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushModeKind {
    /// Climb one faction tower
    Tower { faction: Faction },
    /// Push AFK stages, or talent stages
    AfkStages {
        #[serde(default)]
        talent: bool,
    },
    /// Push the Dawnrise and Nightmare floors of both rate-up charm rows
    Trial,
    /// Climb every open faction tower until its first defeat
    DailyTowers,
}

impl PushModeKind {
    /// Task name used for checkpoints and logs
    pub fn name(&self) -> String {
        match self {
            PushModeKind::Tower { faction } => TowerMode::new(*faction).name,
            PushModeKind::AfkStages { talent: false } => "afk_stages".to_string(),
            PushModeKind::AfkStages { talent: true } => "talent_stages".to_string(),
            PushModeKind::Trial => "duras_trials".to_string(),
            PushModeKind::DailyTowers => "daily_towers".to_string(),
        }
    }

    /// Create the handlers for this mode, in the order they are pushed
    pub fn handlers(&self) -> Vec<Box<dyn StagePushMode>> {
        match *self {
            PushModeKind::Tower { faction } => vec![Box::new(TowerMode::new(faction))],
            PushModeKind::AfkStages { talent } => vec![Box::new(AfkStagesMode::new(talent))],
            PushModeKind::Trial => {
                let mut modes: Vec<Box<dyn StagePushMode>> = Vec::new();
                for row in [CharmRow::Top, CharmRow::Bottom] {
                    for floor in [TrialFloor::Dawnrise, TrialFloor::Nightmare] {
                        modes.push(Box::new(TrialMode::new(row, floor)));
                    }
                }
                modes
            }
            PushModeKind::DailyTowers => Faction::DAILY_ORDER
                .into_iter()
                .map(|f| Box::new(TowerMode::until_first_defeat(f)) as Box<dyn StagePushMode>)
                .collect(),
        }
    }
}

/// Tap the result button the classifier saw
fn acknowledge(ctl: &mut Controller, result: &Classified, settle: f32) -> crate::Result<()> {
    if let Some(m) = result.matched {
        let (x, y) = m.center();
        ctl.tap_and_wait(x, y, settle)?;
    }
    Ok(())
}

const TOWER_RESULTS: ResultScreen = ResultScreen {
    region: layout::BOTTOM_BUTTONS,
    templates: &[
        (buttons::NEXT, BattleOutcome::Victory),
        (buttons::RETRY, BattleOutcome::Defeat),
    ],
    gate: None,
};

/// Faction tower climbing
#[derive(Debug, Clone)]
pub struct TowerMode {
    faction: Faction,
    name: String,
    until_defeat: bool,
    defeated: bool,
}

impl TowerMode {
    pub fn new(faction: Faction) -> Self {
        let name = format!("{:?}_tower", faction).to_lowercase();
        Self {
            faction,
            name,
            until_defeat: false,
            defeated: false,
        }
    }

    /// Climb with the formation loaded once, leaving at the first defeat
    pub fn until_first_defeat(faction: Faction) -> Self {
        Self {
            until_defeat: true,
            ..Self::new(faction)
        }
    }
}

impl StagePushMode for TowerMode {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, ctl: &mut Controller) -> crate::Result<bool> {
        let (tx, ty) = points::TRIALS_TAB;
        ctl.tap_and_wait(tx, ty, 2.0)?;
        ctl.click(labels::LEGEND_TRIAL, &ctl.options().with_settle(3.0))?;
        // Clears the district popup
        ctl.tap_neutral()?;

        let confidence = if self.until_defeat { 0.94 } else { 0.95 };
        let tower = ctl
            .options()
            .with_confidence(confidence)
            .with_offset(0, -20)
            .with_settle(4.0);
        if !ctl.click(self.faction.template(), &tower)? {
            return Ok(false);
        }
        log::info!("Opening {:?} tower", self.faction);

        let floor = ctl
            .options()
            .grayscale()
            .with_region(layout::TOWER_FLOORS)
            .with_offset(0, -50)
            .with_settle(3.0);
        if !ctl.click("towers/lvl", &floor)? {
            log::info!("Tower floor not found!");
            return Ok(false);
        }
        Ok(true)
    }

    fn result_screen(&self) -> ResultScreen {
        TOWER_RESULTS
    }

    fn is_terminal(
        &mut self,
        _ctl: &mut Controller,
        _state: &FormationState,
    ) -> crate::Result<Option<PushExit>> {
        Ok(self.defeated.then_some(PushExit::FirstDefeat))
    }

    fn start_battle(
        &mut self,
        ctl: &mut Controller,
        _state: &FormationState,
    ) -> crate::Result<BattleStart> {
        let opts = ctl
            .options()
            .with_region(layout::BOTTOM_BUTTONS)
            .with_retries(5)
            .quiet();
        if !ctl.click(buttons::BATTLE, &opts)? {
            return Ok(BattleStart::Missed);
        }
        Ok(BattleStart::Started)
    }

    fn on_victory(
        &mut self,
        ctl: &mut Controller,
        _state: &mut FormationState,
        result: &Classified,
    ) -> crate::Result<()> {
        log::info!("{:?} win detected, moving to next floor", self.faction);
        acknowledge(ctl, result, 4.0)
    }

    fn on_defeat(
        &mut self,
        ctl: &mut Controller,
        _state: &FormationState,
        _transition: Transition,
        result: &Classified,
    ) -> crate::Result<()> {
        if !self.until_defeat {
            return acknowledge(ctl, result, 1.0);
        }
        log::info!("{:?} defeat!", self.faction);
        self.defeated = true;
        ctl.click(buttons::BACK, &ctl.options())?;
        ctl.click(buttons::BACK, &ctl.options())?;
        Ok(())
    }

    fn reload_on_victory(&self) -> bool {
        !self.until_defeat
    }
}

const AFK_RESULTS: ResultScreen = ResultScreen {
    region: layout::BOTTOM_BUTTONS,
    templates: &[
        (buttons::RETRY, BattleOutcome::Defeat),
        (buttons::BATTLE, BattleOutcome::Victory),
        (buttons::TALENT_TRIALS, BattleOutcome::Victory),
        (buttons::NEXT, BattleOutcome::Victory),
    ],
    // The stage screen shows the battle button too, but no back button
    gate: Some((buttons::BACK, layout::BOTTOM_BUTTONS)),
};

/// AFK (or talent) stage pushing
#[derive(Debug, Clone)]
pub struct AfkStagesMode {
    talent: bool,
}

impl AfkStagesMode {
    pub fn new(talent: bool) -> Self {
        Self { talent }
    }
}

impl StagePushMode for AfkStagesMode {
    fn name(&self) -> &str {
        if self.talent {
            "talent_stages"
        } else {
            "afk_stages"
        }
    }

    fn open(&mut self, ctl: &mut Controller) -> crate::Result<bool> {
        let (bx, by) = points::BATTLE_TAB;
        ctl.tap_and_wait(bx, by, 3.0)?;
        let modes = ctl
            .options()
            .with_region(layout::BATTLE_MODES)
            .with_settle(4.0);
        ctl.click(buttons::AFK_STAGE, &modes)?;

        let (sx, sy) = if self.talent {
            log::info!("Opening Talent Stages");
            points::TALENT_STAGE
        } else {
            log::info!("Opening AFK Stages");
            points::AFK_STAGE
        };
        // First tap may collect loot or raise an "Are you sure?" popup
        ctl.tap_and_wait(sx, sy, 2.0)?;
        ctl.click(buttons::CONFIRM, &ctl.options().quiet())?;

        let records = ctl
            .options()
            .with_region(layout::BOTTOM_BUTTONS)
            .with_retries(20);
        ctl.is_visible(buttons::RECORDS, &records)
    }

    fn result_screen(&self) -> ResultScreen {
        AFK_RESULTS
    }

    fn start_battle(
        &mut self,
        ctl: &mut Controller,
        _state: &FormationState,
    ) -> crate::Result<BattleStart> {
        let battle = ctl
            .options()
            .with_region(layout::BOTTOM_BUTTONS)
            .with_retries(5)
            .with_settle(0.0);
        if !ctl.click(buttons::BATTLE, &battle)? {
            return Ok(BattleStart::Missed);
        }
        ctl.click(buttons::CONFIRM, &ctl.options().with_settle(0.0).quiet())?;
        // Keeps the stage screen's back button from reading as a result
        ctl.wait(5.0);
        Ok(BattleStart::Started)
    }

    fn on_victory(
        &mut self,
        ctl: &mut Controller,
        state: &mut FormationState,
        result: &Classified,
    ) -> crate::Result<()> {
        if result.template == Some(buttons::NEXT) {
            log::info!("First round won, moving to the second");
            state.set_first_stage_won(true);
        }
        acknowledge(ctl, result, 1.0)
    }

    fn on_defeat(
        &mut self,
        ctl: &mut Controller,
        _state: &FormationState,
        _transition: Transition,
        result: &Classified,
    ) -> crate::Result<()> {
        acknowledge(ctl, result, 1.0)
    }

    fn after_formation_load(
        &mut self,
        ctl: &mut Controller,
        state: &FormationState,
    ) -> crate::Result<()> {
        if state.first_stage_won() {
            // Round two is not selected automatically after a reload
            ctl.wait(1.0);
            let (x, y) = points::SECOND_ROUND;
            ctl.tap(x, y)?;
        }
        Ok(())
    }

    fn reload_on_victory(&self) -> bool {
        true
    }
}

const DAWNRISE_RESULTS: ResultScreen = ResultScreen {
    region: layout::BOTTOM_BUTTONS,
    templates: &[
        (buttons::RETRY, BattleOutcome::Defeat),
        (buttons::NEXT2, BattleOutcome::Victory),
        (buttons::RETRY2, BattleOutcome::Victory),
    ],
    gate: None,
};

const NIGHTMARE_RESULTS: ResultScreen = ResultScreen {
    region: Region::full(),
    templates: &[
        (buttons::RETRY, BattleOutcome::Defeat),
        (buttons::CONTINUE_GREEN, BattleOutcome::Victory),
    ],
    gate: None,
};

/// Row of the rate-up charm in Dura's Trials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharmRow {
    Top,
    Bottom,
}

impl CharmRow {
    fn region(self) -> Region {
        match self {
            CharmRow::Top => layout::TRIAL_CHARMS_TOP,
            CharmRow::Bottom => layout::TRIAL_CHARMS_BOTTOM,
        }
    }

    fn settle(self) -> f32 {
        match self {
            CharmRow::Top => 4.0,
            CharmRow::Bottom => 3.0,
        }
    }
}

/// Floor set of a charm trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialFloor {
    Dawnrise,
    Nightmare,
}

impl TrialFloor {
    fn point(self) -> (i32, i32) {
        match self {
            TrialFloor::Dawnrise => points::DAWNRISE,
            TrialFloor::Nightmare => points::NIGHTMARE,
        }
    }

    fn results(self) -> ResultScreen {
        match self {
            TrialFloor::Dawnrise => DAWNRISE_RESULTS,
            TrialFloor::Nightmare => NIGHTMARE_RESULTS,
        }
    }
}

/// Dura's Trials, one floor set of one rate-up charm row
#[derive(Debug, Clone)]
pub struct TrialMode {
    row: CharmRow,
    floor: TrialFloor,
    name: String,
    maxed: bool,
    cleared: bool,
}

impl TrialMode {
    pub fn new(row: CharmRow, floor: TrialFloor) -> Self {
        let name = format!("duras_trials_{:?}_{:?}", row, floor).to_lowercase();
        Self {
            row,
            floor,
            name,
            maxed: false,
            cleared: false,
        }
    }

    /// Back out to where the next floor set can be picked
    fn leave(&self, ctl: &mut Controller) -> crate::Result<()> {
        let back = ctl.options().with_settle(2.0).quiet();
        ctl.click(buttons::BACK, &back)?;
        if self.floor == TrialFloor::Nightmare {
            ctl.click(buttons::BACK2, &back)?;
        }
        Ok(())
    }
}

impl StagePushMode for TrialMode {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, ctl: &mut Controller) -> crate::Result<bool> {
        log::info!("Running Dura's Trials!");
        let (bx, by) = points::BATTLE_TAB;
        ctl.tap_and_wait(bx, by, 3.0)?;
        let modes = ctl
            .options()
            .with_region(layout::BATTLE_MODES)
            .with_retries(5)
            .with_settle(3.0);
        ctl.click(buttons::DURAS_TRIALS, &modes)?;

        let (px, py) = points::TRIAL_POPUP;
        ctl.tap_and_wait(px, py, 2.0)?;
        ctl.tap_and_wait(px, py, 2.0)?;

        let featured = ctl.options().with_region(layout::TOP_THIRD).with_retries(5);
        if !ctl.is_visible(buttons::FEATURED_HEROES, &featured)? {
            return Ok(false);
        }

        let rate_up = ctl
            .options()
            .grayscale()
            .with_confidence(0.75)
            .with_region(self.row.region())
            .with_settle(self.row.settle());
        if !ctl.click(buttons::RATE_UP, &rate_up)? {
            log::info!("{:?} row not found..", self.row);
            return Ok(false);
        }

        log::info!("Checking {:?}", self.floor);
        let (fx, fy) = self.floor.point();
        ctl.tap_and_wait(fx, fy, 7.0)?;
        self.maxed = false;

        if self.floor == TrialFloor::Dawnrise {
            let sweep = ctl
                .options()
                .with_region(layout::BOTTOM_THIRD)
                .with_retries(2)
                .quiet();
            if ctl.is_visible(buttons::SWEEP, &sweep)? {
                log::info!("Max Dawnrise floor reached!");
                self.maxed = true;
                return Ok(true);
            }
        }

        let battle = ctl
            .options()
            .with_region(layout::BOTTOM_THIRD)
            .with_settle(6.0)
            .quiet();
        if !ctl.click(buttons::BATTLE, &battle)? {
            log::info!("Max {:?} floor reached!", self.floor);
            self.maxed = true;
            if self.floor == TrialFloor::Nightmare {
                ctl.click(buttons::BACK2, &ctl.options().with_settle(2.0).quiet())?;
            }
        }
        Ok(true)
    }

    fn result_screen(&self) -> ResultScreen {
        self.floor.results()
    }

    fn is_terminal(
        &mut self,
        _ctl: &mut Controller,
        _state: &FormationState,
    ) -> crate::Result<Option<PushExit>> {
        Ok((self.maxed || self.cleared).then_some(PushExit::MaxProgressReached))
    }

    fn start_battle(
        &mut self,
        ctl: &mut Controller,
        _state: &FormationState,
    ) -> crate::Result<BattleStart> {
        let once = ctl.options().with_retries(1).with_settle(0.0).quiet();
        let clicked = ctl.click(buttons::BATTLE, &once)?;

        if ctl.is_visible(labels::MULTIPLE_ATTEMPTS, &ctl.options().with_retries(1).quiet())? {
            log::info!("Out of tries!");
            ctl.click(buttons::CONFIRM, &ctl.options())?;
            self.leave(ctl)?;
            return Ok(BattleStart::Exit(PushExit::OutOfAttempts));
        }
        if !clicked {
            return Ok(BattleStart::Missed);
        }

        ctl.click(buttons::CONFIRM, &once)?;
        Ok(BattleStart::Started)
    }

    fn on_victory(
        &mut self,
        ctl: &mut Controller,
        _state: &mut FormationState,
        result: &Classified,
    ) -> crate::Result<()> {
        match self.floor {
            TrialFloor::Dawnrise if result.template == Some(buttons::RETRY2) => {
                log::info!("Victory! Highest stage cleared!");
                self.cleared = true;
                ctl.click(buttons::BACK, &ctl.options().with_settle(2.0).quiet())?;
                Ok(())
            }
            TrialFloor::Dawnrise => acknowledge(ctl, result, 5.0),
            TrialFloor::Nightmare => {
                // Only the last floor shows the grey continue button
                let green = ctl
                    .options()
                    .with_confidence(0.95)
                    .with_retries(1)
                    .with_settle(5.0)
                    .quiet();
                if ctl.click(buttons::CONTINUE_GREEN, &green)? {
                    return Ok(());
                }
                log::info!("Victory! Highest stage cleared!");
                self.cleared = true;
                acknowledge(ctl, result, 5.0)?;
                self.leave(ctl)
            }
        }
    }

    fn on_defeat(
        &mut self,
        ctl: &mut Controller,
        _state: &FormationState,
        _transition: Transition,
        result: &Classified,
    ) -> crate::Result<()> {
        acknowledge(ctl, result, 4.0)
    }

    fn reload_on_victory(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::outcome::{ButtonClassifier, OutcomeClassifier};
    use crate::testing::{blank, paste, pattern, Advance, FakeRig};
    use crate::vision::Match;
    use image::RgbaImage;

    fn classified(template: &'static str, outcome: BattleOutcome) -> Classified {
        Classified {
            outcome,
            template: Some(template),
            matched: Some(Match {
                x: 100,
                y: 1700,
                width: 40,
                height: 20,
                confidence: 0.97,
            }),
        }
    }

    fn names(kind: PushModeKind) -> Vec<String> {
        kind.handlers().iter().map(|m| m.name().to_string()).collect()
    }

    #[test]
    fn test_mode_kind_from_json() {
        let tower: PushModeKind =
            serde_json::from_str(r#"{ "tower": { "faction": "light" } }"#).unwrap();
        assert_eq!(
            tower,
            PushModeKind::Tower {
                faction: Faction::Light
            }
        );
        assert_eq!(tower.name(), "light_tower");
        assert_eq!(names(tower), vec!["light_tower"]);

        let afk: PushModeKind = serde_json::from_str(r#"{ "afk_stages": {} }"#).unwrap();
        assert_eq!(afk, PushModeKind::AfkStages { talent: false });

        let trial: PushModeKind = serde_json::from_str(r#""trial""#).unwrap();
        assert_eq!(trial.name(), "duras_trials");
        assert_eq!(
            names(trial),
            vec![
                "duras_trials_top_dawnrise",
                "duras_trials_top_nightmare",
                "duras_trials_bottom_dawnrise",
                "duras_trials_bottom_nightmare",
            ]
        );

        let daily: PushModeKind = serde_json::from_str(r#""daily_towers""#).unwrap();
        assert_eq!(daily, PushModeKind::DailyTowers);
        assert_eq!(
            names(daily),
            vec!["light_tower", "wilder_tower", "graveborn_tower", "mauler_tower"]
        );
    }

    #[test]
    fn test_result_screens_priority() {
        assert_eq!(AFK_RESULTS.names()[0], buttons::RETRY);
        assert_eq!(
            AFK_RESULTS.outcome_of(buttons::TALENT_TRIALS),
            Some(BattleOutcome::Victory)
        );
        assert_eq!(
            DAWNRISE_RESULTS.outcome_of(buttons::RETRY2),
            Some(BattleOutcome::Victory)
        );
        assert_eq!(
            NIGHTMARE_RESULTS.outcome_of(buttons::CONTINUE_GREEN),
            Some(BattleOutcome::Victory)
        );
        assert_eq!(TOWER_RESULTS.outcome_of(buttons::RETRY), Some(BattleOutcome::Defeat));
    }

    /// Full-size frame with the stage's battle button, and the back button if `done`
    fn stage_screen(done: bool) -> FakeRig {
        let battle = pattern(48, 32, 411);
        let back = pattern(48, 32, 412);
        let mut frame = blank(1080, 1920);
        paste(&mut frame, &battle, 500, 1700);
        if done {
            paste(&mut frame, &back, 100, 1700);
        }
        FakeRig::new(vec![frame], Advance::OnCapture)
            .with_template(buttons::BATTLE, battle)
            .with_template(buttons::BACK, back)
            .with_template(buttons::RETRY, pattern(48, 32, 413))
            .with_template(buttons::TALENT_TRIALS, pattern(48, 32, 414))
            .with_template(buttons::NEXT, pattern(48, 32, 415))
    }

    #[test]
    fn test_afk_stage_screen_is_not_a_result() {
        let rig = stage_screen(false);
        let mut ctl = rig.controller();
        assert!(ButtonClassifier.classify(&mut ctl, &AFK_RESULTS).unwrap().is_none());

        let rig = stage_screen(true);
        let mut ctl = rig.controller();
        let result = ButtonClassifier
            .classify(&mut ctl, &AFK_RESULTS)
            .unwrap()
            .unwrap();
        assert_eq!(result.outcome, BattleOutcome::Victory);
        assert_eq!(result.template, Some(buttons::BATTLE));
    }

    #[test]
    fn test_afk_missing_battle_button() {
        let rig = FakeRig::new(vec![blank(20, 20)], Advance::OnCapture)
            .with_template(buttons::BATTLE, pattern(10, 10, 416));
        let mut ctl = rig.controller();
        let mut mode = AfkStagesMode::new(false);

        let start = mode.start_battle(&mut ctl, &FormationState::new(10)).unwrap();
        assert_eq!(start, BattleStart::Missed);
        assert!(rig.taps().is_empty());
    }

    #[test]
    fn test_afk_first_round_victory() {
        let rig = FakeRig::new(vec![blank(20, 20)], Advance::OnCapture);
        let mut ctl = rig.controller();
        let mut mode = AfkStagesMode::new(false);
        let mut state = FormationState::new(10);
        let next = classified(buttons::NEXT, BattleOutcome::Victory);

        mode.on_victory(&mut ctl, &mut state, &next).unwrap();
        assert!(state.first_stage_won());
        assert_eq!(rig.taps(), vec![(120, 1710)]);

        mode.after_formation_load(&mut ctl, &state).unwrap();
        assert_eq!(rig.taps().last(), Some(&points::SECOND_ROUND));
    }

    #[test]
    fn test_afk_stage_victory_keeps_round_one() {
        let rig = FakeRig::new(vec![blank(20, 20)], Advance::OnCapture);
        let mut ctl = rig.controller();
        let mut mode = AfkStagesMode::new(true);
        let mut state = FormationState::new(10);
        let battle = classified(buttons::BATTLE, BattleOutcome::Victory);

        mode.on_victory(&mut ctl, &mut state, &battle).unwrap();
        assert!(!state.first_stage_won());
        mode.after_formation_load(&mut ctl, &state).unwrap();
        assert_eq!(rig.taps(), vec![(120, 1710)]);
        assert_eq!(mode.name(), "talent_stages");
    }

    #[test]
    fn test_daily_tower_stops_at_first_defeat() {
        let back = pattern(10, 10, 417);
        let mut frame = blank(60, 60);
        paste(&mut frame, &back, 20, 20);
        let rig = FakeRig::new(vec![frame], Advance::OnCapture).with_template(buttons::BACK, back);
        let mut ctl = rig.controller();
        let mut mode = TowerMode::until_first_defeat(Faction::Wilder);
        let mut state = FormationState::new(10);
        assert!(!mode.reload_on_victory());

        let win = classified(buttons::NEXT, BattleOutcome::Victory);
        mode.on_victory(&mut ctl, &mut state, &win).unwrap();
        assert_eq!(mode.is_terminal(&mut ctl, &state).unwrap(), None);

        let transition = state.record_defeat();
        let retry = classified(buttons::RETRY, BattleOutcome::Defeat);
        mode.on_defeat(&mut ctl, &state, transition, &retry).unwrap();
        assert_eq!(
            mode.is_terminal(&mut ctl, &state).unwrap(),
            Some(PushExit::FirstDefeat)
        );
        // Next button, then back twice instead of retrying
        assert_eq!(rig.taps(), vec![(120, 1710), (25, 25), (25, 25)]);
    }

    #[test]
    fn test_tower_retries_after_defeat() {
        let rig = FakeRig::new(vec![blank(20, 20)], Advance::OnCapture);
        let mut ctl = rig.controller();
        let mut mode = TowerMode::new(Faction::Mauler);
        let mut state = FormationState::new(10);

        let transition = state.record_defeat();
        let retry = classified(buttons::RETRY, BattleOutcome::Defeat);
        mode.on_defeat(&mut ctl, &state, transition, &retry).unwrap();
        assert_eq!(mode.is_terminal(&mut ctl, &state).unwrap(), None);
        assert!(mode.reload_on_victory());
        assert_eq!(rig.taps(), vec![(120, 1710)]);
    }

    #[test]
    fn test_trial_out_of_attempts() {
        let battle = pattern(10, 10, 401);
        let popup = pattern(10, 10, 402);
        let confirm = pattern(10, 10, 403);
        let mut frame = blank(60, 60);
        paste(&mut frame, &battle, 0, 0);
        paste(&mut frame, &popup, 20, 20);
        paste(&mut frame, &confirm, 40, 40);
        let rig = FakeRig::new(vec![frame], Advance::OnCapture)
            .with_template(buttons::BATTLE, battle)
            .with_template(labels::MULTIPLE_ATTEMPTS, popup)
            .with_template(buttons::CONFIRM, confirm)
            .with_template(buttons::BACK, pattern(10, 10, 404));
        let mut ctl = rig.controller();
        let mut mode = TrialMode::new(CharmRow::Top, TrialFloor::Dawnrise);

        let start = mode.start_battle(&mut ctl, &FormationState::new(10)).unwrap();
        assert_eq!(start, BattleStart::Exit(PushExit::OutOfAttempts));
        assert_eq!(rig.taps(), vec![(5, 5), (45, 45)]);
    }

    #[test]
    fn test_trial_highest_stage_cleared() {
        let rig = FakeRig::new(vec![blank(20, 20)], Advance::OnCapture)
            .with_template(buttons::BACK, pattern(10, 10, 404))
            .with_template(buttons::SWEEP, pattern(10, 10, 405));
        let mut ctl = rig.controller();
        let mut mode = TrialMode::new(CharmRow::Bottom, TrialFloor::Dawnrise);
        let mut state = FormationState::new(10);
        let cleared = classified(buttons::RETRY2, BattleOutcome::Victory);

        assert_eq!(mode.is_terminal(&mut ctl, &state).unwrap(), None);
        mode.on_victory(&mut ctl, &mut state, &cleared).unwrap();
        assert_eq!(
            mode.is_terminal(&mut ctl, &state).unwrap(),
            Some(PushExit::MaxProgressReached)
        );
    }

    fn greyed(source: &RgbaImage) -> RgbaImage {
        image::DynamicImage::ImageLuma8(image::imageops::grayscale(source)).to_rgba8()
    }

    #[test]
    fn test_nightmare_victory_continues() {
        let green = pattern(20, 12, 418);
        let mut frame = blank(60, 60);
        paste(&mut frame, &green, 30, 40);
        let rig = FakeRig::new(vec![frame], Advance::OnCapture)
            .with_template(buttons::CONTINUE_GREEN, green);
        let mut ctl = rig.controller();
        let mut mode = TrialMode::new(CharmRow::Top, TrialFloor::Nightmare);
        let mut state = FormationState::new(10);
        let win = classified(buttons::CONTINUE_GREEN, BattleOutcome::Victory);

        mode.on_victory(&mut ctl, &mut state, &win).unwrap();
        assert_eq!(mode.is_terminal(&mut ctl, &state).unwrap(), None);
        assert_eq!(rig.taps(), vec![(40, 46)]);
        assert_eq!(mode.result_screen().outcome_of(buttons::RETRY), Some(BattleOutcome::Defeat));
    }

    #[test]
    fn test_nightmare_grey_continue_is_last_floor() {
        let green = pattern(20, 12, 418);
        let back = pattern(10, 10, 419);
        let back2 = pattern(10, 10, 420);
        let mut frame = blank(60, 60);
        paste(&mut frame, &greyed(&green), 30, 40);
        paste(&mut frame, &back, 0, 0);
        paste(&mut frame, &back2, 15, 0);
        let rig = FakeRig::new(vec![frame], Advance::OnCapture)
            .with_template(buttons::CONTINUE_GREEN, green)
            .with_template(buttons::BACK, back)
            .with_template(buttons::BACK2, back2);
        let mut ctl = rig.controller();
        let mut mode = TrialMode::new(CharmRow::Bottom, TrialFloor::Nightmare);
        let mut state = FormationState::new(10);
        let win = classified(buttons::CONTINUE_GREEN, BattleOutcome::Victory);

        mode.on_victory(&mut ctl, &mut state, &win).unwrap();
        assert_eq!(
            mode.is_terminal(&mut ctl, &state).unwrap(),
            Some(PushExit::MaxProgressReached)
        );
        assert_eq!(rig.taps(), vec![(120, 1710), (5, 5), (20, 5)]);
    }
}
