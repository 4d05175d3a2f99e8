//! Reference screen layout
//!
//! Regions, template names and fixed tap points, all in the 1080x1920
//! portrait reference space.

use crate::vision::Region;

/// Main map indicator marking the anchor screen
pub const ANCHOR: &str = "labels/sunandstars";
/// Where the anchor indicator sits
pub const ANCHOR_REGION: Region = Region::new(770, 40, 100, 100);
/// Back buttons tried during recovery, in order
pub const DISMISS: [&str; 2] = ["buttons/back", "buttons/back2"];
/// Spot that closes popups without hitting anything
pub const NEUTRAL: (i32, i32) = (420, 50);

pub const TOP_THIRD: Region = Region::new(0, 0, 1080, 640);
pub const BOTTOM_THIRD: Region = Region::new(0, 1280, 1080, 640);
pub const BOTTOM_BUTTONS: Region = Region::new(0, 1620, 1080, 300);
pub const BATTLE_MODES: Region = Region::new(20, 580, 1050, 1100);
/// Tower floor list
pub const TOWER_FLOORS: Region = Region::new(15, 850, 1050, 800);
/// Rate-up charm in the top row of the trials
pub const TRIAL_CHARMS_TOP: Region = Region::new(50, 1175, 950, 150);
/// Rate-up charm in the bottom row of the trials
pub const TRIAL_CHARMS_BOTTOM: Region = Region::new(50, 1400, 950, 150);

pub mod buttons {
    pub const BACK: &str = "buttons/back";
    pub const BACK2: &str = "buttons/back2";
    pub const BATTLE: &str = "buttons/battle";
    pub const CONFIRM: &str = "buttons/confirm";
    pub const RECORDS: &str = "buttons/records";
    pub const COPY: &str = "buttons/copy";
    pub const NEXT: &str = "buttons/next";
    pub const NEXT2: &str = "buttons/next2";
    pub const RETRY: &str = "buttons/retry";
    pub const RETRY2: &str = "buttons/retry2";
    pub const TALENT_TRIALS: &str = "buttons/talent_trials";
    pub const AFK_STAGE: &str = "buttons/afk_stage";
    pub const DURAS_TRIALS: &str = "buttons/duras_trials";
    pub const FEATURED_HEROES: &str = "buttons/featured_heroes";
    pub const RATE_UP: &str = "buttons/rate_up";
    pub const SWEEP: &str = "buttons/sweep";
    pub const CONTINUE_GREEN: &str = "buttons/continue_green";
}

pub mod labels {
    pub const LEGEND_TRIAL: &str = "labels/legend_trial";
    pub const NOT_OWNED: &str = "labels/not_owned";
    pub const MULTIPLE_ATTEMPTS: &str = "labels/multiple_attempts";
}

/// Fixed tap points
pub mod points {
    /// Battle modes tab on the bottom bar
    pub const BATTLE_TAB: (i32, i32) = (450, 1825);
    /// Legend trial entry on the bottom bar
    pub const TRIALS_TAB: (i32, i32) = (460, 1820);
    /// AFK stage entry on the stage picker
    pub const AFK_STAGE: (i32, i32) = (715, 1600);
    /// Talent stage entry on the stage picker
    pub const TALENT_STAGE: (i32, i32) = (370, 1600);
    /// Second round selector once the first round is won
    pub const SECOND_ROUND: (i32, i32) = (550, 1100);
    /// Next page in the formation records
    pub const NEXT_FORMATION: (i32, i32) = (1000, 1025);
    /// Closes the "not owned" popup
    pub const CLOSE_NOT_OWNED: (i32, i32) = (360, 1250);
    /// Clears the trials intro popups
    pub const TRIAL_POPUP: (i32, i32) = (550, 1800);
    /// Dawnrise floor of a charm trial
    pub const DAWNRISE: (i32, i32) = (400, 1800);
    /// Nightmare floor of a charm trial
    pub const NIGHTMARE: (i32, i32) = (830, 1800);
}
