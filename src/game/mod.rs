//! Game logic module
//!
//! The recovery protocol, formation rotation and the stage-push state
//! machine, plus the reference screen layout they navigate.

pub mod formation;
pub mod layout;
pub mod modes;
pub mod outcome;
pub mod push;
pub mod recovery;
pub mod state;

pub use formation::{FormationLoader, FormationState, Transition};
pub use modes::{CharmRow, Faction, PushModeKind, TrialFloor};
pub use outcome::{BattleOutcome, Classified, OutcomeClassifier, OutcomeLayout, ResultScreen};
pub use push::{run_sequence, BattleStart, PushExit, PushReport, StagePush, StagePushMode};
pub use recovery::{Recovery, TaskError};
pub use state::{CheckpointPhase, ScreenState, TaskCheckpoint};
