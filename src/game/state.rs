//! Screen and checkpoint state
//!
//! The recovery protocol only distinguishes two screen states: on the
//! anchor screen, or somewhere else.

use serde::{Deserialize, Serialize};

/// Where the game is relative to the anchor screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenState {
    /// Main map, the known-good screen
    AtAnchor,
    /// Anywhere else
    Lost,
}

impl ScreenState {
    /// Check if this is the anchor screen
    pub fn is_anchored(&self) -> bool {
        matches!(self, ScreenState::AtAnchor)
    }
}

impl From<bool> for ScreenState {
    fn from(anchored: bool) -> Self {
        if anchored {
            ScreenState::AtAnchor
        } else {
            ScreenState::Lost
        }
    }
}

/// Which side of a task a checkpoint brackets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointPhase {
    Open,
    Close,
}

/// A task name plus the bracket side being checked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    pub task: String,
    pub phase: CheckpointPhase,
}

impl TaskCheckpoint {
    /// Checkpoint at the start of `task`
    pub fn open(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            phase: CheckpointPhase::Open,
        }
    }

    /// Checkpoint at the end of `task`
    pub fn close(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            phase: CheckpointPhase::Close,
        }
    }
}
