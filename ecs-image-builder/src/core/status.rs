//! Step action and status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a step tells the runner after `run` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Proceed to the next step.
    Continue,
    /// Stop forward progress and roll back.
    Halt,
    /// Cancellation was observed; stop and roll back.
    Cancelled,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Halt => write!(f, "halt"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StepAction {
    /// Returns true if the runner should keep going.
    #[must_use]
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// The execution status of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not been reached.
    NotStarted,
    /// Step is currently running.
    Running,
    /// Step returned `Continue`.
    Succeeded,
    /// Step halted or panicked.
    Failed,
    /// Step observed cancellation.
    Cancelled,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StepStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if `run` was invoked for the step.
    #[must_use]
    pub fn was_started(&self) -> bool {
        !matches!(self, Self::NotStarted)
    }

    /// Maps a step action to the terminal status it produces.
    #[must_use]
    pub fn from_action(action: StepAction) -> Self {
        match action {
            StepAction::Continue => Self::Succeeded,
            StepAction::Halt => Self::Failed,
            StepAction::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_action_display() {
        assert_eq!(StepAction::Continue.to_string(), "continue");
        assert_eq!(StepAction::Halt.to_string(), "halt");
        assert_eq!(StepAction::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_step_status_is_terminal() {
        assert!(StepStatus::Succeeded.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Cancelled.is_terminal());
        assert!(!StepStatus::NotStarted.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }

    #[test]
    fn test_step_status_from_action() {
        assert_eq!(StepStatus::from_action(StepAction::Continue), StepStatus::Succeeded);
        assert_eq!(StepStatus::from_action(StepAction::Halt), StepStatus::Failed);
        assert_eq!(StepStatus::from_action(StepAction::Cancelled), StepStatus::Cancelled);
    }

    #[test]
    fn test_step_status_serialize() {
        let json = serde_json::to_string(&StepStatus::NotStarted).unwrap();
        assert_eq!(json, r#""not_started""#);

        let deserialized: StepStatus = serde_json::from_str(r#""cancelled""#).unwrap();
        assert_eq!(deserialized, StepStatus::Cancelled);
    }
}
