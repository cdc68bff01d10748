//! Lifecycle status of a supervised process

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

/// Status of a [`crate::ProcessController`]
///
/// The textual forms (`UP`, `RUNNING`, `DOWN`, `NOT-RUNNING`) are what
/// collectors and serialized definitions see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Launch accepted, OS process not yet confirmed started
    #[serde(rename = "UP")]
    Up,
    /// OS process started and its PID is known
    #[serde(rename = "RUNNING")]
    Running,
    /// Termination requested, process not yet exited
    #[serde(rename = "DOWN")]
    Down,
    /// Idle: never started, or the last run completed
    #[default]
    #[serde(rename = "NOT-RUNNING")]
    NotRunning,
}

impl Status {
    /// Textual form of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "UP",
            Status::Running => "RUNNING",
            Status::Down => "DOWN",
            Status::NotRunning => "NOT-RUNNING",
        }
    }

    /// Whether a run is in flight (anything but `NotRunning`)
    pub fn is_active(&self) -> bool {
        !matches!(self, Status::NotRunning)
    }

    /// Whether the controller may move from `self` to `next`
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::NotRunning, Status::Up)
                | (Status::Up, Status::Running)
                | (Status::Up, Status::NotRunning)
                | (Status::Up, Status::Down)
                | (Status::Running, Status::NotRunning)
                | (Status::Running, Status::Down)
                | (Status::Down, Status::NotRunning)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(Status::Up),
            "RUNNING" => Ok(Status::Running),
            "DOWN" => Ok(Status::Down),
            "NOT-RUNNING" => Ok(Status::NotRunning),
            other => Err(ProcessError::InvalidState(other.to_string())),
        }
    }
}
