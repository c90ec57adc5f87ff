use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The terminal artifact of a task: what to run, why, and whether to ask first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPlan {
    pub commands: Vec<String>,
    pub explanation: String,
    pub warnings: Vec<String>,
    pub requires_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub reason: String,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            safe: true,
            reason: String::new(),
        }
    }

    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: reason.into(),
        }
    }
}

/// Result of running one command. `exit_code` is `None` when the process was
/// killed by a signal or could not be waited on after a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// How a command plan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    DryRun,
    Rejected { command: String, reason: String },
    Cancelled,
    Executed(Vec<ExecutionOutcome>),
}

/// How a whole task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Plan { plan: CommandPlan, outcome: PlanOutcome },
    Answered(String),
    Incomplete { iterations: usize },
    TransportFailed(String),
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub task: String,
    pub commands: Vec<String>,
    pub executed: bool,
    pub succeeded: bool,
    pub timestamp: i64,
}
