//! Shared types for the waypoint execution core.
//!
//! These types define stable contracts between components and are persisted
//! as part of project state. They must stay free of I/O concerns.

use serde::{Deserialize, Serialize};

/// Which kind of generation step a waypoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerRole {
    Planner,
    CodeGen,
    TestWriter,
}

impl ProducerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ProducerRole::Planner => "Planner",
            ProducerRole::CodeGen => "CodeGen",
            ProducerRole::TestWriter => "TestWriter",
        }
    }
}

/// Waypoint lifecycle status. Exactly one value at any time; all values other
/// than `Pending` and `Running` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaypointStatus {
    Pending,
    Running,
    Success,
    FailedCode,
    FailedTests,
    FailedLint,
    FailedTooling,
    FailedRevisions,
    FailedLlmOutput,
    Aborted,
}

impl WaypointStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WaypointStatus::Pending | WaypointStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WaypointStatus::Pending => "PENDING",
            WaypointStatus::Running => "RUNNING",
            WaypointStatus::Success => "SUCCESS",
            WaypointStatus::FailedCode => "FAILED_CODE",
            WaypointStatus::FailedTests => "FAILED_TESTS",
            WaypointStatus::FailedLint => "FAILED_LINT",
            WaypointStatus::FailedTooling => "FAILED_TOOLING",
            WaypointStatus::FailedRevisions => "FAILED_REVISIONS",
            WaypointStatus::FailedLlmOutput => "FAILED_LLM_OUTPUT",
            WaypointStatus::Aborted => "ABORTED",
        }
    }
}

/// Structured feedback from one failed verification attempt.
///
/// All fields optional; absence of all four represents an unknown failure.
/// `tooling_error` records a toolchain fault (the verifier itself could not
/// run) and never feeds a revision prompt; the other three carry generated
/// code faults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionFeedback {
    pub test_output: Option<String>,
    pub lint_output: Option<String>,
    pub syntax_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooling_error: Option<String>,
}

impl RevisionFeedback {
    pub fn is_empty(&self) -> bool {
        self.test_output.is_none()
            && self.lint_output.is_none()
            && self.syntax_error.is_none()
            && self.tooling_error.is_none()
    }
}

/// How a failed verification is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Syntax,
    Lint,
    Test,
    /// The verification tooling itself could not run. Terminal for the
    /// waypoint; retrying generation cannot fix a broken toolchain.
    Tooling,
}

/// One atomic, independently verifiable unit of generated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Stable identifier assigned at planning time (e.g. `wp_001`).
    pub id: String,
    /// Human-readable task description from the planner.
    pub description: String,
    pub role: ProducerRole,
    pub status: WaypointStatus,
    /// Number of revision turns taken, bounded by `max_revisions`.
    pub revision_attempts: u32,
    /// Cost accrued by this waypoint's calls, in USD.
    pub cost_usd: f64,
    /// Append-only record of failed verification attempts. Never pruned;
    /// only the most recent entry feeds the next revision prompt.
    pub feedback_history: Vec<RevisionFeedback>,
    /// Relative paths written by this waypoint once accepted.
    pub output_files: Vec<String>,
}

impl Waypoint {
    pub fn new(id: impl Into<String>, description: impl Into<String>, role: ProducerRole) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            role,
            status: WaypointStatus::Pending,
            revision_attempts: 0,
            cost_usd: 0.0,
            feedback_history: Vec::new(),
            output_files: Vec::new(),
        }
    }

    /// Most recent verification feedback, if any attempt has failed.
    pub fn latest_feedback(&self) -> Option<&RevisionFeedback> {
        self.feedback_history.last()
    }
}
