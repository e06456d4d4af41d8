//! Verification of a candidate working tree: syntax, then lint, then tests.
//!
//! Stages run in order and the first failing stage decides the report; later
//! stages are skipped because their output would only repeat the earlier
//! fault. A stage that cannot run at all (missing interpreter, timeout) is a
//! tooling fault, which the revision loop does not retry.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::types::{FailureKind, RevisionFeedback};
use crate::io::config::VerifyConfig;
use crate::io::process::run_tool;

/// Outcome of verifying one candidate tree.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub ok: bool,
    pub kind: Option<FailureKind>,
    pub feedback: RevisionFeedback,
}

impl VerifyReport {
    fn pass() -> Self {
        Self { ok: true, kind: None, feedback: RevisionFeedback::default() }
    }

    fn fail(kind: FailureKind, feedback: RevisionFeedback) -> Self {
        Self { ok: false, kind: Some(kind), feedback }
    }
}

/// Port for candidate verification. The engine only sees reports.
pub trait Verifier {
    fn verify(&self, tree: &Path) -> Result<VerifyReport>;
}

/// Runs the configured commands inside the candidate tree.
pub struct CommandVerifier {
    config: VerifyConfig,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandVerifier {
    pub fn new(config: VerifyConfig, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self { config, timeout, output_limit_bytes }
    }

    fn run_stage(&self, tree: &Path, argv: &[String]) -> Result<StageOutcome> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(StageOutcome::Tooling("empty verify command".to_string()));
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(tree);
        let output = match run_tool(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(program = %program, error = %err, "verify stage failed to run");
                return Ok(StageOutcome::Tooling(format!("{program}: {err:#}")));
            }
        };
        if output.timed_out {
            return Ok(StageOutcome::Tooling(format!(
                "{program} timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if output.status.success() {
            Ok(StageOutcome::Pass)
        } else {
            Ok(StageOutcome::Fail(output.combined_text()))
        }
    }
}

enum StageOutcome {
    Pass,
    Fail(String),
    Tooling(String),
}

impl Verifier for CommandVerifier {
    fn verify(&self, tree: &Path) -> Result<VerifyReport> {
        let stages: [(&str, &[String], FailureKind); 3] = [
            ("syntax", &self.config.syntax_command, FailureKind::Syntax),
            ("lint", &self.config.lint_command, FailureKind::Lint),
            ("test", &self.config.test_command, FailureKind::Test),
        ];
        for (name, argv, kind) in stages {
            debug!(stage = name, tree = %tree.display(), "running verify stage");
            match self.run_stage(tree, argv)? {
                StageOutcome::Pass => {}
                StageOutcome::Fail(text) => {
                    let feedback = match kind {
                        FailureKind::Syntax => RevisionFeedback {
                            syntax_error: Some(text),
                            ..Default::default()
                        },
                        FailureKind::Lint => RevisionFeedback {
                            lint_output: Some(text),
                            ..Default::default()
                        },
                        _ => RevisionFeedback { test_output: Some(text), ..Default::default() },
                    };
                    return Ok(VerifyReport::fail(kind, feedback));
                }
                StageOutcome::Tooling(detail) => {
                    return Ok(VerifyReport::fail(
                        FailureKind::Tooling,
                        RevisionFeedback {
                            tooling_error: Some(detail),
                            ..Default::default()
                        },
                    ));
                }
            }
        }
        Ok(VerifyReport::pass())
    }
}
