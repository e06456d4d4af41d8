//! Waypoint execution engine.
//!
//! Drives each waypoint from `PENDING` to a terminal status through the
//! revision loop: generate, verify, feed failures back, bounded by
//! `max_revisions`. The engine owns every state transition and persists the
//! project file around each one, so a crash or shutdown resumes at the
//! correct step. Providers, verification, and user consent are ports; the
//! engine only sees their contracts.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::budget::{Allowance, BudgetLedger};
use crate::core::types::{FailureKind, ProducerRole, Waypoint, WaypointStatus};
use crate::io::config::AppConfig;
use crate::io::state::{ProjectState, StateStore};
use crate::io::workspace::{self, ProjectPaths};
use crate::llm::{LlmRequest, Message, Provider, invoke_with_retry};
use crate::producer::{ProducerOutput, Prompts, parse_plan, parse_producer_output};
use crate::verify::Verifier;

/// User-facing decision points. The CLI implements this over stdin; tests
/// script it.
pub trait Consent {
    /// Show the proposed plan and ask whether to proceed.
    fn confirm_plan(&mut self, waypoints: &[Waypoint]) -> bool;

    /// Ask whether to exceed the budget cap for one call.
    fn approve_overrun(&mut self, warning: &str) -> bool;
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every waypoint finished `SUCCESS`.
    Completed,
    /// A waypoint reached a non-success terminal status; later waypoints
    /// were not attempted.
    Halted { waypoint_id: String, status: WaypointStatus },
    /// A shutdown signal arrived; state was persisted and the run can be
    /// resumed.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Planned(usize),
    Declined,
}

enum TurnStep {
    Output(ProducerOutput),
    BudgetDeclined,
    StructuralFailure,
}

pub struct Engine<'a> {
    provider: &'a dyn Provider,
    verifier: &'a dyn Verifier,
    consent: &'a mut dyn Consent,
    config: &'a AppConfig,
    paths: ProjectPaths,
    store: StateStore,
    prompts: Prompts,
    shutdown: Arc<AtomicBool>,
}

impl<'a> Engine<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        verifier: &'a dyn Verifier,
        consent: &'a mut dyn Consent,
        config: &'a AppConfig,
        project_dir: &Path,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            verifier,
            consent,
            config,
            paths: ProjectPaths::new(project_dir),
            store: StateStore::new(project_dir),
            prompts: Prompts::new()?,
            shutdown,
        })
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Ask the planner to decompose the initial prompt into waypoints,
    /// confirm the plan with the user, and append it to the project state.
    pub fn plan(
        &mut self,
        state: &mut ProjectState,
        ledger: &mut BudgetLedger,
    ) -> Result<PlanOutcome> {
        let prompt = self.prompts.render_planner(&state.initial_prompt)?;
        let request = self.build_request(state, ProducerRole::Planner, prompt);

        if !self.clear_budget(ledger, state, &request)? {
            return Ok(PlanOutcome::Declined);
        }
        let response = invoke_with_retry(self.provider, &request)?;
        self.commit_cost(ledger, state, &response, None)?;
        let raw = response
            .content
            .as_deref()
            .context("planner returned an empty response")?;
        let waypoints = parse_plan(raw)
            .map_err(|err| anyhow::anyhow!("planner output could not be parsed: {err}"))?;

        if !self.consent.confirm_plan(&waypoints) {
            info!("plan declined");
            return Ok(PlanOutcome::Declined);
        }
        let count = waypoints.len();
        state.waypoints.extend(waypoints);
        self.store.save(state)?;
        info!(waypoints = count, "plan accepted");
        Ok(PlanOutcome::Planned(count))
    }

    /// Execute waypoints in order from the resume cursor. Waypoints already
    /// `SUCCESS` are skipped; the first non-success terminal status halts
    /// the run.
    pub fn run(
        &mut self,
        state: &mut ProjectState,
        ledger: &mut BudgetLedger,
    ) -> Result<RunOutcome> {
        while state.current_waypoint_index < state.waypoints.len() {
            let index = state.current_waypoint_index;
            if state.waypoints[index].status == WaypointStatus::Success {
                state.current_waypoint_index += 1;
                self.store.save(state)?;
                continue;
            }
            if self.shutting_down() {
                self.store.save(state)?;
                return Ok(RunOutcome::Interrupted);
            }

            let status = match self.execute_waypoint(state, index, ledger)? {
                Some(status) => status,
                None => {
                    self.store.save(state)?;
                    return Ok(RunOutcome::Interrupted);
                }
            };

            // The cursor advances only past successes; a halted run keeps it
            // on the failed waypoint so resume re-attempts it instead of
            // executing later waypoints behind a hard failure.
            if status != WaypointStatus::Success {
                let waypoint_id = state.waypoints[index].id.clone();
                warn!(waypoint = %waypoint_id, status = status.as_str(), "run halted");
                return Ok(RunOutcome::Halted { waypoint_id, status });
            }
            state.current_waypoint_index += 1;
            self.store.save(state)?;
        }
        info!("all waypoints complete");
        Ok(RunOutcome::Completed)
    }

    /// Drive one waypoint to a terminal status. Returns `None` when a
    /// shutdown signal stops the turn before completion; the waypoint is
    /// left `PENDING` for resume.
    fn execute_waypoint(
        &mut self,
        state: &mut ProjectState,
        index: usize,
        ledger: &mut BudgetLedger,
    ) -> Result<Option<WaypointStatus>> {
        let id = state.waypoints[index].id.clone();
        info!(waypoint = %id, "starting waypoint");
        state.waypoints[index].status = WaypointStatus::Running;
        self.store.save(state)?;
        let scratch = workspace::create_scratch(&self.paths, &id)?;
        // Every file written across the waypoint's turns; earlier revisions'
        // files stay in the scratch tree and land in the merge too.
        let mut written_files = std::collections::BTreeSet::new();

        loop {
            if self.shutting_down() {
                state.waypoints[index].status = WaypointStatus::Pending;
                self.store.save(state)?;
                return Ok(None);
            }

            let output = match self.generation_turn(state, index, ledger)? {
                TurnStep::Output(output) => output,
                TurnStep::BudgetDeclined => {
                    return self
                        .finalize(state, index, WaypointStatus::Aborted, &id)
                        .map(Some);
                }
                TurnStep::StructuralFailure => {
                    return self
                        .finalize(state, index, WaypointStatus::FailedLlmOutput, &id)
                        .map(Some);
                }
            };

            for (path, contents) in &output.files {
                workspace::write_candidate_file(&scratch, path, contents)?;
                written_files.insert(path.clone());
            }
            workspace::merge_requirements(&scratch, &output.declared_dependencies)?;

            let report = self.verifier.verify(&scratch)?;
            if report.ok {
                workspace::merge_scratch(&self.paths, &scratch)?;
                state.waypoints[index].output_files = written_files.into_iter().collect();
                workspace::remove_scratch(&self.paths, &id)?;
                return self
                    .finalize(state, index, WaypointStatus::Success, &id)
                    .map(Some);
            }

            let kind = report.kind.unwrap_or(FailureKind::Tooling);
            state.waypoints[index].feedback_history.push(report.feedback);
            state.waypoints[index].status = failure_status(kind);
            self.store.save(state)?;

            if kind == FailureKind::Tooling {
                return self.finalize_failed(state, index, &id).map(Some);
            }
            if state.waypoints[index].revision_attempts < self.config.max_revisions {
                state.waypoints[index].revision_attempts += 1;
                state.waypoints[index].status = WaypointStatus::Running;
                self.store.save(state)?;
                info!(
                    waypoint = %id,
                    attempt = state.waypoints[index].revision_attempts,
                    kind = ?kind,
                    "verification failed, revising"
                );
            } else {
                return self
                    .finalize(state, index, WaypointStatus::FailedRevisions, &id)
                    .map(Some);
            }
        }
    }

    /// One generation call, including the budget gate and the one-shot
    /// structural repair.
    fn generation_turn(
        &mut self,
        state: &mut ProjectState,
        index: usize,
        ledger: &mut BudgetLedger,
    ) -> Result<TurnStep> {
        let waypoint = &state.waypoints[index];
        let role = waypoint.role;
        let prompt = self.prompts.render_generation(
            role,
            &waypoint.description,
            &accepted_tree_summary(&self.paths)?,
            waypoint.latest_feedback(),
        )?;
        let request = self.build_request(state, role, prompt);

        if !self.clear_budget(ledger, state, &request)? {
            return Ok(TurnStep::BudgetDeclined);
        }
        let response = invoke_with_retry(self.provider, &request)?;
        self.commit_cost(ledger, state, &response, Some(index))?;

        let raw = response.content.unwrap_or_default();
        match parse_producer_output(&raw) {
            Ok(output) => return Ok(TurnStep::Output(output)),
            Err(err) => {
                warn!(waypoint = %state.waypoints[index].id, error = %err, "structurally invalid payload, attempting repair");
            }
        }

        // One repair attempt: echo the invalid payload back and ask for a
        // corrected structure. Not counted against the revision budget.
        let repair_prompt = self.prompts.render_repair(&raw)?;
        let repair_request = self.build_request(state, role, repair_prompt);
        if !self.clear_budget(ledger, state, &repair_request)? {
            return Ok(TurnStep::BudgetDeclined);
        }
        let response = invoke_with_retry(self.provider, &repair_request)?;
        self.commit_cost(ledger, state, &response, Some(index))?;

        match parse_producer_output(&response.content.unwrap_or_default()) {
            Ok(output) => Ok(TurnStep::Output(output)),
            Err(err) => {
                warn!(waypoint = %state.waypoints[index].id, error = %err, "repair attempt also malformed");
                Ok(TurnStep::StructuralFailure)
            }
        }
    }

    fn build_request(&self, state: &ProjectState, role: ProducerRole, prompt: String) -> LlmRequest {
        let system = match role {
            ProducerRole::Planner => "You are an expert software architect.",
            ProducerRole::CodeGen => "You are an expert Python developer.",
            ProducerRole::TestWriter => "You are an expert Python test engineer.",
        };
        LlmRequest {
            model: state.model.clone(),
            messages: vec![Message::system(system), Message::user(prompt)],
            temperature: f64::from(self.config.temperature_for(role)),
            max_tokens: self.config.max_tokens_for(role),
        }
    }

    /// Pre-call budget gate. Returns false when the call would exceed the
    /// cap and the user declines the override.
    fn clear_budget(
        &mut self,
        ledger: &BudgetLedger,
        state: &ProjectState,
        request: &LlmRequest,
    ) -> Result<bool> {
        let prompt_text: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        let estimate = self.provider.estimate_tokens(&prompt_text);
        let allowance =
            ledger.check(&state.model, clamp_u32(estimate.tokens), request.max_tokens)?;
        match allowance {
            Allowance::Within => Ok(true),
            Allowance::WouldExceed { .. } => {
                let warning = ledger
                    .overrun_warning(allowance, request.max_tokens)
                    .unwrap_or_default();
                if self.consent.approve_overrun(&warning) {
                    info!("budget override approved");
                    Ok(true)
                } else {
                    warn!("budget override declined");
                    Ok(false)
                }
            }
        }
    }

    /// Commit actual call cost to the ledger and mirror it into project
    /// state, attributing it to a waypoint when one is running.
    fn commit_cost(
        &mut self,
        ledger: &mut BudgetLedger,
        state: &mut ProjectState,
        response: &crate::llm::LlmResponse,
        waypoint_index: Option<usize>,
    ) -> Result<()> {
        let cost = ledger.record(
            &state.model,
            clamp_u32(response.prompt_tokens),
            clamp_u32(response.completion_tokens),
        )?;
        state.current_spent_usd = ledger.spent();
        if let Some(index) = waypoint_index {
            state.waypoints[index].cost_usd += cost;
        }
        self.store.save(state)?;
        Ok(())
    }

    fn finalize(
        &mut self,
        state: &mut ProjectState,
        index: usize,
        status: WaypointStatus,
        id: &str,
    ) -> Result<WaypointStatus> {
        state.waypoints[index].status = status;
        self.store.save(state)?;
        if status != WaypointStatus::Success {
            self.cleanup_scratch(id)?;
        }
        info!(waypoint = %id, status = status.as_str(), "waypoint finished");
        Ok(status)
    }

    /// Terminal path where the failure status is already set on the
    /// waypoint (tooling faults keep their `FAILED_TOOLING` status).
    fn finalize_failed(
        &mut self,
        state: &mut ProjectState,
        index: usize,
        id: &str,
    ) -> Result<WaypointStatus> {
        let status = state.waypoints[index].status;
        self.cleanup_scratch(id)?;
        info!(waypoint = %id, status = status.as_str(), "waypoint finished");
        Ok(status)
    }

    fn cleanup_scratch(&self, id: &str) -> Result<()> {
        if self.config.keep_failed_waypoints {
            return Ok(());
        }
        workspace::remove_scratch(&self.paths, id)
    }
}

fn failure_status(kind: FailureKind) -> WaypointStatus {
    match kind {
        FailureKind::Syntax => WaypointStatus::FailedCode,
        FailureKind::Lint => WaypointStatus::FailedLint,
        FailureKind::Test => WaypointStatus::FailedTests,
        FailureKind::Tooling => WaypointStatus::FailedTooling,
    }
}

fn clamp_u32(value: u64) -> u32 {
    value.try_into().unwrap_or(u32::MAX)
}

/// Short description of the accepted tree handed to generation prompts: the
/// file listing plus current requirements.
fn accepted_tree_summary(paths: &ProjectPaths) -> Result<String> {
    let mut files = Vec::new();
    collect_files(&paths.src_dir, &paths.root, &mut files)?;
    files.sort();
    let mut summary = String::from("Project files:\n");
    if files.is_empty() {
        summary.push_str("(empty project)\n");
    }
    for file in files {
        summary.push_str("- ");
        summary.push_str(&file);
        summary.push('\n');
    }
    let requirements = paths.src_dir.join("requirements.txt");
    if let Ok(contents) = std::fs::read_to_string(&requirements) {
        if !contents.trim().is_empty() {
            summary.push_str("\nDeclared dependencies:\n");
            summary.push_str(contents.trim());
            summary.push('\n');
        }
    }
    Ok(summary)
}

fn collect_files(dir: &Path, root: &Path, out: &mut Vec<String>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, root, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}
