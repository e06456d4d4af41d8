//! Test-only fakes for the engine's ports: a scripted provider, a scripted
//! verifier, and a scripted consent source. All are single-threaded and
//! pop pre-loaded outcomes in order.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;

use crate::core::types::{FailureKind, RevisionFeedback, Waypoint};
use crate::engine::Consent;
use crate::llm::{CallError, LlmRequest, LlmResponse, Provider, ProviderKind};
use crate::verify::{Verifier, VerifyReport};

/// One scripted provider outcome.
pub enum ScriptedCall {
    Respond(String),
    Fail(CallError),
}

/// Provider returning pre-loaded outcomes in order. Panics when invoked
/// more times than scripted, which turns an unexpected extra call into a
/// test failure. Every request is recorded for assertions.
pub struct ScriptedProvider {
    calls: RefCell<VecDeque<ScriptedCall>>,
    requests: RefCell<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    pub fn new(calls: Vec<ScriptedCall>) -> Self {
        Self {
            calls: RefCell::new(calls.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn request(&self, index: usize) -> LlmRequest {
        self.requests.borrow()[index].clone()
    }
}

impl Provider for ScriptedProvider {
    fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, CallError> {
        self.requests.borrow_mut().push(request.clone());
        let call = self
            .calls
            .borrow_mut()
            .pop_front()
            .expect("scripted provider invoked more times than scripted");
        match call {
            ScriptedCall::Respond(content) => Ok(LlmResponse {
                content: Some(content),
                prompt_tokens: 100,
                completion_tokens: 50,
                tokens_exact: true,
            }),
            ScriptedCall::Fail(err) => Err(err),
        }
    }

    fn validate_credentials(&self) -> bool {
        true
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}

/// Verifier returning pre-loaded reports in order; passes once the script
/// is exhausted.
#[derive(Default)]
pub struct ScriptedVerifier {
    reports: RefCell<VecDeque<VerifyReport>>,
}

impl ScriptedVerifier {
    pub fn new(reports: Vec<VerifyReport>) -> Self {
        Self {
            reports: RefCell::new(reports.into()),
        }
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, _tree: &Path) -> anyhow::Result<VerifyReport> {
        Ok(self.reports.borrow_mut().pop_front().unwrap_or(VerifyReport {
            ok: true,
            kind: None,
            feedback: RevisionFeedback::default(),
        }))
    }
}

/// Consent source with fixed answers.
pub struct ScriptedConsent {
    pub accept_plan: bool,
    pub approve_overruns: bool,
    pub overruns_asked: usize,
}

impl ScriptedConsent {
    pub fn accepting() -> Self {
        Self { accept_plan: true, approve_overruns: true, overruns_asked: 0 }
    }

    pub fn declining_overruns() -> Self {
        Self { accept_plan: true, approve_overruns: false, overruns_asked: 0 }
    }
}

impl Consent for ScriptedConsent {
    fn confirm_plan(&mut self, _waypoints: &[Waypoint]) -> bool {
        self.accept_plan
    }

    fn approve_overrun(&mut self, _warning: &str) -> bool {
        self.overruns_asked += 1;
        self.approve_overruns
    }
}

/// A failing verification report of the given kind with one feedback line.
pub fn failing_report(kind: FailureKind, detail: &str) -> VerifyReport {
    let mut feedback = RevisionFeedback::default();
    match kind {
        FailureKind::Syntax => feedback.syntax_error = Some(detail.to_string()),
        FailureKind::Lint => feedback.lint_output = Some(detail.to_string()),
        FailureKind::Test => feedback.test_output = Some(detail.to_string()),
        FailureKind::Tooling => feedback.tooling_error = Some(detail.to_string()),
    }
    VerifyReport { ok: false, kind: Some(kind), feedback }
}

/// A structurally valid generation payload for the given files.
pub fn code_payload(files: &[(&str, &str)]) -> String {
    let mut code = serde_json::Map::new();
    for (path, contents) in files {
        code.insert((*path).to_string(), serde_json::Value::String((*contents).to_string()));
    }
    serde_json::json!({ "code": code, "dependencies": [] }).to_string()
}

/// A structurally valid planner payload.
pub fn plan_payload(entries: &[(&str, &str, &str)]) -> String {
    let entries: Vec<_> = entries
        .iter()
        .map(|(id, description, agent_type)| {
            serde_json::json!({
                "id": id,
                "description": description,
                "agent_type": agent_type,
            })
        })
        .collect();
    serde_json::Value::Array(entries).to_string()
}

/// Write a price table file covering the given model.
pub fn seed_cost_table(path: &Path, model: &str) {
    let table = serde_json::json!({
        model: { "prompt_per_1k": 0.001, "completion_per_1k": 0.002 }
    });
    std::fs::write(path, serde_json::to_string_pretty(&table).expect("serialize"))
        .expect("write cost table");
}
