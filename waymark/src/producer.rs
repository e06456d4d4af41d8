//! Prompt construction and structural parsing of generated output.
//!
//! Prompts are minijinja templates compiled into the binary. Parsing is
//! strict about shape and lenient about wrapping: a payload inside markdown
//! code fences is unwrapped before the JSON parse.

use std::collections::BTreeMap;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Deserialize;

use crate::core::types::{ProducerRole, RevisionFeedback, Waypoint};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const CODEGEN_TEMPLATE: &str = include_str!("prompts/codegen.md");
const TESTWRITER_TEMPLATE: &str = include_str!("prompts/testwriter.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

/// Generated output that parsed into the required shape.
#[derive(Debug, Clone, Default)]
pub struct ProducerOutput {
    /// Relative file path to full file content.
    pub files: BTreeMap<String, String>,
    pub declared_dependencies: Vec<String>,
}

/// A payload that could not be parsed into the expected structure.
#[derive(Debug, thiserror::Error)]
#[error("structurally invalid payload: {0}")]
pub struct StructuralError(pub String);

#[derive(Deserialize)]
struct WirePayload {
    code: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Deserialize)]
struct WirePlanEntry {
    id: String,
    description: String,
    agent_type: String,
}

/// Template engine wrapper around minijinja.
pub struct Prompts {
    env: Environment<'static>,
}

impl Prompts {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)?;
        env.add_template("codegen", CODEGEN_TEMPLATE)?;
        env.add_template("testwriter", TESTWRITER_TEMPLATE)?;
        env.add_template("repair", REPAIR_TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn render_planner(&self, requirements: &str) -> Result<String> {
        let rendered = self.env.get_template("planner")?.render(context! {
            requirements => requirements.trim(),
        })?;
        Ok(rendered)
    }

    /// Generation prompt for a waypoint turn. Only the most recent feedback
    /// entry is included; older attempts do not help the model.
    pub fn render_generation(
        &self,
        role: ProducerRole,
        task: &str,
        project_context: &str,
        feedback: Option<&RevisionFeedback>,
    ) -> Result<String> {
        let name = match role {
            ProducerRole::TestWriter => "testwriter",
            _ => "codegen",
        };
        // Tooling faults are not the model's to fix; only code faults are
        // echoed back.
        let feedback_text = feedback
            .filter(|fb| {
                fb.test_output.is_some() || fb.lint_output.is_some() || fb.syntax_error.is_some()
            })
            .map(serde_json::to_string_pretty)
            .transpose()?;
        let rendered = self.env.get_template(name)?.render(context! {
            task => task.trim(),
            project_context => project_context.trim(),
            feedback => feedback_text,
        })?;
        Ok(rendered)
    }

    pub fn render_repair(&self, invalid_payload: &str) -> Result<String> {
        let rendered = self.env.get_template("repair")?.render(context! {
            invalid_payload => invalid_payload,
        })?;
        Ok(rendered)
    }
}

/// Parse a generation payload into [`ProducerOutput`].
pub fn parse_producer_output(raw: &str) -> Result<ProducerOutput, StructuralError> {
    let body = strip_fences(raw);
    let payload: WirePayload =
        serde_json::from_str(body).map_err(|err| StructuralError(err.to_string()))?;
    if payload.code.is_empty() {
        return Err(StructuralError("payload declares no files".to_string()));
    }
    Ok(ProducerOutput {
        files: payload.code,
        declared_dependencies: payload.dependencies,
    })
}

/// Parse the planner payload into pending waypoints.
pub fn parse_plan(raw: &str) -> Result<Vec<Waypoint>, StructuralError> {
    let body = strip_fences(raw);
    let entries: Vec<WirePlanEntry> =
        serde_json::from_str(body).map_err(|err| StructuralError(err.to_string()))?;
    if entries.is_empty() {
        return Err(StructuralError("plan contains no waypoints".to_string()));
    }
    let mut waypoints = Vec::with_capacity(entries.len());
    for entry in entries {
        let role = match entry.agent_type.as_str() {
            "CodeGen" => ProducerRole::CodeGen,
            "TestWriter" => ProducerRole::TestWriter,
            other => {
                return Err(StructuralError(format!(
                    "waypoint {} has unknown agent_type '{other}'",
                    entry.id
                )));
            }
        };
        waypoints.push(Waypoint::new(entry.id, entry.description, role));
    }
    Ok(waypoints)
}

/// Unwrap a payload from markdown code fences, if present.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string on the opening fence ("json", "python", ...).
    let rest = match rest.split_once('\n') {
        Some((_info, body)) => body,
        None => rest,
    };
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_payload() {
        let raw = "```json\n{\"code\": {\"src/app.py\": \"x = 1\\n\"}, \"dependencies\": [\"requests\"]}\n```";
        let output = parse_producer_output(raw).expect("parse");
        assert_eq!(output.files.get("src/app.py").map(String::as_str), Some("x = 1\n"));
        assert_eq!(output.declared_dependencies, vec!["requests".to_string()]);
    }

    #[test]
    fn rejects_prose_and_empty_payloads() {
        assert!(parse_producer_output("Sure! Here is the code you asked for.").is_err());
        assert!(parse_producer_output("{\"code\": {}, \"dependencies\": []}").is_err());
    }

    #[test]
    fn plan_parses_roles_and_rejects_unknown_ones() {
        let raw = r#"[
            {"id": "wp_001", "description": "entry point", "agent_type": "CodeGen"},
            {"id": "wp_002", "description": "tests", "agent_type": "TestWriter"}
        ]"#;
        let plan = parse_plan(raw).expect("parse");
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].role, ProducerRole::CodeGen);
        assert_eq!(plan[1].role, ProducerRole::TestWriter);

        let bad = r#"[{"id": "wp_001", "description": "x", "agent_type": "Reviewer"}]"#;
        assert!(parse_plan(bad).is_err());
    }

    #[test]
    fn generation_prompt_includes_latest_feedback_only_when_present() {
        let prompts = Prompts::new().expect("templates");
        let without = prompts
            .render_generation(ProducerRole::CodeGen, "add a cli", "empty project", None)
            .expect("render");
        assert!(!without.contains("REVISION FEEDBACK"));

        let feedback = RevisionFeedback {
            test_output: Some("1 failed".to_string()),
            ..Default::default()
        };
        let with = prompts
            .render_generation(ProducerRole::CodeGen, "add a cli", "empty project", Some(&feedback))
            .expect("render");
        assert!(with.contains("REVISION FEEDBACK"));
        assert!(with.contains("1 failed"));

        let tooling_only = RevisionFeedback {
            tooling_error: Some("pytest: not found".to_string()),
            ..Default::default()
        };
        let resumed = prompts
            .render_generation(
                ProducerRole::CodeGen,
                "add a cli",
                "empty project",
                Some(&tooling_only),
            )
            .expect("render");
        assert!(!resumed.contains("REVISION FEEDBACK"));
    }

    #[test]
    fn repair_prompt_echoes_invalid_payload() {
        let prompts = Prompts::new().expect("templates");
        let rendered = prompts.render_repair("not json at all").expect("render");
        assert!(rendered.contains("not json at all"));
    }
}
