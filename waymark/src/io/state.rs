//! Durable project state: the sole source of truth across process restarts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Waypoint;
use crate::llm::ProviderKind;

/// Persisted state for one project (`project.json`).
///
/// Loaded once per process; saved after every state-changing operation so the
/// on-disk cursor never points past work that hasn't been durably recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub name: String,
    /// Filesystem-safe slug, derived once at init and immutable after.
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_budget_usd: f64,
    /// Cumulative spend; monotonically non-decreasing.
    pub current_spent_usd: f64,
    pub initial_prompt: String,
    /// Ordered waypoint list; append-only at planning time, indices stable
    /// for the life of the run.
    pub waypoints: Vec<Waypoint>,
    /// Resume cursor, written before and after each waypoint's turn.
    pub current_waypoint_index: usize,
    pub provider: ProviderKind,
    pub model: String,
}

impl ProjectState {
    pub fn new(name: &str, budget_usd: f64, provider: ProviderKind, model: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            slug: slugify(name),
            created_at: now,
            updated_at: now,
            total_budget_usd: budget_usd,
            current_spent_usd: 0.0,
            initial_prompt: String::new(),
            waypoints: Vec::new(),
            current_waypoint_index: 0,
            provider,
            model: model.to_string(),
        }
    }
}

/// Convert a project name to a filesystem-safe slug.
pub fn slugify(name: &str) -> String {
    use std::sync::LazyLock;
    static DROP_CHARS: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"[^\w\s-]").unwrap());
    static COLLAPSE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"[-\s]+").unwrap());
    let (drop_chars, collapse) = (&*DROP_CHARS, &*COLLAPSE);
    let lowered = name.to_lowercase();
    let cleaned = drop_chars.replace_all(&lowered, "");
    collapse
        .replace_all(&cleaned, "-")
        .trim_matches('-')
        .to_string()
}

/// Save/load for [`ProjectState`] with atomic writes.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_path: PathBuf,
}

impl StateStore {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            state_path: project_dir.join("project.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.state_path
    }

    pub fn exists(&self) -> bool {
        self.state_path.exists()
    }

    /// Atomically persist `state`: write a temp file in the same directory,
    /// then rename over the target. The rename is the only observable
    /// mutation, so a crash mid-write never corrupts the previous good state.
    pub fn save(&self, state: &mut ProjectState) -> Result<()> {
        state.updated_at = Utc::now();
        let mut payload = serde_json::to_string_pretty(state).context("serialize project state")?;
        payload.push('\n');

        let tmp_path = self.state_path.with_extension("json.tmp");
        if let Err(err) = fs::write(&tmp_path, &payload) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err).with_context(|| format!("write temp state {}", tmp_path.display()));
        }
        if let Err(err) = fs::rename(&tmp_path, &self.state_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err)
                .with_context(|| format!("replace state {}", self.state_path.display()));
        }
        debug!(path = %self.state_path.display(), "project state saved");
        Ok(())
    }

    /// Load state from disk. Any structural or parse failure is fatal and
    /// reported with the offending path; there is no partial load.
    pub fn load(&self) -> Result<ProjectState> {
        let contents = fs::read_to_string(&self.state_path)
            .with_context(|| format!("read project state {}", self.state_path.display()))?;
        let state: ProjectState = serde_json::from_str(&contents)
            .with_context(|| format!("parse project state {}", self.state_path.display()))?;
        debug!(
            name = %state.name,
            waypoints = state.waypoints.len(),
            cursor = state.current_waypoint_index,
            "project state loaded"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ProducerRole, WaypointStatus};

    fn sample_state() -> ProjectState {
        let mut state = ProjectState::new("Demo Project", 5.0, ProviderKind::OpenAi, "gpt-4.1-2025-04-14");
        state.initial_prompt = "build a calculator".to_string();
        let mut wp = Waypoint::new("wp_001", "create entry point", ProducerRole::CodeGen);
        wp.status = WaypointStatus::Success;
        wp.output_files.push("src/app.py".to_string());
        state.waypoints.push(wp);
        state.current_waypoint_index = 1;
        state
    }

    #[test]
    fn slugify_is_filesystem_safe() {
        assert_eq!(slugify("My Cool Project!"), "my-cool-project");
        assert_eq!(slugify("  spaces   everywhere "), "spaces-everywhere");
        assert_eq!(slugify("already-slugged"), "already-slugged");
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        let mut state = sample_state();
        store.save(&mut state).expect("save");
        let loaded = store.load().expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        store.save(&mut sample_state()).expect("save");
        assert!(!temp.path().join("project.json.tmp").exists());
    }

    #[test]
    fn interrupted_write_preserves_previous_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        let mut state = sample_state();
        store.save(&mut state).expect("save");

        // Simulate a crash mid-write: a stray temp file with garbage must not
        // affect the next load, which reads only the renamed target.
        fs::write(temp.path().join("project.json.tmp"), "{ trunca").expect("write garbage");
        let loaded = store.load().expect("load");
        assert_eq!(loaded.name, state.name);
    }

    #[test]
    fn load_failure_names_the_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        fs::write(store.path(), "not json").expect("write");
        let err = store.load().unwrap_err();
        assert!(format!("{err:#}").contains("project.json"));
    }
}
