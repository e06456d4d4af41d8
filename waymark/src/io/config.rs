//! Application configuration stored as TOML in the waymark home directory.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::ProducerRole;
use crate::llm::ProviderKind;

/// Runner configuration (TOML).
///
/// Edited by humans; missing fields default to sensible values so a partial
/// file stays valid across upgrades.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Default provider for new runs.
    pub provider: ProviderKind,
    /// Default model id (must exist in the cost table).
    pub model: String,

    /// Maximum revision turns per waypoint.
    pub max_revisions: u32,
    /// Per-attempt network timeout for provider calls, in seconds.
    pub network_timeout_secs: u64,
    /// Timeout per verification stage, in seconds.
    pub tool_timeout_secs: u64,
    /// Truncate captured verification output beyond this many bytes.
    pub tool_output_limit_bytes: usize,
    /// Keep waypoint scratch directories after failure, for debugging.
    pub keep_failed_waypoints: bool,

    /// Sampling temperature for code generation.
    pub codegen_temperature: f32,
    /// Sampling temperature for planning and other roles.
    pub other_temperature: f32,
    /// Max completion tokens for code-producing roles.
    pub codegen_max_tokens: u32,
    /// Max completion tokens for the planner.
    pub planner_max_tokens: u32,

    pub verify: VerifyConfig,
}

/// Commands run against a candidate tree, in order: syntax, lint, test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    pub syntax_command: Vec<String>,
    pub lint_command: Vec<String>,
    pub test_command: Vec<String>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            syntax_command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "compileall".to_string(),
                "-q".to_string(),
                "src".to_string(),
            ],
            lint_command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "flake8".to_string(),
                "src".to_string(),
            ],
            test_command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
                "-q".to_string(),
                "src/tests".to_string(),
            ],
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4.1-2025-04-14".to_string(),
            max_revisions: 3,
            network_timeout_secs: 60,
            tool_timeout_secs: 60,
            tool_output_limit_bytes: 100_000,
            keep_failed_waypoints: false,
            codegen_temperature: 0.2,
            other_temperature: 0.7,
            codegen_max_tokens: 4000,
            planner_max_tokens: 2000,
            verify: VerifyConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.network_timeout_secs == 0 {
            return Err(anyhow!("network_timeout_secs must be > 0"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(anyhow!("tool_timeout_secs must be > 0"));
        }
        if self.tool_output_limit_bytes == 0 {
            return Err(anyhow!("tool_output_limit_bytes must be > 0"));
        }
        for (name, command) in [
            ("verify.syntax_command", &self.verify.syntax_command),
            ("verify.lint_command", &self.verify.lint_command),
            ("verify.test_command", &self.verify.test_command),
        ] {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("{name} must be a non-empty array"));
            }
        }
        Ok(())
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn temperature_for(&self, role: ProducerRole) -> f32 {
        match role {
            ProducerRole::CodeGen | ProducerRole::TestWriter => self.codegen_temperature,
            ProducerRole::Planner => self.other_temperature,
        }
    }

    pub fn max_tokens_for(&self, role: ProducerRole) -> u32 {
        match role {
            ProducerRole::CodeGen | ProducerRole::TestWriter => self.codegen_max_tokens,
            ProducerRole::Planner => self.planner_max_tokens,
        }
    }
}

/// Load config from a TOML file. Missing file returns defaults.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
