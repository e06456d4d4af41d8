//! Budget-capped LLM codegen orchestrator.
//!
//! Projects live under a home directory (default `~/.waymark`): a shared
//! `config.toml` and `model_costs.json`, plus one directory per project
//! holding its state file, accepted source tree, and waypoint scratch
//! space.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use waymark::core::budget::BudgetLedger;
use waymark::core::cost::default_cost_table;
use waymark::core::types::Waypoint;
use waymark::engine::{Consent, Engine, PlanOutcome, RunOutcome};
use waymark::exit_codes;
use waymark::io::config::{AppConfig, load_config, write_config};
use waymark::io::lock::ProjectLock;
use waymark::io::state::{ProjectState, StateStore, slugify};
use waymark::io::workspace::{ProjectPaths, init_project_layout};
use waymark::llm::{ProviderKind, build_provider};
use waymark::logging;
use waymark::verify::CommandVerifier;

const COSTS_FILE_NAME: &str = "model_costs.json";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Parser)]
#[command(
    name = "waymark",
    version,
    about = "Budget-capped waypoint execution for LLM code generation"
)]
struct Cli {
    /// Home directory for configuration and projects.
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new project with a budget cap.
    Init {
        name: String,
        /// Total budget cap in USD.
        #[arg(long)]
        budget: f64,
    },
    /// Plan (if needed) and execute waypoints until done or stopped.
    Develop {
        name: String,
        /// Requirements prompt; required the first time, ignored afterwards.
        #[arg(long)]
        prompt: Option<String>,
        /// Raise or lower the project's budget cap in USD.
        #[arg(long)]
        budget: Option<f64>,
        /// Override the project's provider for this and future runs.
        #[arg(long)]
        provider: Option<ProviderKind>,
        /// Override the project's model for this and future runs.
        #[arg(long)]
        model: Option<String>,
    },
    /// Show waypoint statuses and spend for a project.
    Status { name: String },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let home = match cli.home {
        Some(home) => home,
        None => dirs::home_dir()
            .context("cannot determine home directory; pass --home")?
            .join(".waymark"),
    };
    match cli.command {
        Command::Init { name, budget } => cmd_init(&home, &name, budget),
        Command::Develop { name, prompt, budget, provider, model } => {
            cmd_develop(&home, &name, prompt, budget, provider, model)
        }
        Command::Status { name } => cmd_status(&home, &name),
    }
}

fn project_dir(home: &Path, name: &str) -> PathBuf {
    home.join("projects").join(slugify(name))
}

/// Create home-level files if missing and return the loaded config.
fn ensure_home(home: &Path) -> Result<AppConfig> {
    std::fs::create_dir_all(home).with_context(|| format!("create {}", home.display()))?;
    let config_path = home.join(CONFIG_FILE_NAME);
    let config = load_config(&config_path)?;
    if !config_path.exists() {
        write_config(&config_path, &config)?;
    }
    let costs_path = home.join(COSTS_FILE_NAME);
    if !costs_path.exists() {
        let payload = serde_json::to_string_pretty(&default_cost_table())
            .context("serialize default cost table")?;
        std::fs::write(&costs_path, payload)
            .with_context(|| format!("write {}", costs_path.display()))?;
    }
    Ok(config)
}

fn cmd_init(home: &Path, name: &str, budget: f64) -> Result<i32> {
    if budget <= 0.0 {
        bail!("budget must be positive, got {budget}");
    }
    let config = ensure_home(home)?;
    let dir = project_dir(home, name);
    let store = StateStore::new(&dir);
    if store.exists() {
        bail!("project '{name}' already exists at {}", dir.display());
    }
    init_project_layout(&ProjectPaths::new(&dir))?;
    let lock = ProjectLock::acquire(&dir)?;
    let mut state = ProjectState::new(name, budget, config.provider, &config.model);
    store.save(&mut state)?;
    lock.release()?;
    println!("initialized project '{name}' at {}", dir.display());
    Ok(exit_codes::OK)
}

fn cmd_develop(
    home: &Path,
    name: &str,
    prompt: Option<String>,
    budget_override: Option<f64>,
    provider_override: Option<ProviderKind>,
    model_override: Option<String>,
) -> Result<i32> {
    let mut config = ensure_home(home)?;
    config.validate()?;
    let dir = project_dir(home, name);
    let store = StateStore::new(&dir);
    if !store.exists() {
        bail!("project '{name}' does not exist; run `waymark init {name} --budget <usd>` first");
    }

    let lock = ProjectLock::acquire(&dir)?;
    let mut state = store.load()?;
    if let Some(budget) = budget_override {
        if budget <= 0.0 {
            bail!("budget must be positive, got {budget}");
        }
        state.total_budget_usd = budget;
    }
    if let Some(provider) = provider_override {
        state.provider = provider;
    }
    if let Some(model) = model_override {
        state.model = model;
    }
    if state.waypoints.is_empty() {
        match prompt {
            Some(prompt) => state.initial_prompt = prompt,
            None => bail!("project '{name}' has no plan yet; pass --prompt with the requirements"),
        }
    }
    store.save(&mut state)?;
    config.provider = state.provider;
    config.model = state.model.clone();

    let provider = build_provider(state.provider, config.network_timeout())?;
    if !provider.validate_credentials() {
        bail!(
            "credential check failed for {} (is {} set and valid?)",
            state.provider,
            state.provider.api_key_var()
        );
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            eprintln!("shutdown requested; finishing the current step");
        })
        .context("install signal handler")?;
    }

    let verifier = CommandVerifier::new(
        config.verify.clone(),
        config.tool_timeout(),
        config.tool_output_limit_bytes,
    );
    let mut consent = StdinConsent;
    let mut ledger = BudgetLedger::new(
        state.total_budget_usd,
        state.current_spent_usd,
        home.join(COSTS_FILE_NAME),
    );
    let mut engine = Engine::new(
        provider.as_ref(),
        &verifier,
        &mut consent,
        &config,
        &dir,
        Arc::clone(&shutdown),
    )?;

    if state.waypoints.is_empty() {
        match engine.plan(&mut state, &mut ledger)? {
            PlanOutcome::Planned(count) => println!("planned {count} waypoints"),
            PlanOutcome::Declined => {
                println!("plan declined; nothing executed");
                lock.release()?;
                return Ok(exit_codes::STOPPED);
            }
        }
    }

    let outcome = engine.run(&mut state, &mut ledger)?;
    lock.release()?;
    print_spend(&state);
    match outcome {
        RunOutcome::Completed => {
            println!("all waypoints complete");
            Ok(exit_codes::OK)
        }
        RunOutcome::Halted { waypoint_id, status } => {
            println!("run halted at waypoint {waypoint_id} with status {}", status.as_str());
            Ok(exit_codes::STOPPED)
        }
        RunOutcome::Interrupted => {
            println!("run interrupted; resume with `waymark develop {name}`");
            Ok(exit_codes::STOPPED)
        }
    }
}

fn cmd_status(home: &Path, name: &str) -> Result<i32> {
    let dir = project_dir(home, name);
    let store = StateStore::new(&dir);
    if !store.exists() {
        bail!("project '{name}' does not exist");
    }
    let state = store.load()?;
    println!("project:  {} ({} / {})", state.name, state.provider, state.model);
    print_spend(&state);
    if state.waypoints.is_empty() {
        println!("no waypoints planned yet");
        return Ok(exit_codes::OK);
    }
    for (index, waypoint) in state.waypoints.iter().enumerate() {
        let cursor = if index == state.current_waypoint_index { ">" } else { " " };
        println!(
            "{cursor} {:<8} {:<18} rev {}  ${:.4}  {}",
            waypoint.id,
            waypoint.status.as_str(),
            waypoint.revision_attempts,
            waypoint.cost_usd,
            waypoint.description,
        );
    }
    Ok(exit_codes::OK)
}

fn print_spend(state: &ProjectState) {
    println!(
        "budget:   ${:.2} spent of ${:.2} cap",
        state.current_spent_usd, state.total_budget_usd
    );
}

/// Interactive consent over stdin.
struct StdinConsent;

impl StdinConsent {
    fn ask(&self, question: &str) -> bool {
        print!("{question} [y/N] ");
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

impl Consent for StdinConsent {
    fn confirm_plan(&mut self, waypoints: &[Waypoint]) -> bool {
        println!("proposed plan:");
        for waypoint in waypoints {
            println!("  {:<8} [{}] {}", waypoint.id, waypoint.role.as_str(), waypoint.description);
        }
        self.ask("proceed with this plan?")
    }

    fn approve_overrun(&mut self, warning: &str) -> bool {
        println!("budget warning: {warning}");
        self.ask("exceed the budget cap for this call?")
    }
}
