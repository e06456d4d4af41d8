//! Development-time tracing for debugging runs.
//!
//! Reads `RUST_LOG`. Defaults to `warn` if unset. Output: stderr, compact
//! format, so it never mixes with interactive prompts on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// # Example
/// ```bash
/// RUST_LOG=waymark=debug cargo run -- develop demo --prompt "..."
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
