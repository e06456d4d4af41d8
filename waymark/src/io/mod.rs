//! Side-effecting modules: filesystem layout, persisted state, locking,
//! configuration, and subprocess execution. Everything here returns
//! `anyhow::Result` with path context on failure.

pub mod config;
pub mod lock;
pub mod process;
pub mod state;
pub mod workspace;
