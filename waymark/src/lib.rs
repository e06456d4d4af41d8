//! Budget-capped waypoint execution for LLM-driven code generation.
//!
//! A project is decomposed into waypoints, each one generated, verified,
//! and merged into the accepted source tree in strict order. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure logic (waypoint types, cost arithmetic, the budget
//!   ledger). Fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (state persistence, locking,
//!   workspace trees, subprocess execution). Isolated to enable mocking in
//!   tests.
//! - **[`llm`]**: The provider-agnostic call layer with per-backend
//!   adapters and a bounded retry policy.
//!
//! [`engine`] coordinates the above through port traits; [`producer`] and
//! [`verify`] supply the prompt and verification sides of those ports.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod llm;
pub mod logging;
pub mod producer;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verify;
