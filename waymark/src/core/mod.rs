//! Pure, deterministic logic: types, prices, budget arithmetic.
//!
//! Modules here must not perform network or process I/O and stay fully
//! testable in isolation. (The ledger reads its price file; that is the one
//! deliberate exception, so price edits take effect mid-run.)

pub mod budget;
pub mod cost;
pub mod types;
