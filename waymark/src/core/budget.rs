//! Budget ledger: gates every external call against the project cap.
//!
//! The ledger is advisory-with-consent, not hard-blocking: a pre-call check
//! that would exceed the cap must be surfaced to the caller, which can obtain
//! an explicit override. The ledger itself never silently exceeds the cap.
//!
//! The pre-call check bounds against the worst-case completion (max tokens),
//! while the post-call commit records the actual cost, which is always at or
//! below the estimate. The cap can therefore only be exceeded via explicit
//! override, by a bounded amount.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::cost::{CostTable, call_cost};

/// Outcome of a pre-call budget check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Allowance {
    /// The worst-case call cost fits within the remaining budget.
    Within,
    /// The worst-case call cost would exceed the cap; the caller must obtain
    /// an explicit override before proceeding.
    WouldExceed {
        prompt_cost: f64,
        max_completion_cost: f64,
        remaining: f64,
    },
}

/// Tracks cumulative spend against a project cap.
#[derive(Debug)]
pub struct BudgetLedger {
    cap_usd: f64,
    spent_usd: f64,
    costs_path: PathBuf,
}

impl BudgetLedger {
    /// `spent` seeds the ledger from persisted project state on resume.
    pub fn new(cap_usd: f64, spent_usd: f64, costs_path: impl Into<PathBuf>) -> Self {
        Self {
            cap_usd,
            spent_usd,
            costs_path: costs_path.into(),
        }
    }

    pub fn cap(&self) -> f64 {
        self.cap_usd
    }

    pub fn spent(&self) -> f64 {
        self.spent_usd
    }

    pub fn remaining(&self) -> f64 {
        self.cap_usd - self.spent_usd
    }

    pub fn costs_path(&self) -> &Path {
        &self.costs_path
    }

    /// Pre-call check with the estimated prompt token count and the role's
    /// max completion budget. Re-reads the price table so price edits take
    /// effect without a restart. Unknown models are a fatal configuration
    /// error: cost cannot be safely assumed.
    pub fn check(
        &self,
        model: &str,
        estimated_prompt_tokens: u32,
        max_completion_tokens: u32,
    ) -> Result<Allowance> {
        let table = CostTable::load(&self.costs_path)?;
        let price = table.price(model)?;
        let prompt_cost = f64::from(estimated_prompt_tokens) / 1000.0 * price.prompt_per_1k;
        let max_completion_cost =
            f64::from(max_completion_tokens) / 1000.0 * price.completion_per_1k;

        if self.spent_usd + prompt_cost + max_completion_cost > self.cap_usd {
            return Ok(Allowance::WouldExceed {
                prompt_cost,
                max_completion_cost,
                remaining: self.remaining(),
            });
        }
        Ok(Allowance::Within)
    }

    /// Commit the exact cost of a completed call from actual token usage.
    /// Returns the cost so the caller can attribute it to the originating
    /// waypoint.
    pub fn record(
        &mut self,
        model: &str,
        actual_prompt_tokens: u32,
        actual_completion_tokens: u32,
    ) -> Result<f64> {
        let table = CostTable::load(&self.costs_path)?;
        let price = table.price(model)?;
        let cost = call_cost(price, actual_prompt_tokens, actual_completion_tokens);
        self.spent_usd += cost;
        tracing::debug!(model, cost, spent = self.spent_usd, cap = self.cap_usd, "recorded call cost");
        Ok(cost)
    }

    /// Human-readable warning for a `WouldExceed` allowance, shown when
    /// asking the user for an override.
    pub fn overrun_warning(
        &self,
        allowance: Allowance,
        max_completion_tokens: u32,
    ) -> Option<String> {
        let Allowance::WouldExceed {
            prompt_cost,
            max_completion_cost,
            remaining,
        } = allowance
        else {
            return None;
        };
        Some(format!(
            "this call's prompt costs ${prompt_cost:.4} and may generate up to \
             {max_completion_tokens} tokens costing an additional ${max_completion_cost:.4}, \
             for a maximum of ${:.4}; project budget is ${:.2}, spent ${:.2}, remaining ${remaining:.2}",
            prompt_cost + max_completion_cost,
            self.cap_usd,
            self.spent_usd,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cost::default_cost_table;
    use std::path::PathBuf;

    fn write_costs(dir: &Path) -> PathBuf {
        let path = dir.join("costs.json");
        let payload = serde_json::to_string_pretty(&default_cost_table()).expect("serialize");
        std::fs::write(&path, payload).expect("write costs");
        path
    }

    #[test]
    fn check_allows_within_cap() {
        let temp = tempfile::tempdir().expect("tempdir");
        let costs = write_costs(temp.path());
        let ledger = BudgetLedger::new(10.0, 0.0, costs);
        let allowance = ledger.check("gpt-4.1-2025-04-14", 1000, 4000).expect("check");
        assert_eq!(allowance, Allowance::Within);
    }

    #[test]
    fn check_flags_worst_case_overrun() {
        let temp = tempfile::tempdir().expect("tempdir");
        let costs = write_costs(temp.path());
        // Cap of 1 cent: 1000 prompt tokens cost $0.002 and the worst-case
        // completion of 4000 tokens costs $0.032.
        let ledger = BudgetLedger::new(0.01, 0.0, costs);
        let allowance = ledger.check("gpt-4.1-2025-04-14", 1000, 4000).expect("check");
        assert!(matches!(allowance, Allowance::WouldExceed { .. }));
        assert!(ledger
            .overrun_warning(allowance, 4000)
            .expect("warning")
            .contains("remaining"));
    }

    #[test]
    fn record_accumulates_actual_cost_monotonically() {
        let temp = tempfile::tempdir().expect("tempdir");
        let costs = write_costs(temp.path());
        let mut ledger = BudgetLedger::new(10.0, 0.0, costs);
        let first = ledger.record("gpt-4.1-2025-04-14", 1000, 500).expect("record");
        assert!((first - 0.006).abs() < 1e-12);
        let second = ledger.record("gpt-4.1-2025-04-14", 2000, 0).expect("record");
        assert!((second - 0.004).abs() < 1e-12);
        assert!((ledger.spent() - 0.010).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_aborts_check_and_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let costs = write_costs(temp.path());
        let mut ledger = BudgetLedger::new(10.0, 0.0, costs);
        assert!(ledger.check("nope", 10, 10).is_err());
        assert!(ledger.record("nope", 10, 10).is_err());
        assert_eq!(ledger.spent(), 0.0);
    }

    #[test]
    fn check_rereads_price_table() {
        let temp = tempfile::tempdir().expect("tempdir");
        let costs = write_costs(temp.path());
        let ledger = BudgetLedger::new(10.0, 0.0, costs.clone());
        assert!(ledger.check("brand-new-model", 10, 10).is_err());

        let mut table = default_cost_table();
        table.insert(
            "brand-new-model",
            crate::core::cost::ModelPrice {
                prompt_per_1k: 0.001,
                completion_per_1k: 0.002,
            },
        );
        let payload = serde_json::to_string_pretty(&table).expect("serialize");
        std::fs::write(&costs, payload).expect("rewrite costs");
        assert_eq!(
            ledger.check("brand-new-model", 10, 10).expect("check"),
            Allowance::Within
        );
    }
}
