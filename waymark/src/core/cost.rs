//! Per-model price table backing the budget ledger.
//!
//! Prices live in an external JSON file keyed by model id so they can be
//! edited without a rebuild; the ledger re-reads the file before every
//! pre-call check. A missing model entry is a fatal configuration error,
//! never a zero-cost default.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Cost per 1,000 tokens for one model, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

/// Price table keyed by model id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostTable {
    models: BTreeMap<String, ModelPrice>,
}

impl CostTable {
    /// Load the table from a JSON file. Parse failures are fatal and name
    /// the offending path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read cost table {}", path.display()))?;
        let table: CostTable = serde_json::from_str(&contents)
            .with_context(|| format!("parse cost table {}", path.display()))?;
        Ok(table)
    }

    /// Price for `model`, or an error if the table has no entry for it.
    pub fn price(&self, model: &str) -> Result<ModelPrice> {
        self.models.get(model).copied().ok_or_else(|| {
            anyhow!("model '{model}' not found in cost table (add prompt/completion prices for it)")
        })
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.models.insert(model.into(), price);
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Cost of a call in USD given token counts and a price.
pub fn call_cost(price: ModelPrice, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let prompt_cost = f64::from(prompt_tokens) / 1000.0 * price.prompt_per_1k;
    let completion_cost = f64::from(completion_tokens) / 1000.0 * price.completion_per_1k;
    prompt_cost + completion_cost
}

/// Default price table written on `init` when no cost file exists.
pub fn default_cost_table() -> CostTable {
    let mut table = CostTable::default();
    table.insert(
        "gpt-4.1-2025-04-14",
        ModelPrice {
            prompt_per_1k: 0.002,
            completion_per_1k: 0.008,
        },
    );
    table.insert(
        "o4-mini-2025-04-16",
        ModelPrice {
            prompt_per_1k: 0.0011,
            completion_per_1k: 0.0044,
        },
    );
    table.insert(
        "claude-sonnet-4-20250514",
        ModelPrice {
            prompt_per_1k: 0.003,
            completion_per_1k: 0.015,
        },
    );
    table.insert(
        "claude-opus-4-20250514",
        ModelPrice {
            prompt_per_1k: 0.015,
            completion_per_1k: 0.075,
        },
    );
    table.insert(
        "gemini-2.5-pro",
        ModelPrice {
            prompt_per_1k: 0.00125,
            completion_per_1k: 0.01,
        },
    );
    table.insert(
        "gemini-2.5-flash",
        ModelPrice {
            prompt_per_1k: 0.00015,
            completion_per_1k: 0.0006,
        },
    );
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_is_an_error() {
        let table = default_cost_table();
        let err = table.price("made-up-model").unwrap_err();
        assert!(err.to_string().contains("made-up-model"));
    }

    #[test]
    fn call_cost_uses_both_rates() {
        let price = ModelPrice {
            prompt_per_1k: 0.002,
            completion_per_1k: 0.008,
        };
        let cost = call_cost(price, 1000, 500);
        assert!((cost - 0.006).abs() < 1e-12);
    }

    #[test]
    fn load_round_trips_through_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("costs.json");
        let table = default_cost_table();
        let payload = serde_json::to_string_pretty(&table).expect("serialize");
        std::fs::write(&path, payload).expect("write");
        let loaded = CostTable::load(&path).expect("load");
        assert_eq!(loaded, table);
    }

    #[test]
    fn load_reports_offending_path_on_parse_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("costs.json");
        std::fs::write(&path, "not json").expect("write");
        let err = CostTable::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("costs.json"));
    }
}
