// src/aggregate/models.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One flattened event, balance or mempool entry taken from a page.
pub type Record = Map<String, Value>;

/// Rate bucket holding current-state prices.
pub const NOW_BUCKET: &str = "now";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrencyInfo {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: u32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RateInfo {
    #[serde(default)]
    pub usd: Option<f64>,
}

/// The `library` side tables shipped with every explorer page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLibrary {
    #[serde(default)]
    pub currencies: HashMap<String, CurrencyInfo>,
    /// time bucket -> currency -> rate
    #[serde(default)]
    pub rates: HashMap<String, HashMap<String, RateInfo>>,
}

/// Rows produced by a sandboxed query, in engine order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
