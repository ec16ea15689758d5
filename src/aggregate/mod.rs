//! # Aggregation core
//!
//! Turns paginated explorer pages into an in-memory `data` table and runs a
//! caller-supplied, read-only SQL query against it.
//!
//! - [`pagination`] fetches pages sequentially and extracts records
//! - [`enrichment`] attaches currency metadata and USD rates
//! - [`loader`] materializes records into the ephemeral table
//! - [`sandbox`] executes the query under a default-deny authorizer

pub mod enrichment;
pub mod error;
pub mod loader;
pub mod models;
pub mod pagination;
pub mod sandbox;
pub mod schema;

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub use enrichment::SourceKind;
pub use error::{AggregateError, Result};
pub use loader::{unwrap_into_table, EphemeralTable};
pub use models::{QueryResult, Record};
pub use pagination::{collect_all_pages, PaginationOptions};
pub use sandbox::{run_query, SandboxOptions};
pub use schema::{ColumnType, QueryFamily, TableSchema};

pub const DEFAULT_AGGREGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// What to collect and how to shape it into a table.
#[derive(Debug, Clone)]
pub struct AggregationPlan {
    pub schema: TableSchema,
    pub data_keys: Vec<String>,
    pub enrich: Option<SourceKind>,
    pub stop_after_first: bool,
}

impl AggregationPlan {
    pub fn new(schema: TableSchema, data_keys: Vec<String>) -> Self {
        Self {
            schema,
            data_keys,
            enrich: None,
            stop_after_first: false,
        }
    }

    pub fn enrich(mut self, kind: SourceKind) -> Self {
        self.enrich = Some(kind);
        self
    }

    pub fn stop_after_first(mut self, stop: bool) -> Self {
        self.stop_after_first = stop;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregationLimits {
    pub pagination: PaginationOptions,
    pub sandbox: SandboxOptions,
    /// Budget for the whole call, fetches included.
    pub timeout: Duration,
}

impl Default for AggregationLimits {
    fn default() -> Self {
        Self {
            pagination: PaginationOptions::default(),
            sandbox: SandboxOptions::default(),
            timeout: DEFAULT_AGGREGATION_TIMEOUT,
        }
    }
}

/// Collects every page, loads the records into a fresh table and runs `sql`.
///
/// Nothing is loaded unless every page was fetched and enriched; the table
/// is dropped before this returns, on success and on error.
pub async fn run_aggregation<F, Fut>(
    fetch_page: F,
    plan: AggregationPlan,
    sql: &str,
    limits: &AggregationLimits,
) -> Result<QueryResult>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Value>>,
{
    let run_id = Uuid::new_v4();
    let span = info_span!("aggregation", %run_id, keys = %plan.data_keys.join("."));
    let sql = sql.to_string();
    let limits = *limits;

    let work = async move {
        let records = collect_all_pages(
            fetch_page,
            &plan.data_keys,
            plan.enrich,
            plan.stop_after_first,
            &limits.pagination,
        )
        .await?;
        info!(records = records.len(), "pages collected, loading table");

        let sandbox = limits.sandbox;
        let schema = plan.schema;
        tokio::task::spawn_blocking(move || {
            let table = EphemeralTable::with_records(schema, &records)?;
            table.query(&sql, &sandbox)
        })
        .await
        .map_err(|e| AggregateError::Storage(format!("aggregation worker failed: {}", e)))?
    };

    tokio::time::timeout(limits.timeout, work)
        .instrument(span)
        .await
        .map_err(|_| AggregateError::Timeout(limits.timeout))?
}
