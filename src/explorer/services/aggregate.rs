use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::aggregate::{
    run_aggregation, AggregateError, AggregationLimits, AggregationPlan, QueryFamily, QueryResult,
    Result, SourceKind,
};
use crate::explorer::client::ExplorerClient;

/// Body of an aggregation request, shared by the HTTP and MCP surfaces.
/// `target` is the block height, transaction hash or address, depending on
/// the family.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AggregateRequest {
    #[validate(length(min = 1, max = 64))]
    pub blockchain: String,
    #[validate(length(min = 1, max = 128))]
    pub module: String,
    #[validate(length(min = 1, max = 256))]
    pub target: String,
    #[validate(length(min = 1, max = 10000))]
    pub sql_query: String,
}

fn events_plan(family: QueryFamily, bucket: &str, module: &str) -> AggregationPlan {
    AggregationPlan::new(
        family.schema(),
        vec!["data".to_string(), bucket.to_string(), module.to_string()],
    )
}

pub async fn aggregate_block_transfers(
    client: &ExplorerClient,
    limits: &AggregationLimits,
    blockchain: &str,
    module: &str,
    height: u64,
    sql_query: &str,
) -> Result<QueryResult> {
    info!(blockchain, module, height, "aggregating block transfers");
    let plan = events_plan(QueryFamily::BlockTransfers, "events", module).enrich(SourceKind::Block);
    run_aggregation(
        move |page| client.fetch_block_events(blockchain, module, height, page),
        plan,
        sql_query,
        limits,
    )
    .await
}

pub async fn aggregate_transaction_transfers(
    client: &ExplorerClient,
    limits: &AggregationLimits,
    blockchain: &str,
    module: &str,
    transaction_hash: &str,
    sql_query: &str,
) -> Result<QueryResult> {
    info!(blockchain, module, transaction_hash, "aggregating transaction transfers");
    let plan = events_plan(QueryFamily::TransactionTransfers, "events", module)
        .enrich(SourceKind::Transaction);
    run_aggregation(
        move |page| client.fetch_transaction_events(blockchain, module, transaction_hash, page),
        plan,
        sql_query,
        limits,
    )
    .await
}

pub async fn aggregate_address_mempool(
    client: &ExplorerClient,
    limits: &AggregationLimits,
    blockchain: &str,
    module: &str,
    address: &str,
    sql_query: &str,
) -> Result<QueryResult> {
    info!(blockchain, module, address, "aggregating address mempool");
    let plan =
        events_plan(QueryFamily::AddressMempool, "mempool", module).enrich(SourceKind::Events);
    run_aggregation(
        move |page| client.fetch_address_mempool(blockchain, module, address, page),
        plan,
        sql_query,
        limits,
    )
    .await
}

/// Balances of a `-main` module come back whole on the first page.
pub async fn aggregate_address_balances(
    client: &ExplorerClient,
    limits: &AggregationLimits,
    blockchain: &str,
    module: &str,
    address: &str,
    sql_query: &str,
) -> Result<QueryResult> {
    info!(blockchain, module, address, "aggregating address balances");
    let plan = AggregationPlan::new(
        QueryFamily::AddressBalances.schema(),
        vec!["data".to_string(), "balances".to_string()],
    )
    .stop_after_first(module.ends_with("-main"));
    run_aggregation(
        move |page| client.fetch_address_balances(blockchain, module, address, page),
        plan,
        sql_query,
        limits,
    )
    .await
}

pub async fn aggregate_address_transfers(
    client: &ExplorerClient,
    limits: &AggregationLimits,
    blockchain: &str,
    module: &str,
    address: &str,
    sql_query: &str,
) -> Result<QueryResult> {
    info!(blockchain, module, address, "aggregating address transfers");
    let plan =
        events_plan(QueryFamily::AddressTransfers, "events", module).enrich(SourceKind::Events);
    run_aggregation(
        move |page| client.fetch_address_events(blockchain, module, address, page),
        plan,
        sql_query,
        limits,
    )
    .await
}

/// Routes a request to the tool for `family`.
pub async fn aggregate(
    client: &ExplorerClient,
    limits: &AggregationLimits,
    family: QueryFamily,
    req: &AggregateRequest,
) -> Result<QueryResult> {
    let (blockchain, module, target, sql) = (
        req.blockchain.as_str(),
        req.module.as_str(),
        req.target.as_str(),
        req.sql_query.as_str(),
    );
    match family {
        QueryFamily::BlockTransfers => {
            let height: u64 = target.trim().parse().map_err(|_| {
                AggregateError::InvalidArgument(format!("block height must be a number, got '{}'", target))
            })?;
            aggregate_block_transfers(client, limits, blockchain, module, height, sql).await
        }
        QueryFamily::TransactionTransfers => {
            aggregate_transaction_transfers(client, limits, blockchain, module, target, sql).await
        }
        QueryFamily::AddressMempool => {
            aggregate_address_mempool(client, limits, blockchain, module, target, sql).await
        }
        QueryFamily::AddressBalances => {
            aggregate_address_balances(client, limits, blockchain, module, target, sql).await
        }
        QueryFamily::AddressTransfers => {
            aggregate_address_transfers(client, limits, blockchain, module, target, sql).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let ok = AggregateRequest {
            blockchain: "bitcoin".into(),
            module: "bitcoin-main".into(),
            target: "840000".into(),
            sql_query: "SELECT COUNT(*) FROM data".into(),
        };
        assert!(ok.validate().is_ok());

        let empty_sql = AggregateRequest {
            sql_query: String::new(),
            ..ok
        };
        assert!(empty_sql.validate().is_err());
    }

    #[test]
    fn test_events_plan_keys() {
        let plan = events_plan(QueryFamily::AddressMempool, "mempool", "ethereum-main");
        assert_eq!(plan.data_keys, vec!["data", "mempool", "ethereum-main"]);
        assert_eq!(plan.schema.len(), QueryFamily::AddressMempool.schema().len());
    }
}
