use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::info;

use crate::explorer::client::ExplorerClient;
use crate::utils::{capitalize, reformat_time};

/// `data.blockchains.<blockchain>.<field>` of the stats endpoint.
async fn blockchain_stat(client: &ExplorerClient, blockchain: &str, field: &str) -> Result<Value> {
    let mut stats = client.fetch_stats(Some(blockchain)).await?;
    stats
        .pointer_mut(&format!("/data/blockchains/{}/{}", blockchain, field))
        .map(Value::take)
        .ok_or_else(|| anyhow!("Explorer stats carry no '{}' for '{}'", field, blockchain))
}

/// Individual transfers of the last 24 hours, per module.
pub async fn get_transactions_count_24h(client: &ExplorerClient, blockchain: &str) -> Result<Value> {
    blockchain_stat(client, blockchain, "events_24h").await
}

/// Transfers currently waiting in the mempool, per module.
pub async fn get_mempool_transactions_count(
    client: &ExplorerClient,
    blockchain: &str,
) -> Result<Value> {
    blockchain_stat(client, blockchain, "mempool_events").await
}

/// Average fee over the last 24 hours, in USD.
pub async fn get_transaction_fee_24h_usd(client: &ExplorerClient, blockchain: &str) -> Result<Value> {
    let fee = blockchain_stat(client, blockchain, "average_fee_24h").await?;
    fee.get("usd")
        .cloned()
        .ok_or_else(|| anyhow!("No USD fee average for '{}'", blockchain))
}

pub async fn get_transaction_overview(
    client: &ExplorerClient,
    blockchain: &str,
    transaction_hash: &str,
) -> Result<String> {
    info!("Building transaction overview for {} on {}", transaction_hash, blockchain);
    let document = client.fetch_transaction(blockchain, transaction_hash).await?;
    describe_transaction(&document, blockchain, transaction_hash)
}

pub(crate) fn describe_transaction(
    document: &Value,
    blockchain: &str,
    transaction_hash: &str,
) -> Result<String> {
    let best_block = document
        .pointer(&format!("/mixins/stats/{}/best_block", blockchain))
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Transaction response carries no best block stats"))?;
    let transaction = document
        .pointer("/data/transaction")
        .ok_or_else(|| anyhow!("Transaction response carries no transaction data"))?;

    // Unconfirmed transactions have no block yet
    let inclusion = match transaction.get("block").and_then(Value::as_u64) {
        Some(block) => format!(
            "It was included in {} at {} and has {} confirmations.",
            block,
            transaction
                .get("time")
                .and_then(Value::as_str)
                .map(reformat_time)
                .unwrap_or_else(|| "unknown time".to_string()),
            best_block.saturating_sub(block)
        ),
        None => "It has not been included in a block yet.".to_string(),
    };

    let mut text = format!(
        "The {} transaction {} has the following details:\n{}\nThis transaction has following count of transfers in it:",
        capitalize(blockchain),
        transaction_hash,
        inclusion
    );
    if let Some(events) = transaction.get("events").and_then(Value::as_object) {
        for (module, count) in events {
            match count.as_u64() {
                Some(0) | None => continue,
                Some(n) => text.push_str(&format!("\n- module `{}` has {} transfers", module, n)),
            }
        }
    }
    Ok(text)
}
