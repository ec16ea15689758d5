use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::info;

use crate::explorer::client::ExplorerClient;
use crate::utils::{capitalize, reformat_time};

/// Height of the best block the explorer has processed for `blockchain`.
pub async fn get_latest_block(client: &ExplorerClient, blockchain: &str) -> Result<u64> {
    let stats = client.fetch_stats(Some(blockchain)).await?;
    stats
        .pointer(&format!("/data/blockchains/{}/best_block", blockchain))
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Explorer stats carry no best block for '{}'", blockchain))
}

pub async fn get_block_overview(
    client: &ExplorerClient,
    blockchain: &str,
    height: u64,
) -> Result<String> {
    info!("Building block overview for {} #{}", blockchain, height);
    let document = client.fetch_block(blockchain, height).await?;
    describe_block(&document, blockchain, height)
}

pub(crate) fn describe_block(document: &Value, blockchain: &str, height: u64) -> Result<String> {
    let best_block = document
        .pointer(&format!("/mixins/stats/{}/best_block", blockchain))
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Block response carries no best block stats"))?;
    if best_block < height {
        return Ok(format!(
            "The {} block {} hasn't been processed yet.",
            capitalize(blockchain),
            height
        ));
    }

    let block = document
        .pointer("/data/block")
        .ok_or_else(|| anyhow!("Block response carries no block data"))?;
    let hash = block.get("hash").and_then(Value::as_str).unwrap_or("unknown");
    let time = block
        .get("time")
        .and_then(Value::as_str)
        .map(reformat_time)
        .unwrap_or_else(|| "unknown".to_string());

    let mut lines = vec![
        format!("The {} block {} has the following details:", capitalize(blockchain), height),
        format!(" - {} confirmations.", best_block - height),
        format!(" - block hash is {}.", hash),
        format!(" - block timestamp is {}.", time),
        " - the block has following count of individual transfers (not whole transactions):"
            .to_string(),
    ];
    if let Some(events) = block.get("events").and_then(Value::as_object) {
        for (module, count) in events {
            lines.push(format!(
                "    + {} events in {} module",
                count.as_u64().unwrap_or(0),
                module
            ));
        }
    }
    Ok(lines.join("\n"))
}
