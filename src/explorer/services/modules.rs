use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use crate::explorer::client::ExplorerClient;

/// Every blockchain the explorer indexes, mapped to its modules and their
/// descriptions.
pub async fn list_blockchains_and_modules(client: &ExplorerClient) -> Result<Value> {
    let stats = client.fetch_stats(None).await?;
    catalog(&stats)
}

fn catalog(stats: &Value) -> Result<Value> {
    let blockchains = stats
        .pointer("/library/blockchains")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("Explorer stats carry no blockchain library"))?;
    let modules = stats.pointer("/library/modules").and_then(Value::as_object);

    let mut out = Map::new();
    for (blockchain, info) in blockchains {
        let described: Map<String, Value> = info
            .get("modules")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(|module| {
                let description = modules
                    .and_then(|m| m.get(module))
                    .and_then(|m| m.get("description"))
                    .cloned()
                    .unwrap_or(Value::Null);
                (module.to_string(), description)
            })
            .collect();
        out.insert(blockchain.clone(), Value::Object(described));
    }
    Ok(Value::Object(out))
}
