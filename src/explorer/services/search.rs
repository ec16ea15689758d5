use anyhow::Result;
use serde_json::Value;
use tracing::info;

use crate::explorer::client::ExplorerClient;

pub const NO_ENS_ADDRESS: &str = "There is no addresses linked to this domain";

/// Blockchains in which `query` (an address, a transaction hash or an ENS
/// domain) was found.
pub async fn detect_blockchains(client: &ExplorerClient, query: &str) -> Result<Vec<String>> {
    let results = client.search(query).await?;
    Ok(blockchains_in(&results))
}

/// Resolves an ENS domain to the address it links to.
pub async fn resolve_ens_domain(client: &ExplorerClient, domain: &str) -> Result<String> {
    info!("Resolving ENS domain {}", domain);
    let results = client.search(domain).await?;
    Ok(linked_address(&results).unwrap_or_else(|| NO_ENS_ADDRESS.to_string()))
}

fn blockchains_in(results: &Value) -> Vec<String> {
    results
        .pointer("/data/results")
        .and_then(Value::as_object)
        .map(|links| links.keys().cloned().collect())
        .unwrap_or_default()
}

/// First address link of the search results, stripped of its explorer URL
/// prefix.
fn linked_address(results: &Value) -> Option<String> {
    let links = results.pointer("/data/results")?.as_object()?;
    links.iter().find_map(|(blockchain, entities)| {
        let link = entities.get("address")?.as_str()?;
        let prefix = format!("https://3xpl.com/{}/address/", blockchain);
        Some(link.strip_prefix(prefix.as_str()).unwrap_or(link).to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_linked_address() {
        let results = json!({"data": {"results": {
            "ethereum": {"address": "https://3xpl.com/ethereum/address/0xd8da6bf26964af9d7eed9e03e53415d37aa96045"}
        }}});
        assert_eq!(
            linked_address(&results).as_deref(),
            Some("0xd8da6bf26964af9d7eed9e03e53415d37aa96045")
        );
        assert_eq!(blockchains_in(&results), vec!["ethereum".to_string()]);
    }

    #[test]
    fn test_no_results() {
        let results = json!({"data": {"results": null}});
        assert!(linked_address(&results).is_none());
        assert!(blockchains_in(&results).is_empty());
    }
}
