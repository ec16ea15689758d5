use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::aggregate::models::{PageLibrary, NOW_BUCKET};
use crate::explorer::client::ExplorerClient;
use crate::utils::{capitalize, format_amount, reformat_time};

struct LastActivity<'a> {
    hash: &'a str,
    time: &'a str,
    module: &'a str,
}

/// Human-readable summary of an address: verified balances, pending
/// transfers and the latest transaction across modules.
pub async fn get_address_overview(
    client: &ExplorerClient,
    blockchain: &str,
    address: &str,
) -> Result<String> {
    info!("Building address overview for {} on {}", address, blockchain);
    let document = client.fetch_address(blockchain, address).await?;
    describe_address(&document, blockchain, address)
}

/// Per-module entries of `data.<name>`; empty when the section is absent.
fn section<'a>(document: &'a Value, name: &str) -> impl Iterator<Item = (&'a String, &'a Value)> {
    document
        .pointer(&format!("/data/{}", name))
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
}

pub(crate) fn describe_address(document: &Value, blockchain: &str, address: &str) -> Result<String> {
    let pending: usize = section(document, "mempool")
        .filter_map(|(_, entries)| entries.as_array())
        .map(Vec::len)
        .sum();

    let last = section(document, "events")
        .filter_map(|(module, events)| {
            let first = events.as_array()?.first()?;
            Some(LastActivity {
                hash: first.get("transaction")?.as_str()?,
                time: first.get("time")?.as_str()?,
                module,
            })
        })
        .max_by(|a, b| a.time.cmp(b.time));

    let library: PageLibrary = match document.get("library") {
        Some(lib) => serde_json::from_value(lib.clone()).context("Unreadable address library")?,
        None => PageLibrary::default(),
    };

    let mut verified = Vec::new();
    for balances in section(document, "balances").filter_map(|(_, b)| b.as_object()) {
        for (currency, entry) in balances {
            let priced = library
                .rates
                .get(NOW_BUCKET)
                .and_then(|rates| rates.get(currency))
                .and_then(|rate| rate.usd)
                .is_some();
            let (Some(info), Some(balance)) = (
                library.currencies.get(currency),
                entry.get("balance").and_then(Value::as_str),
            ) else {
                continue;
            };
            if priced {
                let symbol = info.symbol.clone().unwrap_or_else(|| currency.clone());
                verified.push(format!("- {} {}", format_amount(balance, info.decimals), symbol));
            }
        }
    }

    let currencies_text = if verified.is_empty() {
        "This address has no whitelisted tokens.".to_string()
    } else {
        format!(
            "This address has following verified tokens on balance: \n{}",
            verified.join("\n")
        )
    };
    let mempool_text = match pending {
        0 => "There are no pending transactions for this address.".to_string(),
        n => format!("There are {} pending transactions for this address.", n),
    };
    let activity_text = match last {
        Some(last) => format!(
            "Last transaction occurred at {} within the module `{}` and had transaction hash {}.",
            reformat_time(last.time),
            last.module,
            last.hash
        ),
        None => "No transactions occurred for this address yet.".to_string(),
    };

    Ok(format!(
        "The {} address {} has the following details:\n{}\n{}\n{}",
        capitalize(blockchain),
        address,
        currencies_text,
        mempool_text,
        activity_text
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_address() {
        let document = json!({
            "data": {
                "events": {
                    "bitcoin-main": [{"transaction": "aa11", "time": "2024-03-01T10:00:00.000Z"}],
                    "bitcoin-omni": [{"transaction": "bb22", "time": "2023-01-01T00:00:00.000Z"}]
                },
                "mempool": {"bitcoin-main": [{}, {}], "bitcoin-omni": []},
                "balances": {"bitcoin-main": {"bitcoin/bitcoin": {"balance": "150000000"}}}
            },
            "library": {
                "currencies": {"bitcoin/bitcoin": {"symbol": "BTC", "decimals": 8}},
                "rates": {"now": {"bitcoin/bitcoin": {"usd": 65000.0}}}
            }
        });
        let text = describe_address(&document, "bitcoin", "bc1qtest").unwrap();
        assert!(text.starts_with("The Bitcoin address bc1qtest"));
        assert!(text.contains("- 1.5 BTC"));
        assert!(text.contains("There are 2 pending transactions"));
        assert!(text.contains("2024-03-01T10:00:00Z within the module `bitcoin-main`"));
    }

    #[test]
    fn test_describe_empty_address() {
        let text = describe_address(&json!({"data": {}}), "ethereum", "0xabc").unwrap();
        assert!(text.contains("no whitelisted tokens"));
        assert!(text.contains("No transactions occurred"));
    }
}
