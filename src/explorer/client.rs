//! HTTP client for the 3xpl explorer API.
//!
//! Every response has its top-level `context` block removed before it is
//! handed to the rest of the server.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::aggregate::models::{PageLibrary, NOW_BUCKET};
use crate::config::Config;

/// Records requested per page.
pub const PAGE_SIZE: u32 = 1000;
const LIBRARY: &str = "currencies,rates(usd)";

/// Which per-address listing a page fetch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressDataSource {
    Events,
    Mempool,
    Balances,
}

impl AddressDataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressDataSource::Events => "events",
            AddressDataSource::Mempool => "mempool",
            AddressDataSource::Balances => "balances",
        }
    }
}

#[derive(Clone)]
pub struct ExplorerClient {
    http: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl ExplorerClient {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url)
            .with_context(|| format!("Invalid explorer base URL '{}'", config.api_base_url))?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str], params: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        if !segments.is_empty() {
            url.path_segments_mut()
                .map_err(|_| anyhow!("Explorer base URL cannot carry a path"))?
                .pop_if_empty()
                .extend(segments);
        }
        if !params.is_empty() || self.api_key.is_some() {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            if let Some(key) = &self.api_key {
                query.append_pair("token", key.expose_secret());
            }
        }
        Ok(url)
    }

    /// GETs an explorer endpoint and returns the JSON body without `context`.
    pub async fn get_json(&self, segments: &[&str], params: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(segments, params)?;
        debug!(path = url.path(), "explorer request");

        let res = self
            .http
            .get(url)
            .send()
            .await
            .context("Explorer request failed")?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("explorer API returned {}: {}", status, excerpt(&body)));
        }

        let mut value: Value =
            serde_json::from_str(&body).context("Explorer returned a non-JSON body")?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("context");
        }
        Ok(value)
    }

    pub async fn fetch_stats(&self, blockchain: Option<&str>) -> Result<Value> {
        let mut params = vec![("from", blockchain.unwrap_or("all").to_string())];
        if blockchain.is_none() {
            params.push(("library", "blockchains,modules".to_string()));
        }
        self.get_json(&[], &params).await
    }

    pub async fn search(&self, query: &str) -> Result<Value> {
        self.get_json(&["search"], &[("q", query.to_string())]).await
    }

    /// Address snapshot used by the overview tool.
    pub async fn fetch_address(&self, blockchain: &str, address: &str) -> Result<Value> {
        self.get_json(
            &[blockchain, "address", address],
            &[
                ("data", "address,balances,events,mempool".to_string()),
                ("from", "all".to_string()),
                ("limit", "1".to_string()),
                ("library", LIBRARY.to_string()),
            ],
        )
        .await
    }

    pub async fn fetch_block(&self, blockchain: &str, height: u64) -> Result<Value> {
        let height = height.to_string();
        self.get_json(
            &[blockchain, "block", height.as_str()],
            &[
                ("data", "block".to_string()),
                ("from", "all".to_string()),
                ("mixins", "stats".to_string()),
            ],
        )
        .await
    }

    pub async fn fetch_transaction(&self, blockchain: &str, transaction_hash: &str) -> Result<Value> {
        self.get_json(
            &[blockchain, "transaction", transaction_hash],
            &[
                ("data", "transaction".to_string()),
                ("from", "all".to_string()),
                ("mixins", "stats".to_string()),
            ],
        )
        .await
    }

    // --- page fetchers used by the aggregation tools ---

    pub async fn fetch_block_events(
        &self,
        blockchain: &str,
        module: &str,
        height: u64,
        page: u32,
    ) -> Result<Value> {
        let height = height.to_string();
        self.get_json(
            &[blockchain, "block", height.as_str()],
            &page_params("block,events", module, page),
        )
        .await
    }

    pub async fn fetch_transaction_events(
        &self,
        blockchain: &str,
        module: &str,
        transaction_hash: &str,
        page: u32,
    ) -> Result<Value> {
        self.get_json(
            &[blockchain, "transaction", transaction_hash],
            &page_params("transaction,events", module, page),
        )
        .await
    }

    pub async fn fetch_address_data(
        &self,
        blockchain: &str,
        module: &str,
        address: &str,
        source: AddressDataSource,
        page: u32,
    ) -> Result<Value> {
        self.get_json(
            &[blockchain, "address", address],
            &page_params(source.as_str(), module, page),
        )
        .await
    }

    pub async fn fetch_address_events(
        &self,
        blockchain: &str,
        module: &str,
        address: &str,
        page: u32,
    ) -> Result<Value> {
        self.fetch_address_data(blockchain, module, address, AddressDataSource::Events, page)
            .await
    }

    pub async fn fetch_address_mempool(
        &self,
        blockchain: &str,
        module: &str,
        address: &str,
        page: u32,
    ) -> Result<Value> {
        self.fetch_address_data(blockchain, module, address, AddressDataSource::Mempool, page)
            .await
    }

    /// Balance page reshaped into a flat `data.balances` list.
    pub async fn fetch_address_balances(
        &self,
        blockchain: &str,
        module: &str,
        address: &str,
        page: u32,
    ) -> Result<Value> {
        let document = self
            .fetch_address_data(blockchain, module, address, AddressDataSource::Balances, page)
            .await?;
        flatten_balances(&document, module)
    }
}

fn page_params(data: &str, module: &str, page: u32) -> Vec<(&'static str, String)> {
    vec![
        ("data", data.to_string()),
        ("from", module.to_string()),
        ("limit", PAGE_SIZE.to_string()),
        ("page", page.to_string()),
        ("library", LIBRARY.to_string()),
    ]
}

/// Turns `data.balances.<module>.<currency> = {balance, ..}` into a list of
/// balance rows priced from the `now` rate bucket.
pub(crate) fn flatten_balances(document: &Value, module: &str) -> Result<Value> {
    let library: PageLibrary = match document.get("library") {
        Some(lib) => serde_json::from_value(lib.clone()).context("Unreadable balance library")?,
        None => PageLibrary::default(),
    };
    let now = library.rates.get(NOW_BUCKET);

    let empty = Map::new();
    let balances = document
        .pointer(&format!("/data/balances/{}", module))
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let rows: Vec<Value> = balances
        .iter()
        .map(|(currency, entry)| {
            let info = library.currencies.get(currency);
            let usd = now.and_then(|rates| rates.get(currency)).and_then(|r| r.usd);
            json!({
                "currency_id": currency,
                "symbol": info.and_then(|i| i.symbol.clone()),
                "decimals": info.map(|i| i.decimals),
                "balance": entry.get("balance").cloned().unwrap_or(Value::Null),
                "is_verified": usd.is_some(),
                "exchange_rate": usd,
            })
        })
        .collect();

    Ok(json!({
        "data": { "balances": rows },
        "library": document.get("library").cloned().unwrap_or(Value::Null),
    }))
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(300) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
