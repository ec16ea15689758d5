// src/aggregate/enrichment.rs
//
// Currency metadata and USD rate resolution for records of a single page.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{AggregateError, Result};
use super::models::{PageLibrary, RateInfo, Record, NOW_BUCKET};

/// Where the records of a page come from. Decides the rate bucket a record
/// falls back to when it carries no `time` of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Address transfers and mempool entries, timestamped per record.
    Events,
    /// Transfers inside one block, anchored on the block time.
    Block,
    /// Transfers inside one transaction, anchored on the transaction time.
    Transaction,
    /// Current balances, always priced from the `now` bucket.
    Balances,
}

impl SourceKind {
    fn page_anchor<'p>(&self, page: &'p Value) -> Option<&'p str> {
        let pointer = match self {
            SourceKind::Block => "/data/block/time",
            SourceKind::Transaction => "/data/transaction/time",
            SourceKind::Events | SourceKind::Balances => return None,
        };
        page.pointer(pointer).and_then(Value::as_str)
    }

    fn rate_key<'r>(&self, record: &'r Record, anchor: Option<&'r str>) -> &'r str {
        if *self == SourceKind::Balances {
            return NOW_BUCKET;
        }
        record
            .get("time")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .or(anchor)
            .unwrap_or(NOW_BUCKET)
    }
}

/// Per-currency rate lookup built from a page's `library.rates`.
#[derive(Debug, Clone)]
pub enum RateBook {
    /// A `now` bucket was present; it is the only one consulted.
    Current(HashMap<String, RateInfo>),
    /// currency -> timestamp -> rate
    Historical(HashMap<String, HashMap<String, RateInfo>>),
}

impl RateBook {
    pub fn from_library(library: &PageLibrary) -> Self {
        if let Some(now) = library.rates.get(NOW_BUCKET) {
            return RateBook::Current(now.clone());
        }

        let mut by_currency: HashMap<String, HashMap<String, RateInfo>> = HashMap::new();
        for (timestamp, currencies) in &library.rates {
            for (currency, rate) in currencies {
                by_currency
                    .entry(currency.clone())
                    .or_default()
                    .insert(timestamp.clone(), *rate);
            }
        }
        RateBook::Historical(by_currency)
    }

    pub fn lookup(&self, currency: &str, bucket: &str) -> Option<&RateInfo> {
        match self {
            RateBook::Current(rates) => rates.get(currency),
            RateBook::Historical(rates) => rates.get(currency)?.get(bucket),
        }
    }
}

/// Attaches symbol, decimals, verification flag and USD rate to every record
/// of `page`. Fails on the first record whose currency is not in the library.
pub fn enrich_page(page: &Value, records: &mut [Record], kind: SourceKind, page_no: u32) -> Result<()> {
    let library = match page.get("library") {
        Some(lib) => PageLibrary::deserialize(lib).map_err(|e| AggregateError::MalformedPage {
            page: page_no,
            reason: format!("unreadable library: {}", e),
        })?,
        None => PageLibrary::default(),
    };
    let book = RateBook::from_library(&library);
    let anchor = kind.page_anchor(page);

    for record in records.iter_mut() {
        enrich_record(record, &library, &book, kind, anchor, page_no)?;
    }
    Ok(())
}

pub(crate) fn enrich_record(
    record: &mut Record,
    library: &PageLibrary,
    book: &RateBook,
    kind: SourceKind,
    anchor: Option<&str>,
    page_no: u32,
) -> Result<()> {
    let currency = record
        .get("currency")
        .and_then(Value::as_str)
        .ok_or_else(|| AggregateError::MalformedPage {
            page: page_no,
            reason: "record has no currency".into(),
        })?
        .to_string();

    let info = library
        .currencies
        .get(&currency)
        .ok_or_else(|| AggregateError::MissingReference {
            currency: currency.clone(),
        })?;

    let usd = book
        .lookup(&currency, kind.rate_key(record, anchor))
        .and_then(|rate| rate.usd);

    record.insert("currency_symbol".into(), json!(info.symbol));
    record.insert("currency_decimals".into(), json!(info.decimals));
    record.insert("currency_verified".into(), Value::Bool(usd.is_some()));
    record.insert("exchange_rate".into(), json!(usd));
    Ok(())
}

/// Field renames applied to every record, enriched or not.
pub fn normalize_record(record: &mut Record) {
    if let Some(tx) = record.remove("transaction") {
        record.insert("transaction_hash".into(), tx);
    }
    if !record.contains_key("currency_id") {
        if let Some(currency) = record.get("currency").cloned() {
            record.insert("currency_id".into(), currency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn historical_page() -> Value {
        json!({
            "data": {"block": {"time": "2024-01-01T00:00:00.000Z"}},
            "library": {
                "currencies": {
                    "ethereum": {"symbol": "ETH", "decimals": 18},
                    "ethereum-erc-20/0xscam": {"symbol": "USDT", "decimals": 6}
                },
                "rates": {
                    "2024-01-01T00:00:00.000Z": {"ethereum": {"usd": 2300.5}},
                    "2024-01-02T00:00:00.000Z": {
                        "ethereum": {"usd": 2400.0},
                        "ethereum-erc-20/0xscam": {"usd": null}
                    }
                }
            }
        })
    }

    #[test]
    fn test_record_time_selects_bucket() {
        let page = historical_page();
        let mut records = vec![
            record(json!({"currency": "ethereum", "time": "2024-01-02T00:00:00.000Z"})),
            record(json!({"currency": "ethereum", "time": "2024-01-01T00:00:00.000Z"})),
        ];
        enrich_page(&page, &mut records, SourceKind::Events, 0).unwrap();
        assert_eq!(records[0]["exchange_rate"], json!(2400.0));
        assert_eq!(records[1]["exchange_rate"], json!(2300.5));
        assert_eq!(records[0]["currency_symbol"], json!("ETH"));
        assert_eq!(records[0]["currency_decimals"], json!(18));
        assert_eq!(records[0]["currency_verified"], json!(true));
    }

    #[test]
    fn test_missing_bucket_marks_unverified() {
        let page = historical_page();
        let mut records = vec![record(json!({"currency": "ethereum", "time": "1999-01-01T00:00:00.000Z"}))];
        enrich_page(&page, &mut records, SourceKind::Events, 0).unwrap();
        assert_eq!(records[0]["currency_verified"], json!(false));
        assert_eq!(records[0]["exchange_rate"], Value::Null);
    }

    #[test]
    fn test_null_usd_is_unverified() {
        let page = historical_page();
        let mut records = vec![record(json!({
            "currency": "ethereum-erc-20/0xscam",
            "time": "2024-01-02T00:00:00.000Z"
        }))];
        enrich_page(&page, &mut records, SourceKind::Events, 0).unwrap();
        assert_eq!(records[0]["currency_verified"], json!(false));
        assert_eq!(records[0]["exchange_rate"], Value::Null);
        assert_eq!(records[0]["currency_symbol"], json!("USDT"));
    }

    #[test]
    fn test_block_records_use_block_time() {
        let page = historical_page();
        let mut records = vec![record(json!({"currency": "ethereum", "block": 1}))];
        enrich_page(&page, &mut records, SourceKind::Block, 0).unwrap();
        assert_eq!(records[0]["exchange_rate"], json!(2300.5));
    }

    #[test]
    fn test_untimed_event_without_now_is_unverified() {
        let page = historical_page();
        let mut records = vec![record(json!({"currency": "ethereum"}))];
        enrich_page(&page, &mut records, SourceKind::Events, 0).unwrap();
        assert_eq!(records[0]["currency_verified"], json!(false));
    }

    #[test]
    fn test_now_bucket_is_exclusive() {
        let page = json!({
            "library": {
                "currencies": {"bitcoin": {"symbol": "BTC", "decimals": 8}},
                "rates": {
                    "now": {"bitcoin": {"usd": 65000.0}},
                    "2024-01-01T00:00:00.000Z": {"bitcoin": {"usd": 42000.0}}
                }
            }
        });
        let mut records = vec![
            record(json!({"currency": "bitcoin"})),
            record(json!({"currency": "bitcoin", "time": "2024-01-01T00:00:00.000Z"})),
        ];
        enrich_page(&page, &mut records, SourceKind::Events, 0).unwrap();
        assert_eq!(records[0]["exchange_rate"], json!(65000.0));
        assert_eq!(records[1]["exchange_rate"], json!(65000.0));
    }

    #[test]
    fn test_unknown_currency_is_missing_reference() {
        let page = historical_page();
        let mut records = vec![record(json!({"currency": "dogecoin"}))];
        let err = enrich_page(&page, &mut records, SourceKind::Events, 3).unwrap_err();
        assert!(matches!(err, AggregateError::MissingReference { ref currency } if currency == "dogecoin"));
    }

    #[test]
    fn test_enrichment_is_order_independent() {
        let page = historical_page();
        let a = record(json!({"currency": "ethereum", "time": "2024-01-02T00:00:00.000Z"}));
        let b = record(json!({"currency": "ethereum-erc-20/0xscam", "time": "2024-01-01T00:00:00.000Z"}));

        let mut forward = vec![a.clone(), b.clone()];
        let mut backward = vec![b, a];
        enrich_page(&page, &mut forward, SourceKind::Events, 0).unwrap();
        enrich_page(&page, &mut backward, SourceKind::Events, 0).unwrap();
        assert_eq!(forward[0], backward[1]);
        assert_eq!(forward[1], backward[0]);
    }

    #[test]
    fn test_normalize_renames_transaction() {
        let mut r = record(json!({"transaction": "0xabc", "currency": "ethereum"}));
        normalize_record(&mut r);
        assert!(!r.contains_key("transaction"));
        assert_eq!(r["transaction_hash"], json!("0xabc"));
        assert_eq!(r["currency_id"], json!("ethereum"));
    }
}
