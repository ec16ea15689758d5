// src/aggregate/pagination.rs

use std::future::Future;

use serde_json::Value;
use tracing::{debug, warn};

use super::enrichment::{enrich_page, normalize_record, SourceKind};
use super::error::{AggregateError, Result};
use super::models::Record;

pub const DEFAULT_PAGINATION_CEILING: u32 = 25;

#[derive(Debug, Clone, Copy)]
pub struct PaginationOptions {
    /// Highest page index that may be fetched. Reaching it stops collection
    /// without an error.
    pub ceiling: u32,
    /// Upper bound on the number of records kept across all pages.
    pub max_records: Option<usize>,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_PAGINATION_CEILING,
            max_records: None,
        }
    }
}

/// Fetches pages `0, 1, 2, ...` one at a time and concatenates the records
/// found under `data_keys`, enriching them with currency data when `enrich`
/// names a source kind.
///
/// Collection stops before adding a page whose record list is absent or
/// empty, after page 0 when `stop_after_first` is set, and after the
/// ceiling page.
pub async fn collect_all_pages<F, Fut>(
    mut fetch_page: F,
    data_keys: &[String],
    enrich: Option<SourceKind>,
    stop_after_first: bool,
    options: &PaginationOptions,
) -> Result<Vec<Record>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Value>>,
{
    let mut all_records: Vec<Record> = Vec::new();
    let mut page: u32 = 0;

    loop {
        let document = fetch_page(page)
            .await
            .map_err(|source| AggregateError::Upstream { page, source })?;

        let mut records = match extract_records(&document, data_keys, page)? {
            Some(records) => records,
            None => {
                debug!(page, "no records on page, pagination finished");
                break;
            }
        };
        debug!(page, count = records.len(), "collected page");

        if let Some(kind) = enrich {
            enrich_page(&document, &mut records, kind, page)?;
        }
        records.iter_mut().for_each(normalize_record);
        all_records.extend(records);

        if let Some(max) = options.max_records {
            if all_records.len() >= max {
                if all_records.len() > max {
                    warn!(max, "record cap reached, dropping the remainder");
                    all_records.truncate(max);
                }
                break;
            }
        }

        if stop_after_first {
            break;
        }
        if page >= options.ceiling {
            warn!(
                ceiling = options.ceiling,
                records = all_records.len(),
                "pagination ceiling reached, remaining pages are not fetched"
            );
            break;
        }
        page += 1;
    }

    Ok(all_records)
}

/// Walks `data_keys` from the page root. `None` means the page holds no
/// records and pagination should stop.
pub fn extract_records(document: &Value, data_keys: &[String], page: u32) -> Result<Option<Vec<Record>>> {
    let mut current = document;
    for key in data_keys {
        match current.get(key.as_str()) {
            Some(next) if !is_empty(next) => current = next,
            _ => return Ok(None),
        }
    }
    if is_empty(current) {
        return Ok(None);
    }

    let items = current.as_array().ok_or_else(|| AggregateError::MalformedPage {
        page,
        reason: format!("value at '{}' is not a list of records", data_keys.join(".")),
    })?;

    items
        .iter()
        .map(|item| {
            item.as_object().cloned().ok_or_else(|| AggregateError::MalformedPage {
                page,
                reason: "record is not an object".into(),
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(path: &[&str]) -> Vec<String> {
        path.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_extract_stops_on_missing_key() {
        let doc = json!({"data": {"events": {}}});
        let found = extract_records(&doc, &keys(&["data", "events", "bitcoin-main"]), 0).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_extract_stops_on_empty_list() {
        let doc = json!({"data": {"events": {"bitcoin-main": []}}});
        let found = extract_records(&doc, &keys(&["data", "events", "bitcoin-main"]), 0).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_extract_rejects_non_list() {
        let doc = json!({"data": {"events": {"bitcoin-main": {"a": 1}}}});
        let err = extract_records(&doc, &keys(&["data", "events", "bitcoin-main"]), 2).unwrap_err();
        assert_eq!(err.kind(), "malformed_page");
    }

    #[test]
    fn test_extract_with_empty_key_path() {
        let doc = json!([{"currency": "bitcoin"}]);
        let found = extract_records(&doc, &[], 0).unwrap().unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_ceiling_is_inclusive() {
        let mut calls = 0u32;
        let records = collect_all_pages(
            |page| {
                calls += 1;
                async move { Ok(json!({"items": [{"currency": "bitcoin", "page": page}]})) }
            },
            &keys(&["items"]),
            None,
            false,
            &PaginationOptions { ceiling: 2, max_records: None },
        )
        .await
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["page"], json!(2));
    }

    #[tokio::test]
    async fn test_record_cap_truncates() {
        let records = collect_all_pages(
            |_| async { Ok(json!({"items": [{"n": 1}, {"n": 2}, {"n": 3}]})) },
            &keys(&["items"]),
            None,
            false,
            &PaginationOptions { ceiling: 10, max_records: Some(4) },
        )
        .await
        .unwrap();
        assert_eq!(records.len(), 4);
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let err = collect_all_pages(
            |page| async move {
                if page == 1 {
                    Err(anyhow::anyhow!("503 from explorer"))
                } else {
                    Ok(json!({"items": [{"n": 1}]}))
                }
            },
            &keys(&["items"]),
            None,
            false,
            &PaginationOptions::default(),
        )
        .await
        .unwrap_err();
        match err {
            AggregateError::Upstream { page, source } => {
                assert_eq!(page, 1);
                assert!(source.to_string().contains("503"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
