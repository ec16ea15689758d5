//! End-to-end tests of the aggregation core with in-process page fetchers

use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use xpl_mcp_server::aggregate::{
    run_aggregation, AggregateError, AggregationLimits, AggregationPlan, ColumnType,
    PaginationOptions, QueryFamily, SourceKind, TableSchema,
};

fn items_page(items: Value) -> Value {
    json!({ "data": { "items": items } })
}

/// Serves `pages` by index; anything past the end is an empty page.
fn serve(
    pages: Vec<Value>,
    calls: Arc<AtomicU32>,
) -> impl FnMut(u32) -> Ready<anyhow::Result<Value>> {
    move |page| {
        calls.fetch_add(1, Ordering::SeqCst);
        let doc = pages
            .get(page as usize)
            .cloned()
            .unwrap_or_else(|| items_page(json!([])));
        ready(Ok(doc))
    }
}

fn ab_plan() -> AggregationPlan {
    let schema = TableSchema::new([("a", ColumnType::Text), ("b", ColumnType::Real)]).unwrap();
    AggregationPlan::new(schema, vec!["data".into(), "items".into()])
}

#[tokio::test]
async fn test_records_round_trip_through_the_table() {
    let calls = Arc::new(AtomicU32::new(0));
    let pages = vec![items_page(json!([{"a": "x", "b": 1.5}, {"a": "y"}]))];

    let result = run_aggregation(
        serve(pages, calls.clone()),
        ab_plan(),
        "SELECT a, b FROM data ORDER BY a",
        &AggregationLimits::default(),
    )
    .await
    .unwrap();

    assert_eq!(result.columns, vec!["a", "b"]);
    assert_eq!(
        result.rows,
        vec![vec![json!("x"), json!(1.5)], vec![json!("y"), Value::Null]]
    );
    // page 0 had records, page 1 was empty
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pagination_stops_at_first_empty_page() {
    let calls = Arc::new(AtomicU32::new(0));
    let pages = vec![
        items_page(json!([{"a": "p0"}, {"a": "p0"}])),
        items_page(json!([{"a": "p1"}])),
        items_page(json!([])),
        items_page(json!([{"a": "never"}])),
    ];

    let result = run_aggregation(
        serve(pages, calls.clone()),
        ab_plan(),
        "SELECT COUNT(*) AS n FROM data WHERE a != 'never'",
        &AggregationLimits::default(),
    )
    .await
    .unwrap();

    assert_eq!(result.rows, vec![vec![json!(3)]]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_stop_after_first_fetches_one_page() {
    let calls = Arc::new(AtomicU32::new(0));
    let pages = vec![
        items_page(json!([{"a": "p0"}])),
        items_page(json!([{"a": "p1"}])),
    ];

    let result = run_aggregation(
        serve(pages, calls.clone()),
        ab_plan().stop_after_first(true),
        "SELECT a FROM data",
        &AggregationLimits::default(),
    )
    .await
    .unwrap();

    assert_eq!(result.rows, vec![vec![json!("p0")]]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pagination_ceiling_is_inclusive_and_not_an_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let endless = move |page: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        ready(Ok(items_page(json!([{"a": format!("p{}", page)}]))))
    };
    let limits = AggregationLimits {
        pagination: PaginationOptions {
            ceiling: 2,
            max_records: None,
        },
        ..AggregationLimits::default()
    };

    let result = run_aggregation(endless, ab_plan(), "SELECT COUNT(*) FROM data", &limits)
        .await
        .unwrap();

    assert_eq!(result.rows, vec![vec![json!(3)]]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_record_cap_truncates() {
    let calls = Arc::new(AtomicU32::new(0));
    let pages = vec![
        items_page(json!([{"a": "1"}, {"a": "2"}])),
        items_page(json!([{"a": "3"}, {"a": "4"}])),
    ];
    let limits = AggregationLimits {
        pagination: PaginationOptions {
            ceiling: 25,
            max_records: Some(3),
        },
        ..AggregationLimits::default()
    };

    let result = run_aggregation(serve(pages, calls), ab_plan(), "SELECT COUNT(*) FROM data", &limits)
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![json!(3)]]);
}

#[tokio::test]
async fn test_upstream_failure_names_the_page() {
    let fetch = |page: u32| {
        ready(if page == 0 {
            Ok(items_page(json!([{"a": "x"}])))
        } else {
            Err(anyhow::anyhow!("503 Service Unavailable"))
        })
    };

    let err = run_aggregation(fetch, ab_plan(), "SELECT * FROM data", &AggregationLimits::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AggregateError::Upstream { page: 1, .. }));
    assert_eq!(err.kind(), "upstream_fetch_error");
}

#[tokio::test]
async fn test_denied_statement_then_fresh_table() {
    let pages = vec![items_page(json!([{"a": "x", "b": 2.0}]))];

    let err = run_aggregation(
        serve(pages.clone(), Arc::new(AtomicU32::new(0))),
        ab_plan(),
        "DROP TABLE data",
        &AggregationLimits::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AggregateError::DeniedOperation { .. }), "{:?}", err);

    let err = run_aggregation(
        serve(pages.clone(), Arc::new(AtomicU32::new(0))),
        ab_plan(),
        "SELECT load_extension('evil')",
        &AggregationLimits::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AggregateError::DeniedOperation { .. }), "{:?}", err);

    // The next call gets its own table with the same rows
    let result = run_aggregation(
        serve(pages, Arc::new(AtomicU32::new(0))),
        ab_plan(),
        "SELECT a, b FROM data",
        &AggregationLimits::default(),
    )
    .await
    .unwrap();
    assert_eq!(result.rows, vec![vec![json!("x"), json!(2.0)]]);
}

#[tokio::test]
async fn test_unlisted_function_in_where_is_denied() {
    let err = run_aggregation(
        serve(vec![items_page(json!([{"a": "xyz"}]))], Arc::new(AtomicU32::new(0))),
        ab_plan(),
        "SELECT COUNT(*) FROM data WHERE a LIKE 'x%'",
        &AggregationLimits::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "denied_operation");
    match err {
        AggregateError::DeniedOperation { action } => assert!(action.contains("like"), "{action}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_syntax_error_is_reported() {
    let err = run_aggregation(
        serve(vec![items_page(json!([{"a": "x"}]))], Arc::new(AtomicU32::new(0))),
        ab_plan(),
        "SELEC a FROM data",
        &AggregationLimits::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "syntax_error");
}

#[tokio::test]
async fn test_address_transfers_are_enriched() {
    let page = json!({
        "data": {
            "events": {
                "bitcoin-main": [
                    {"block": 840000, "transaction": "aa", "time": "2024-04-20T00:09:27Z",
                     "currency": "bitcoin", "effect": "-150000000", "failed": false, "extra": null},
                    {"block": 840001, "transaction": "bb", "time": "2024-04-20T00:20:00Z",
                     "currency": "bitcoin", "effect": "50000000", "failed": false, "extra": null}
                ]
            }
        },
        "library": {
            "currencies": {"bitcoin": {"symbol": "BTC", "decimals": 8}},
            "rates": {
                "2024-04-20T00:09:27Z": {"bitcoin": {"usd": 64000.0}},
                "2024-04-20T00:20:00Z": {"bitcoin": {"usd": 64100.0}}
            }
        }
    });
    let plan = AggregationPlan::new(
        QueryFamily::AddressTransfers.schema(),
        vec!["data".into(), "events".into(), "bitcoin-main".into()],
    )
    .enrich(SourceKind::Events);

    let result = run_aggregation(
        serve(vec![page], Arc::new(AtomicU32::new(0))),
        plan,
        "SELECT transaction_hash, currency_id, currency_symbol, currency_decimals, \
         currency_verified, exchange_rate FROM data ORDER BY block",
        &AggregationLimits::default(),
    )
    .await
    .unwrap();

    assert_eq!(
        result.rows[0],
        vec![json!("aa"), json!("bitcoin"), json!("BTC"), json!(8), json!(1), json!(64000.0)]
    );
    assert_eq!(result.rows[1][5], json!(64100.0));
}

#[tokio::test]
async fn test_unknown_currency_loads_nothing() {
    let page = json!({
        "data": {"events": {"ethereum-erc-20": [{"transaction": "cc", "currency": "ethereum-erc-20/0xunknown"}]}},
        "library": {"currencies": {}, "rates": {}}
    });
    let plan = AggregationPlan::new(
        QueryFamily::TransactionTransfers.schema(),
        vec!["data".into(), "events".into(), "ethereum-erc-20".into()],
    )
    .enrich(SourceKind::Transaction);

    let err = run_aggregation(
        serve(vec![page], Arc::new(AtomicU32::new(0))),
        plan,
        "SELECT * FROM data",
        &AggregationLimits::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AggregateError::MissingReference { ref currency } if currency == "ethereum-erc-20/0xunknown"));
}

#[tokio::test]
async fn test_whole_call_timeout() {
    let slow = |_page: u32| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok::<_, anyhow::Error>(items_page(json!([])))
    };
    let limits = AggregationLimits {
        timeout: Duration::from_millis(50),
        ..AggregationLimits::default()
    };

    let err = run_aggregation(slow, ab_plan(), "SELECT * FROM data", &limits)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "timeout");
}
