//! End-to-end batch dispatch against the in-memory warehouse

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use warehouse_series::health::{HealthReporter, HealthStatus, HEALTHY_MESSAGE};
use warehouse_series::query::result::{FieldValues, TIME_FIELD, VALUES_FIELD};
use warehouse_series::query::{
    BatchQuery, DataResponse, DispatcherConfig, ExecutionContext, QueryDispatcher, QueryExecutor,
    QuerySpec, RowSequence,
};
use warehouse_series::query::transform;
use warehouse_series::warehouse::{CannedResult, MemoryWarehouse};

const T1: &str = "2024-03-01T00:00:00Z";
const T2: &str = "2024-03-01T00:01:00Z";

fn payload(ref_id: &str, sql: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "refId": ref_id,
        "project": "acme",
        "rawSql": sql,
        "format": "time_series",
    }))
    .unwrap()
}

fn warehouse_with_series() -> MemoryWarehouse {
    let warehouse = MemoryWarehouse::new();
    warehouse.insert(
        "SELECT time, metric FROM cpu",
        CannedResult::rows(vec![
            json!({"time": T1, "metric": 5}),
            json!({"time": T2, "metric": 7}),
        ]),
    );
    warehouse
}

fn dispatcher(warehouse: &MemoryWarehouse) -> QueryDispatcher {
    QueryDispatcher::new(QueryExecutor::new(Arc::new(warehouse.clone())))
}

fn values(response: &DataResponse) -> Vec<i64> {
    match &response.frames[0].field(VALUES_FIELD).unwrap().values {
        FieldValues::Int64(values) => values.clone(),
        other => panic!("unexpected values column {:?}", other),
    }
}

fn time_count(response: &DataResponse) -> usize {
    response.frames[0].field(TIME_FIELD).unwrap().values.len()
}

#[tokio::test]
async fn test_success_and_malformed_payload() {
    let warehouse = warehouse_with_series();
    let batch = vec![
        BatchQuery::new("A", payload("A", "SELECT time, metric FROM cpu")),
        BatchQuery::new("B", b"{not json".to_vec()),
    ];

    let response = dispatcher(&warehouse)
        .dispatch(&ExecutionContext::background(), batch)
        .await;

    assert_eq!(response.len(), 2);

    let a = response.get("A").unwrap();
    assert!(!a.is_error());
    assert_eq!(values(a), vec![5, 7]);
    assert_eq!(time_count(a), 2);

    let b = response.get("B").unwrap();
    assert!(b.frames.is_empty());
    assert!(b.error.as_deref().unwrap().starts_with("ParseError"));

    assert_eq!(warehouse.open_clients(), 0);
}

#[tokio::test]
async fn test_job_status_failure() {
    let warehouse = MemoryWarehouse::new();
    warehouse.insert(
        "SELECT time, metric FROM missing",
        CannedResult::job_error("Not found: Table acme:metrics.missing"),
    );

    let response = dispatcher(&warehouse)
        .dispatch(
            &ExecutionContext::background(),
            vec![BatchQuery::new(
                "A",
                payload("A", "SELECT time, metric FROM missing"),
            )],
        )
        .await;

    let a = response.get("A").unwrap();
    assert!(a.frames.is_empty());
    let error = a.error.as_deref().unwrap();
    assert!(error.contains("ExecutionError(job-status)"));
    assert!(error.contains("metrics.missing"));
    assert_eq!(warehouse.open_clients(), 0);
    assert_eq!(warehouse.closed_clients(), 1);
}

#[tokio::test]
async fn test_wait_and_mid_stream_failures() {
    let warehouse = warehouse_with_series();
    warehouse.insert(
        "SELECT time, metric FROM flaky",
        CannedResult::wait_error("backend 500"),
    );
    warehouse.insert(
        "SELECT time, metric FROM reset",
        CannedResult::rows(vec![
            json!({"time": T1, "metric": 1}),
            json!({"time": T2, "metric": 2}),
        ])
        .with_read_error_after(1),
    );

    let batch = vec![
        BatchQuery::new("flaky", payload("flaky", "SELECT time, metric FROM flaky")),
        BatchQuery::new("reset", payload("reset", "SELECT time, metric FROM reset")),
        BatchQuery::new("cpu", payload("cpu", "SELECT time, metric FROM cpu")),
    ];
    let response = dispatcher(&warehouse)
        .dispatch(&ExecutionContext::background(), batch)
        .await;

    let flaky = response.get("flaky").unwrap();
    assert!(flaky.frames.is_empty());
    assert!(flaky
        .error
        .as_deref()
        .unwrap()
        .starts_with("ExecutionError(wait)"));

    let reset = response.get("reset").unwrap();
    assert!(reset.frames.is_empty());
    let error = reset.error.as_deref().unwrap();
    assert!(error.starts_with("ExecutionError(row-decode)"));
    assert!(error.contains("connection reset"));

    assert_eq!(values(response.get("cpu").unwrap()), vec![5, 7]);
    assert_eq!(warehouse.open_clients(), 0);
    assert_eq!(warehouse.closed_clients(), 3);
}

#[tokio::test]
async fn test_empty_batch() {
    let warehouse = MemoryWarehouse::new();
    let response = dispatcher(&warehouse)
        .dispatch(&ExecutionContext::background(), Vec::new())
        .await;

    assert!(response.is_empty());
    assert_eq!(response.to_json(), r#"{"responses":{}}"#);
}

#[tokio::test]
async fn test_one_entry_per_query() {
    let warehouse = warehouse_with_series();
    let batch: Vec<BatchQuery> = (0..25)
        .map(|i| {
            let id = format!("Q{}", i);
            let sql = if i % 3 == 0 {
                "SELECT nothing"
            } else {
                "SELECT time, metric FROM cpu"
            };
            BatchQuery::new(id.clone(), payload(&id, sql))
        })
        .collect();

    let response = dispatcher(&warehouse)
        .dispatch(&ExecutionContext::background(), batch)
        .await;

    assert_eq!(response.len(), 25);
    for i in 0..25 {
        let entry = response.get(&format!("Q{}", i)).unwrap();
        assert_eq!(entry.is_error(), i % 3 == 0, "Q{}", i);
    }
    assert_eq!(response.error_count(), 9);
    assert_eq!(warehouse.open_clients(), 0);
}

#[tokio::test]
async fn test_one_bad_query_in_ten() {
    let warehouse = warehouse_with_series();
    let mut batch: Vec<BatchQuery> = (0..9)
        .map(|i| {
            let id = format!("ok-{}", i);
            BatchQuery::new(id.clone(), payload(&id, "SELECT time, metric FROM cpu"))
        })
        .collect();
    batch.insert(4, BatchQuery::new("bad", br#"{"rawSql": 42}"#.to_vec()));

    let response = dispatcher(&warehouse)
        .dispatch(&ExecutionContext::background(), batch)
        .await;

    assert_eq!(response.len(), 10);
    assert_eq!(response.error_count(), 1);
    assert!(response.get("bad").unwrap().is_error());
    for i in 0..9 {
        assert_eq!(values(response.get(&format!("ok-{}", i)).unwrap()), vec![5, 7]);
    }
}

#[tokio::test]
async fn test_cancelled_before_dispatch() {
    let warehouse = warehouse_with_series();
    let (cancel, ctx) = ExecutionContext::new();
    cancel.cancel();

    let batch = vec![
        BatchQuery::new("A", payload("A", "SELECT time, metric FROM cpu")),
        BatchQuery::new("B", payload("B", "SELECT time, metric FROM cpu")),
    ];
    let response = dispatcher(&warehouse).dispatch(&ctx, batch).await;

    assert_eq!(response.len(), 2);
    for id in ["A", "B"] {
        let entry = response.get(id).unwrap();
        assert!(entry.frames.is_empty());
        assert!(entry.error.as_deref().unwrap().starts_with("Cancelled"));
    }
    assert_eq!(warehouse.open_clients(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_mid_wait() {
    let warehouse = MemoryWarehouse::new();
    warehouse.insert(
        "SELECT time, metric FROM slow",
        CannedResult::rows(vec![json!({"time": T1, "metric": 1})])
            .with_delay(Duration::from_secs(600)),
    );
    warehouse.insert(
        "SELECT time, metric FROM fast",
        CannedResult::rows(vec![json!({"time": T1, "metric": 3})]),
    );

    let (cancel, ctx) = ExecutionContext::new();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let batch = vec![
        BatchQuery::new("slow", payload("slow", "SELECT time, metric FROM slow")),
        BatchQuery::new("fast", payload("fast", "SELECT time, metric FROM fast")),
    ];
    let response = dispatcher(&warehouse).dispatch(&ctx, batch).await;

    assert_eq!(values(response.get("fast").unwrap()), vec![3]);
    let slow = response.get("slow").unwrap();
    assert!(slow.frames.is_empty());
    assert!(slow.error.as_deref().unwrap().starts_with("Cancelled"));
    assert_eq!(warehouse.open_clients(), 0);
    assert_eq!(warehouse.closed_clients(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_query_timeout_spares_siblings() {
    let warehouse = warehouse_with_series();
    warehouse.insert(
        "SELECT time, metric FROM slow",
        CannedResult::rows(Vec::new()).with_delay(Duration::from_secs(60)),
    );

    let dispatcher = QueryDispatcher::with_config(
        QueryExecutor::new(Arc::new(warehouse.clone())),
        DispatcherConfig::new().with_query_timeout(Duration::from_secs(5)),
    );
    let batch = vec![
        BatchQuery::new("slow", payload("slow", "SELECT time, metric FROM slow")),
        BatchQuery::new("cpu", payload("cpu", "SELECT time, metric FROM cpu")),
    ];
    let response = dispatcher.dispatch(&ExecutionContext::background(), batch).await;

    assert!(response
        .get("slow")
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .starts_with("Timeout"));
    assert_eq!(values(response.get("cpu").unwrap()), vec![5, 7]);
}

#[tokio::test]
async fn test_same_query_twice_is_equal() {
    let warehouse = warehouse_with_series();
    let executor = QueryExecutor::new(Arc::new(warehouse.clone()));
    let spec = QuerySpec::parse(&payload("A", "SELECT time, metric FROM cpu")).unwrap();
    let ctx = ExecutionContext::background();

    let first: RowSequence = executor.execute(&ctx, &spec).await.unwrap();
    let first = transform(first).await.unwrap();
    let second = transform(executor.execute(&ctx, &spec).await.unwrap())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.values(), &[5, 7]);
    assert_eq!(first.times().len(), first.values().len());
}

#[tokio::test]
async fn test_health_check() {
    let result = HealthReporter::new()
        .check_health(&ExecutionContext::background())
        .await;

    assert_eq!(result.status, HealthStatus::Ok);
    assert_eq!(result.message, HEALTHY_MESSAGE);
}
