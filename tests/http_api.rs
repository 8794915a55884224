use chrono::{SubsecRound, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use blip::config::QueryConfig;
use blip::models::{AttributeValue, Record};
use blip::query::QueryService;
use blip::schema::{AttributeKind, AttributeSpec, Schema};
use blip::server::router;
use blip::store::{InMemoryStore, Snapshot, Store};

fn schema() -> Schema {
    Schema::new(vec![
        AttributeSpec {
            name: "category".into(),
            kind: AttributeKind::Category,
            source: None,
            required: true,
            filterable: true,
            sortable: true,
            values: Vec::new(),
            label: None,
        },
        AttributeSpec {
            name: "value".into(),
            kind: AttributeKind::Number,
            source: None,
            required: false,
            filterable: false,
            sortable: true,
            values: Vec::new(),
            label: Some("Amount".into()),
        },
    ])
}

fn record(id: &str, category: &str, value: f64) -> Record {
    let mut attributes = BTreeMap::new();
    attributes.insert("category".into(), AttributeValue::Text(category.into()));
    attributes.insert("value".into(), AttributeValue::Number(value));
    Record {
        id: id.into(),
        attributes,
        last_updated: Utc::now().trunc_subsecs(0),
    }
}

/// Serves the API on an ephemeral port and returns its base URL.
async fn start_server() -> (String, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    store
        .apply_snapshot(&Snapshot {
            records: vec![record("1", "forest", 5.0), record("2", "desert", 3.0)],
            keep: BTreeSet::new(),
            stale_policy: Default::default(),
        })
        .await
        .unwrap();

    let config = QueryConfig {
        timeout_ms: 500,
        retry_after_secs: 15,
        max_limit: None,
    };
    let service = QueryService::new(store.clone(), schema(), &config);
    let app = router(Arc::new(service));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), store)
}

fn record_ids(body: &Value) -> Vec<String> {
    body["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn health_reports_version() {
    let (base, _store) = start_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn get_records_filters_and_sorts() {
    let (base, _store) = start_server().await;

    let resp = reqwest::get(format!("{}/records?category=forest", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(record_ids(&body), vec!["1"]);
    assert_eq!(body["total"], 1);
    assert_eq!(body["records"][0]["category"], "forest");
    assert_eq!(body["records"][0]["value"].as_f64(), Some(5.0));

    let body: Value = reqwest::get(format!("{}/records?sort=value&order=desc", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record_ids(&body), vec!["1", "2"]);

    let body: Value = reqwest::get(format!(
        "{}/records?category=forest&category=desert&sort=value&limit=1&offset=1",
        base
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(record_ids(&body), vec!["1"]);
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn post_query_accepts_json_body() {
    let (base, _store) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/records/query", base))
        .json(&json!({
            "filters": {"category": ["desert", "forest"]},
            "sort": {"attribute": "value", "direction": "asc"}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(record_ids(&body), vec!["2", "1"]);

    let resp = client
        .post(format!("{}/records/query", base))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    for misspelled in [
        json!({"filter": {"category": "forest"}}),
        json!({"sort": {"attribute": "value", "order": "desc"}}),
    ] {
        let resp = client
            .post(format!("{}/records/query", base))
            .json(&misspelled)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "accepted {}", misspelled);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn invalid_input_gets_structured_400() {
    let (base, _store) = start_server().await;

    let resp = reqwest::get(format!("{}/records?colour=red", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_filter");
    assert!(body["error"]["message"].as_str().unwrap().contains("colour"));

    let resp = reqwest::get(format!("{}/records?category=ocean", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = reqwest::get(format!("{}/records?sort=value&order=sideways", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_sort");

    // The server keeps answering after rejected queries.
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn filter_endpoints_list_labelled_values() {
    let (base, _store) = start_server().await;

    let body: Value = reqwest::get(format!("{}/filters/category", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body,
        json!([
            {"value": "desert", "label": "Desert"},
            {"value": "forest", "label": "Forest"}
        ])
    );

    let resp = reqwest::get(format!("{}/filters/value", base)).await.unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = reqwest::get(format!("{}/filters", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["filters"][0]["attribute"], "category");
    assert_eq!(body["filters"][0]["label"], "Category");
    let sorts: Vec<&str> = body["sorts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["label"].as_str().unwrap())
        .collect();
    assert_eq!(sorts, vec!["Category", "Amount"]);
}

#[tokio::test]
async fn store_outage_returns_503_with_retry_after() {
    let (base, store) = start_server().await;
    store.set_fail_reads(true);

    let resp = reqwest::get(format!("{}/records", base)).await.unwrap();
    assert_eq!(resp.status(), 503);
    assert_eq!(resp.headers()["retry-after"], "15");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "service_unavailable");

    store.set_fail_reads(false);
    let resp = reqwest::get(format!("{}/records", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let (base, _store) = start_server().await;
    let resp = reqwest::Client::new()
        .get(format!("{}/filters", base))
        .header("Origin", "http://ui.example")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
}
