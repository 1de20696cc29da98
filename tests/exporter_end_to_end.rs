//! End-to-end drain-loop scenarios against a mock ingestion endpoint.
//!
//! These mirror the upstream exporter's `test_base_exporter.py`
//! `_transmit_from_storage` scenarios (`SPEC_FULL.md` §8 S1-S5): a real
//! `reqwest` client talks to a local `wiremock` server instead of a faked
//! transport, so the HTTP layer is exercised along with the classification
//! logic.

use std::time::Duration;

use azure_monitor_exporter::{BaseData, Data, Envelope, Exporter, Options};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VALID_KEY: &str = "1bbd944a-73a0-5d89-eab5-d3740a213ee7";

fn sample_envelope(name: &str) -> Envelope {
    Envelope::new(
        "key",
        "time",
        "Microsoft.ApplicationInsights.Request",
        Data {
            base_type: "RequestData".into(),
            base_data: BaseData {
                ver: 2,
                id: "id".into(),
                name: name.into(),
                duration: "0.00:00:00.000".into(),
                ..Default::default()
            },
        },
    )
}

async fn exporter_against(server: &MockServer, dir: &std::path::Path) -> Exporter {
    let options = Options::builder()
        .instrumentation_key(VALID_KEY)
        .endpoint(format!("{}/v2/track", server.uri()))
        .storage_path(dir.to_path_buf())
        .storage_max_size(1024 * 1024)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    Exporter::new(options).unwrap()
}

#[tokio::test]
async fn s1_200_ok_drains_the_whole_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/track"))
        .respond_with(ResponseTemplate::new(200).set_body_string("unknown"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let exporter = exporter_against(&server, dir.path()).await;
    exporter.export(vec![sample_envelope("a")]);

    exporter.transmit_from_storage().await;

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    exporter.shutdown();
}

#[tokio::test]
async fn s2_500_keeps_the_blob_for_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/track"))
        .respond_with(ResponseTemplate::new(500).set_body_string("{}"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let exporter = exporter_against(&server, dir.path()).await;
    exporter.export(vec![sample_envelope("a")]);

    exporter.transmit_from_storage().await;

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    exporter.shutdown();
}

#[tokio::test]
async fn s3_206_partial_success_keeps_only_the_retryable_item() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "itemsReceived": 3,
        "itemsAccepted": 1,
        "errors": [
            {"index": 0, "statusCode": 400},
            {"index": 2, "statusCode": 500, "message": "Internal Server Error"}
        ]
    });
    Mock::given(method("POST"))
        .and(path("/v2/track"))
        .respond_with(ResponseTemplate::new(206).set_body_json(body))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let exporter = exporter_against(&server, dir.path()).await;
    exporter.export(vec![sample_envelope("a"), sample_envelope("b"), sample_envelope("test")]);

    exporter.transmit_from_storage().await;

    let remaining = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(remaining, 1);
    exporter.shutdown();
}

#[tokio::test]
async fn s4_206_malformed_body_is_treated_as_success() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "itemsReceived": 1,
        "itemsAccepted": 0,
        "errors": [{"foo": 0, "bar": 1}]
    });
    Mock::given(method("POST"))
        .and(path("/v2/track"))
        .respond_with(ResponseTemplate::new(206).set_body_json(body))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let exporter = exporter_against(&server, dir.path()).await;
    exporter.export(vec![sample_envelope("a")]);

    exporter.transmit_from_storage().await;

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    exporter.shutdown();
}

#[tokio::test]
async fn s5_transport_failure_keeps_the_blob() {
    // Start a server, capture its address, then drop it so the port stops
    // accepting connections -- a genuine transport-level failure rather
    // than an HTTP error response.
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let dir = tempfile::tempdir().unwrap();
    let options = Options::builder()
        .instrumentation_key(VALID_KEY)
        .endpoint(format!("{uri}/v2/track"))
        .storage_path(dir.path().to_path_buf())
        .storage_max_size(1024 * 1024)
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let exporter = Exporter::new(options).unwrap();
    exporter.export(vec![sample_envelope("a")]);

    exporter.transmit_from_storage().await;

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    exporter.shutdown();
}

#[tokio::test]
async fn drain_stops_after_a_whole_batch_retryable_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/track"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let exporter = exporter_against(&server, dir.path()).await;
    exporter.export(vec![sample_envelope("a")]);
    exporter.export(vec![sample_envelope("b")]);

    exporter.transmit_from_storage().await;

    // Both blobs remain: the first retryable failure stops the drain
    // instead of hammering the endpoint with the rest of the queue.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    exporter.shutdown();
}
