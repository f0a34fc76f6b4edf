//! HTTP API tests against a live server on a free port.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{find_free_port, instructional, test_config, wait_for_server, FakeCatalog, FakeClassifier};
use reel_curator::app::{App, Collaborators};
use reel_curator::server::run_server_with_app;
use reel_curator::traits::NoTranscripts;
use serde_json::{json, Value};
use tempfile::TempDir;

async fn start_server(tmp: &TempDir) -> u16 {
    let port = find_free_port();
    let config = test_config(tmp, port);
    let collaborators = Collaborators {
        catalog: Arc::new(FakeCatalog::new().with_page(
            "danaher back take",
            &[("A", "Back take system", 900), ("S", "Back take in 60s", 60)],
        )),
        classifier: Arc::new(FakeClassifier::replying(instructional(85))),
        transcripts: Arc::new(NoTranscripts),
    };
    let app = App::with_collaborators(&config, collaborators).await.unwrap();
    tokio::spawn(async move {
        let _ = run_server_with_app(app).await;
    });
    wait_for_server(port).await;
    port
}

async fn wait_for_terminal(client: &reqwest::Client, base: &str, run_id: &str) -> Value {
    for _ in 0..100 {
        let state: Value = client
            .get(format!("{}/runs/{}", base, run_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if state["status"] != "running" {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {} did not finish", run_id);
}

#[tokio::test]
async fn health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let port = start_server(&tmp).await;

    let body: Value = reqwest::get(format!("http://127.0.0.1:{}/health", port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn run_lifecycle_over_http() {
    let tmp = TempDir::new().unwrap();
    let port = start_server(&tmp).await;
    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/runs", base))
        .json(&json!({
            "target_entity": "John Danaher",
            "queries": ["danaher back take"],
            "min_quality": 70
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let run_id = resp.json::<Value>().await.unwrap()["run_id"]
        .as_str()
        .unwrap()
        .to_string();

    let state = wait_for_terminal(&client, &base, &run_id).await;
    assert_eq!(state["status"], "complete");
    assert_eq!(state["summary"]["approved"], 1);
    assert_eq!(state["summary"]["rejected"], 1);
    assert_eq!(state["summary"]["added"][0]["external_id"], "A");

    // A finished run replays its backlog and the stream ends.
    let sse = client
        .get(format!("{}/runs/{}/events", base, run_id))
        .send()
        .await
        .unwrap();
    assert_eq!(sse.status(), 200);
    let body = tokio::time::timeout(Duration::from_secs(5), sse.text())
        .await
        .expect("event stream did not close")
        .unwrap();
    assert!(body.contains("event: search"));
    assert!(body.contains("event: added"));
    assert!(body.contains("event: done"));
    assert!(body.contains("too short: 60s < 120s minimum"));

    // Cancelling a finished run is a no-op.
    let cancel: Value = client
        .post(format!("{}/runs/{}/cancel", base, run_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancel["cancelled"], false);
}

#[tokio::test]
async fn invalid_run_request_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let port = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://127.0.0.1:{}/runs", port))
        .json(&json!({ "target_entity": "", "queries": ["x"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let port = start_server(&tmp).await;
    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();

    for url in [
        format!("{}/runs/nope", base),
        format!("{}/runs/nope/events", base),
    ] {
        let resp = client.get(url).send().await.unwrap();
        assert_eq!(resp.status(), 404);
    }
    let resp = client
        .post(format!("{}/runs/nope/cancel", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn feedback_and_review_endpoints() {
    let tmp = TempDir::new().unwrap();
    let port = start_server(&tmp).await;
    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();

    let run_id = client
        .post(format!("{}/runs", base))
        .json(&json!({ "target_entity": "John Danaher", "queries": ["danaher back take"] }))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap()["run_id"]
        .as_str()
        .unwrap()
        .to_string();
    let state = wait_for_terminal(&client, &base, &run_id).await;
    assert_eq!(state["status"], "complete");

    let resp = client
        .post(format!("{}/records/A/feedback", base))
        .json(&json!({ "helpful": false, "category": "too_advanced" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{}/records/A/feedback", base))
        .json(&json!({ "helpful": true, "category": "boring" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/records/missing/feedback", base))
        .json(&json!({ "helpful": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // One vote is far below the evidence threshold.
    let report: Value = client
        .post(format!("{}/lifecycle/review", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["reviewed"], 0);
    assert_eq!(report["removed"], 0);
}
