use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lelang_watchbot::config::GitHubState;
use lelang_watchbot::error::StoreError;
use lelang_watchbot::github::GitHubStore;
use lelang_watchbot::seen::{SeenBackend, SeenSet};

const CONTENTS: &str = "/repos/owner/state/contents/seen_api.json";

fn store_for(server: &MockServer) -> GitHubStore {
    let cfg = GitHubState {
        api_url: server.uri(),
        repo: "owner/state".into(),
        token: "ghp_test".into(),
        ..Default::default()
    };
    GitHubStore::from_config(&cfg, Duration::from_secs(5)).unwrap()
}

fn encoded(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(text)
}

async fn put_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .expect("a PUT request");
    serde_json::from_slice(&put.body).unwrap()
}

fn decoded_ids(body: &Value) -> Vec<String> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(body["content"].as_str().unwrap())
        .unwrap();
    serde_json::from_slice(&raw).unwrap()
}

#[tokio::test]
async fn missing_file_is_an_empty_first_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONTENTS))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert!(!store.exists().await.unwrap());
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn legacy_line_content_is_loaded() {
    let server = MockServer::start().await;
    // The API wraps long base64 payloads with newlines.
    let content = encoded("101\n102\n\n103\n");
    let wrapped = format!("{}\n{}", &content[..8], &content[8..]);
    Mock::given(method("GET"))
        .and(path(CONTENTS))
        .and(header("authorization", "Bearer ghp_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "abc123",
            "encoding": "base64",
            "content": wrapped,
        })))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert!(store.exists().await.unwrap());
    let set = store.load().await.unwrap();
    assert_eq!(set.iter().collect::<Vec<_>>(), vec!["101", "102", "103"]);
}

#[tokio::test]
async fn save_updates_existing_file_with_its_sha() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONTENTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "abc123",
            "content": encoded("[\"A\"]"),
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(CONTENTS))
        .and(body_partial_json(json!({ "sha": "abc123" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let set: SeenSet = ["B", "A"].into_iter().collect();
    store_for(&server).save(&set).await.unwrap();

    let body = put_body(&server).await;
    assert_eq!(decoded_ids(&body), vec!["A", "B"]);
    assert!(body["message"].as_str().unwrap().contains("seen"));
}

#[tokio::test]
async fn save_creates_file_without_sha() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONTENTS))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(CONTENTS))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "content": {} })))
        .expect(1)
        .mount(&server)
        .await;

    store_for(&server)
        .save(&["X"].into_iter().collect())
        .await
        .unwrap();

    let body = put_body(&server).await;
    assert!(body.get("sha").is_none());
    assert!(body.get("branch").is_none());
    assert_eq!(decoded_ids(&body), vec!["X"]);
}

#[tokio::test]
async fn conflicting_write_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONTENTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "stale",
            "content": encoded("[]"),
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(CONTENTS))
        .respond_with(ResponseTemplate::new(409).set_body_string("sha does not match"))
        .mount(&server)
        .await;

    let err = store_for(&server)
        .save(&["A"].into_iter().collect())
        .await
        .unwrap_err();
    match err {
        StoreError::Remote { status, snippet } => {
            assert_eq!(status.as_u16(), 409);
            assert_eq!(snippet, "sha does not match");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn unauthorized_load_aborts_instead_of_starting_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONTENTS))
        .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
        .mount(&server)
        .await;

    assert!(matches!(
        store_for(&server).load().await,
        Err(StoreError::Remote { .. })
    ));
}
