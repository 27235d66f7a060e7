#![cfg(unix)]

mod common;

use reqwest::StatusCode;
use trybook_server::AuthConfig;

#[tokio::test]
async fn health_is_plain_ok() {
    let t = common::start(AuthConfig::default()).await;
    let resp = t.client.get(t.url("/healthz")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn invalid_repo_input_is_a_client_error() {
    let t = common::start(AuthConfig::default()).await;
    for (input, needle) in [
        ("", "empty input"),
        ("https://gitlab.com/acme/widgets", "only github.com"),
        ("acme", "org/repo"),
        ("acme/wid gets", "invalid org or repo"),
    ] {
        let resp = t
            .client
            .post(t.url("/api/notebooks"))
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "input {input:?}");
        let body = resp.text().await.unwrap();
        assert!(body.contains(needle), "input {input:?}: {body}");
    }
}

#[tokio::test]
async fn clone_failure_is_a_bad_gateway() {
    let t = common::start(AuthConfig::default()).await;
    let resp = t
        .client
        .post(t.url("/api/notebooks"))
        .json(&serde_json::json!({ "input": "acme/missing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = resp.text().await.unwrap();
    assert!(body.contains("acme/missing"), "{body}");
}

#[tokio::test]
async fn unknown_notebook_and_entry() {
    let t = common::start(AuthConfig::default()).await;

    let resp = t
        .client
        .get(t.url("/api/notebooks/0123456789abcdef01234567"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = t.run_request("0123456789abcdef01234567", "0", "gemini").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let nb = t.create_notebook("acme/widgets").await["id"]
        .as_str()
        .unwrap()
        .to_owned();
    let resp = t.run_request(&nb, "3", "gemini").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = t.run_request(&nb, "zero", "gemini").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    t.append(&nb, "hello").await;
    let resp = t.run_request(&nb, "0", "gpt").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = t
        .client
        .post(t.url(&format!("/api/notebooks/{nb}/entries")))
        .json(&serde_json::json!({ "prompt": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_model_defaults_to_gemini() {
    let t = common::start(AuthConfig::default()).await;
    let nb = t.create_notebook("acme/widgets").await["id"]
        .as_str()
        .unwrap()
        .to_owned();
    t.append(&nb, "hello").await;

    let resp = t.run_request(&nb, "0", "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.text().await.unwrap();
    assert!(body.starts_with("Starting gemini...\n\ngemini: hello"), "{body}");
}
