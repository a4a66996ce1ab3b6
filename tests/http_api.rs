//! HTTP surface tests against a live server.

mod common;

use serde_json::json;

use common::*;

#[tokio::test]
async fn invoke_over_http_returns_tool_output() {
    let (addr, _state) = start_server().await;
    let _connection = connect_dispatcher(addr, test_dispatcher("s1", "a")).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/sessions/s1/tools/echo", addr))
        .json(&json!({"x": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["toolName"], "echo");
    assert_eq!(body["output"], json!({"x": 1}));
    assert!(body.get("error").is_none());
    assert!(!body["callId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn invoke_over_http_reports_tool_failure_in_body() {
    let (addr, _state) = start_server().await;
    let _connection = connect_dispatcher(addr, test_dispatcher("s1", "a")).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/sessions/s1/tools/missing", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body.get("output").is_none());
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn invoke_over_http_times_out() {
    let (addr, state) = start_server().await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/sessions/nobody/tools/echo", addr))
        .query(&[("timeout_ms", 100)])
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "tool_call_timeout");
    assert_eq!(state.broker.pending_count(), 0);
}

#[tokio::test]
async fn zero_timeout_is_rejected() {
    let (addr, _state) = start_server().await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/sessions/s1/tools/echo?timeout_ms=0", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn sessions_and_health_reflect_connected_dispatchers() {
    let (addr, _state) = start_server().await;
    let _connection = connect_dispatcher(addr, test_dispatcher("s1", "kernel-a")).await;
    let client = reqwest::Client::new();

    let sessions: serde_json::Value = client
        .get(format!("http://{}/sessions", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions[0]["sessionId"], "s1");
    assert_eq!(sessions[0]["kernelId"], "kernel-a");

    let health: serde_json::Value = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["sessions"], 1);
}
