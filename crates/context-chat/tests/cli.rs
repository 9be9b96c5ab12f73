//! Tests that run the `ctx-chat` binary.

use axum::{http::StatusCode, Json, Router};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn mock_model() -> String {
    async fn reply(Json(_body): Json<Value>) -> (StatusCode, Json<Value>) {
        (
            StatusCode::OK,
            Json(json!({
                "candidates": [{ "content": { "role": "model", "parts": [{ "text": "hi there" }] } }]
            })),
        )
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().fallback(reply)).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Write a config that keeps everything in process except the model.
fn setup_env(port: u16, model_url: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("chat.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[server]
bind = "127.0.0.1:{port}"

[session]
backend = "memory"

[retrieval]
backend = "memory"

[generation]
base_url = "{model_url}"
api_key_env = "CTX_CHAT_TEST_KEY"

[client]
server_url = "http://127.0.0.1:{port}"
"#
        ),
    )
    .unwrap();
    (tmp, config_path)
}

fn ctx_chat(config_path: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ctx-chat"));
    cmd.arg("--config")
        .arg(config_path)
        .env("CTX_CHAT_TEST_KEY", "test-key")
        .env_remove("REDIS_URL")
        .env_remove("QDRANT_URL")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

fn start_server(config_path: &Path) -> Child {
    ctx_chat(config_path)
        .arg("serve")
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to start server: {}", e))
}

async fn wait_for_server(port: u16) {
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = reqwest::get(&url).await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

#[tokio::test]
async fn test_serve_then_history() {
    let port = find_free_port();
    let model_url = mock_model().await;
    let (_tmp, config_path) = setup_env(port, &model_url);

    let _server = start_server(&config_path);
    wait_for_server(port).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/chat/query/cli-session", port))
        .json(&json!({ "message": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["answer"], "hi there");

    let output = ctx_chat(&config_path)
        .args(["history", "cli-session"])
        .output()
        .await
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("user: hello"), "{}", stdout);
    assert!(stdout.contains("assistant: hi there"), "{}", stdout);
}

#[tokio::test]
async fn test_serve_without_api_key_fails() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_env(port, "http://127.0.0.1:9");

    let output = ctx_chat(&config_path)
        .env_remove("CTX_CHAT_TEST_KEY")
        .arg("serve")
        .output()
        .await
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("CTX_CHAT_TEST_KEY"), "{}", stderr);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("chat.toml");
    std::fs::write(&config_path, "[retrieval]\ntop_k = 0\n").unwrap();

    let output = ctx_chat(&config_path)
        .args(["history", "s1"])
        .output()
        .await
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("top_k"));
}
