use std::fs;
use std::path::PathBuf;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lepotato::config::BackendConfig;
use lepotato::service::HttpChatService;
use lepotato::storage::SqliteChatCache;

#[allow(dead_code)]
pub fn create_temp_cache() -> (SqliteChatCache, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let cache = SqliteChatCache::new_with_path(tmp.path().join("chats.db"))
        .expect("failed to create chat cache with path");
    (cache, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Service pointed at a mock server
#[allow(dead_code)]
pub fn service_for(server: &MockServer) -> HttpChatService {
    HttpChatService::new(&BackendConfig {
        base_url: server.uri(),
        timeout_seconds: 5,
    })
    .expect("failed to build service")
}

/// Stream body of `data:` lines terminated by `[DONE]`
#[allow(dead_code)]
pub fn sse(payloads: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for payload in payloads {
        body.push_str(&format!("data: {}\n\n", payload));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Serve `GET /chat/{id}` with the given conversation
#[allow(dead_code)]
pub async fn mount_chat(server: &MockServer, id: &str, title: &str, conversations: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/chat/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chatId": id,
            "title": title,
            "conversations": conversations,
            "created_at": "2025-03-01T12:00:00.000000"
        })))
        .mount(server)
        .await;
}

/// Accept every write endpoint the send cycle touches
#[allow(dead_code)]
pub async fn mount_writes(server: &MockServer) {
    let ok = || ResponseTemplate::new(200).set_body_json(json!({"status": "success"}));

    Mock::given(method("POST"))
        .and(wiremock::matchers::path_regex(r"^/chat/[^/]+/save$"))
        .respond_with(ok())
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(wiremock::matchers::path_regex(r"^/chat/[^/]+/position$"))
        .respond_with(ok())
        .mount(server)
        .await;
}
