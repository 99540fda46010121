use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use adlens_agents::{
    Orchestrator, ReasoningEngine, ReasoningOutput, ToolDefinition, ToolInvoker, ToolRegistry,
};
use adlens_auth::{AccountDirectory, CredentialService, RefreshedCredential, TokenExchanger};
use adlens_common::{ChatMessage, Result};
use adlens_config::AppConfig;
use adlens_db::{CheckpointStore, CredentialStore, MemoryStore, PatternStore, SessionStore};
use adlens_gateway::{AppState, build_router};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

struct ScriptedReasoner {
    script: std::sync::Mutex<VecDeque<ReasoningOutput>>,
}

#[async_trait]
impl ReasoningEngine for ScriptedReasoner {
    async fn reason(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ReasoningOutput> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ReasoningOutput::text("fallback answer")))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

struct StubExchanger;

#[async_trait]
impl TokenExchanger for StubExchanger {
    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedCredential> {
        Ok(RefreshedCredential {
            access_token: "fresh".into(),
            expires_at: None,
        })
    }
}

struct StubDirectory;

#[async_trait]
impl AccountDirectory for StubDirectory {
    async fn list_accounts(&self, _access_token: &str) -> Result<Vec<String>> {
        Ok(vec!["acct-1".into()])
    }
}

async fn start_server(outputs: Vec<ReasoningOutput>) -> SocketAddr {
    let reasoner: Arc<dyn ReasoningEngine> = Arc::new(ScriptedReasoner {
        script: std::sync::Mutex::new(outputs.into()),
    });

    let credential_store = CredentialStore::in_memory().expect("credential store should open");
    credential_store
        .insert_credential("local", "ads", "token", "refresh", None)
        .expect("seed credential");
    let credentials = Arc::new(CredentialService::new(
        Arc::new(Mutex::new(credential_store)),
        Arc::new(StubExchanger),
        Arc::new(StubDirectory),
        Duration::from_secs(300),
    ));

    let registry = Arc::new(ToolRegistry::new());
    let checkpoints = Arc::new(Mutex::new(
        CheckpointStore::in_memory().expect("checkpoint store should open"),
    ));
    let memory = Arc::new(Mutex::new(
        MemoryStore::in_memory().expect("memory store should open"),
    ));
    let patterns = Arc::new(Mutex::new(
        PatternStore::in_memory().expect("pattern store should open"),
    ));
    let sessions = Arc::new(Mutex::new(
        SessionStore::in_memory().expect("session store should open"),
    ));

    let config = AppConfig::default();
    let orchestrator = Arc::new(Orchestrator::new(
        reasoner.clone(),
        registry.clone(),
        ToolInvoker::new(registry, credentials.clone()),
        credentials,
        sessions.clone(),
        checkpoints,
        memory.clone(),
        patterns,
        config.orchestrator.clone(),
        config.memory.clone(),
    ));

    let state = Arc::new(AppState::new(
        config,
        orchestrator,
        reasoner,
        sessions,
        memory,
    ));
    let app = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn chat_round_trip_creates_session_and_returns_blocks() {
    let addr = start_server(vec![ReasoningOutput::text("You spent $42 last week.")]).await;
    let client = reqwest::Client::new();

    let reply: Value = client
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({ "message": "how much did I spend last week?" }))
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("reply should be json");

    let session_id = reply["session_id"].as_str().expect("session id");
    assert!(!session_id.is_empty());
    assert_eq!(reply["response"]["blocks"][0]["type"], "text");
    assert!(
        reply["response"]["blocks"][0]["text"]
            .as_str()
            .unwrap()
            .contains("$42")
    );

    // The transcript is persisted and retrievable
    let history: Value = client
        .get(format!("http://{addr}/api/sessions/{session_id}/history"))
        .send()
        .await
        .expect("history request should succeed")
        .json()
        .await
        .expect("history should be json");

    let messages = history["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
}

#[tokio::test]
async fn second_message_reuses_the_session() {
    let addr = start_server(vec![
        ReasoningOutput::text("First."),
        ReasoningOutput::text("Second."),
    ])
    .await;
    let client = reqwest::Client::new();

    let first: Value = client
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({ "message": "hello" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = first["session_id"].as_str().unwrap().to_string();

    let second: Value = client
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({ "message": "hello again", "session_id": session_id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(second["session_id"].as_str().unwrap(), session_id);

    let history: Value = client
        .get(format!("http://{addr}/api/sessions/{session_id}/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["messages"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let addr = start_server(Vec::new()).await;
    let client = reqwest::Client::new();

    let status = client
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({ "message": "   " }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_session_history_is_not_found() {
    let addr = start_server(Vec::new()).await;
    let client = reqwest::Client::new();

    let status = client
        .get(format!("http://{addr}/api/sessions/no-such-session/history"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_reasoning_status() {
    let addr = start_server(Vec::new()).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["reasoning"], "ok");
}
