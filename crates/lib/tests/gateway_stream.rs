//! Integration tests: the stream client and chat session against a mock gateway.

use lib::config::{Settings, SettingsStore};
use lib::gateway::{ChatMessage, GatewayClient, GatewayError, SessionConfig, StreamEvent};
use lib::session::{ChatSession, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn sse(deltas: &[&str], done: bool) -> String {
    let mut body = String::from(": connected\n\n");
    for d in deltas {
        body.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "index": 0, "delta": { "content": d } }] })
        ));
    }
    if done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

fn chunks(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn streams_deltas_with_auth_and_agent_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer secret"))
        .and(header("x-openclaw-agent-id", "ops"))
        .and(body_partial_json(serde_json::json!({
            "model": "openclaw",
            "stream": true,
            "user": "clawface-app",
            "messages": [{ "role": "user", "content": "hello" }]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&["Hi", " there"], true), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = SessionConfig {
        gateway_base_url: format!("{}/", server.uri()),
        model_id: None,
        agent_id: Some("ops".to_string()),
        auth_token: Some("secret".to_string()),
    };
    let events = GatewayClient::new()
        .stream_chat(config, vec![ChatMessage::user("hello")], CancellationToken::new())
        .collect()
        .await;

    assert_eq!(chunks(&events), vec!["Hi", " there"]);
    assert_eq!(events.len(), 3);
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn malformed_lines_are_skipped_and_missing_sentinel_still_completes() {
    let server = MockServer::start().await;
    let mut body = sse(&["a"], false);
    body.push_str("data: {\"choices\": [\n\n");
    body.push_str(&sse(&["b"], false));
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let events = GatewayClient::new()
        .stream_chat(
            SessionConfig::new(server.uri()),
            vec![ChatMessage::user("q")],
            CancellationToken::new(),
        )
        .collect()
        .await;
    assert_eq!(chunks(&events), vec!["a", "b"]);
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn non_success_status_yields_http_error_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_raw(
            r#"{"error":{"message":"invalid token"}}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let events = GatewayClient::new()
        .stream_chat(
            SessionConfig::new(server.uri()),
            vec![ChatMessage::user("x")],
            CancellationToken::new(),
        )
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Error(GatewayError::Http { status, body }) => {
            assert_eq!(*status, 401);
            assert!(body.contains("invalid token"));
        }
        other => panic!("expected http error, got {:?}", other),
    }
}

#[tokio::test]
async fn html_error_page_is_reported_as_misconfiguration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_raw(
            "<!DOCTYPE html><html><head><title>Gateway</title></head></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let events = GatewayClient::new()
        .stream_chat(
            SessionConfig::new(server.uri()),
            vec![ChatMessage::user("x")],
            CancellationToken::new(),
        )
        .collect()
        .await;
    assert!(matches!(
        events.as_slice(),
        [StreamEvent::Error(GatewayError::GatewayMisconfigured)]
    ));
}

#[tokio::test]
async fn cancelling_before_any_chunk_yields_only_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&["never"], true), "text/event-stream")
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let stream = GatewayClient::new().stream_chat(
        SessionConfig::new(server.uri()),
        vec![ChatMessage::user("x")],
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let events = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .expect("stream ends promptly after cancel");
    assert!(matches!(events.as_slice(), [StreamEvent::Cancelled]));
}

#[tokio::test]
async fn already_cancelled_token_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let events = GatewayClient::new()
        .stream_chat(SessionConfig::new(server.uri()), Vec::new(), cancel)
        .collect()
        .await;
    assert!(matches!(events.as_slice(), [StreamEvent::Cancelled]));
}

#[tokio::test]
async fn check_connection_accepts_api_responses_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({ "max_tokens": 1 })))
        .respond_with(
            ResponseTemplate::new(401).set_body_raw(r#"{"error":"unauthorized"}"#, "application/json"),
        )
        .mount(&server)
        .await;
    let client = GatewayClient::new();
    assert!(client.check_connection(&server.uri(), "").await);

    let html = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"))
        .mount(&html)
        .await;
    assert!(!client.check_connection(&html.uri(), "tok").await);

    let unreachable = format!("http://127.0.0.1:{}", free_port());
    assert!(!client.check_connection(&unreachable, "").await);
}

#[tokio::test]
async fn check_connection_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("{}", "application/json")
                .set_delay(Duration::from_secs(6)),
        )
        .mount(&server)
        .await;
    let started = std::time::Instant::now();
    assert!(!GatewayClient::new().check_connection(&server.uri(), "").await);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn list_models_reads_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer t"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            serde_json::json!({
                "object": "list",
                "data": [{ "id": "openclaw", "object": "model" }, { "id": "llama3", "object": "model" }]
            })
            .to_string(),
            "application/json",
        ))
        .mount(&server)
        .await;

    let mut config = SessionConfig::new(server.uri());
    config.auth_token = Some("t".to_string());
    let models = GatewayClient::new().list_models(&config).await.expect("list models");
    let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["openclaw", "llama3"]);
}

fn session_for(server: &MockServer) -> ChatSession {
    let settings = Settings {
        gateway_url: server.uri(),
        model: "test-model".to_string(),
        ..Settings::default()
    };
    ChatSession::new(
        GatewayClient::new(),
        Arc::new(SettingsStore::in_memory(settings)),
    )
}

#[tokio::test]
async fn session_turn_against_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({ "model": "test-model" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&["Hi", " there"], true), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let session = session_for(&server);
    let handle = session.send_message("hello").expect("send accepted");
    assert_eq!(session.messages().len(), 2);
    handle.await.unwrap();

    let msgs = session.messages();
    assert_eq!(msgs[0].content, "hello");
    assert_eq!(msgs[1].content, "Hi there");
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.error(), None);
}

#[tokio::test]
async fn session_unauthorized_turn_rolls_back_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_raw(
            r#"{"error":{"message":"unauthorized"}}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let session = session_for(&server);
    session.send_message("x").expect("send accepted").await.unwrap();

    assert_eq!(session.messages().len(), 1);
    assert!(session.error().unwrap().contains("401"));
    session.clear_error();
    assert_eq!(session.error(), None);
}
