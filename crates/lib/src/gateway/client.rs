//! Gateway client: connectivity probe, model listing and streaming chat completions.
//!
//! Streaming runs on a spawned task and reports through a [`ChatStream`]: zero or more
//! [`StreamEvent::Chunk`]s followed by exactly one terminal event (`Done`, `Error` or
//! `Cancelled`).

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::protocol::{
    ChatCompletionRequest, ChatMessage, GatewayModel, ModelsResponse, AGENT_ID_HEADER,
    CLIENT_USER, DEFAULT_MODEL,
};
use super::sse::{SseDecoder, SseFrame};
use super::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};

/// Gateway used when the configured base URL is blank.
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:18789";

/// Fixed timeout for [`GatewayClient::check_connection`].
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Gateway returned HTML instead of API response. Check your auth token in Settings.")]
    GatewayMisconfigured,
    #[error("invalid gateway response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Per-request view of the settings the client needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    pub gateway_base_url: String,
    pub model_id: Option<String>,
    /// Routing hint forwarded as `x-openclaw-agent-id`.
    pub agent_id: Option<String>,
    pub auth_token: Option<String>,
}

impl SessionConfig {
    pub fn new(gateway_base_url: impl Into<String>) -> Self {
        Self {
            gateway_base_url: gateway_base_url.into(),
            ..Self::default()
        }
    }

    /// Base URL without trailing slashes, or [`DEFAULT_GATEWAY_URL`] when blank.
    pub fn base_url(&self) -> String {
        resolve_base_url(&self.gateway_base_url)
    }

    pub fn model(&self) -> &str {
        self.model_id
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(token) = non_blank(&self.auth_token) {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        if let Some(agent) = non_blank(&self.agent_id) {
            headers.push((AGENT_ID_HEADER.to_string(), agent.to_string()));
        }
        headers
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn resolve_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() {
        DEFAULT_GATEWAY_URL.to_string()
    } else {
        url.to_string()
    }
}

/// Events produced by one streaming request, in stream order.
#[derive(Debug)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(GatewayError),
    /// The cancellation token fired; not an error.
    Cancelled,
}

/// Receiving side of [`GatewayClient::stream_chat`].
pub struct ChatStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ChatStream {
    /// Next event; `None` after the terminal event has been received.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Collect every remaining event (including the terminal one).
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(ev) = self.rx.recv().await {
            events.push(ev);
        }
        events
    }
}

enum Outcome {
    Done,
    Cancelled,
}

/// Client for an OpenAI-compatible gateway.
#[derive(Clone)]
pub struct GatewayClient {
    transport: Arc<dyn Transport>,
}

impl Default for GatewayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayClient {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Probe the gateway with a one-token completion. True when something that looks
    /// like the API answered within [`CHECK_TIMEOUT`]; an HTML page (login screen,
    /// reverse proxy) or any failure counts as unreachable.
    pub async fn check_connection(&self, base_url: &str, token: &str) -> bool {
        let config = SessionConfig {
            gateway_base_url: base_url.to_string(),
            auth_token: Some(token.to_string()),
            ..SessionConfig::default()
        };
        let messages = [ChatMessage::user("ping")];
        let body = ChatCompletionRequest {
            model: DEFAULT_MODEL,
            messages: &messages,
            stream: false,
            user: None,
            max_tokens: Some(1),
        };
        let body = match serde_json::to_vec(&body) {
            Ok(b) => b,
            Err(_) => return false,
        };
        let request = HttpRequest {
            method: Method::Post,
            url: format!("{}/v1/chat/completions", config.base_url()),
            headers: config.headers(),
            body: Some(body),
        };
        match tokio::time::timeout(CHECK_TIMEOUT, self.transport.send(request)).await {
            Ok(Ok(res)) => looks_like_api(&res),
            Ok(Err(e)) => {
                log::debug!("connection check failed: {}", e);
                false
            }
            Err(_) => {
                log::debug!("connection check timed out after {:?}", CHECK_TIMEOUT);
                false
            }
        }
    }

    /// GET /v1/models — models advertised by the gateway.
    pub async fn list_models(&self, config: &SessionConfig) -> Result<Vec<GatewayModel>, GatewayError> {
        let request = HttpRequest {
            method: Method::Get,
            url: format!("{}/v1/models", config.base_url()),
            headers: config.headers(),
            body: None,
        };
        let res = self.transport.send(request).await?;
        if !res.is_success() {
            return Err(error_for_status(res).await);
        }
        let text = res.text().await?;
        let data: ModelsResponse = serde_json::from_str(&text)?;
        Ok(data
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|m| GatewayModel { id: m.id })
            .collect())
    }

    /// POST /v1/chat/completions with `stream: true`. Returns immediately; the request
    /// runs on a spawned task until `[DONE]`, end of body, an error, or `cancel` fires.
    /// Must be called from within a tokio runtime.
    pub fn stream_chat(
        &self,
        config: SessionConfig,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> ChatStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.clone();
        tokio::spawn(async move {
            client.stream_into(config, messages, cancel, tx).await;
        });
        ChatStream { rx }
    }

    /// Run one streaming request to completion, sending every event to `tx`.
    pub async fn stream_into(
        &self,
        config: SessionConfig,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
        tx: mpsc::UnboundedSender<StreamEvent>,
    ) {
        let terminal = match self.run_stream(&config, &messages, &cancel, &tx).await {
            Ok(Outcome::Done) => StreamEvent::Done,
            Ok(Outcome::Cancelled) => StreamEvent::Cancelled,
            Err(_) if cancel.is_cancelled() => StreamEvent::Cancelled,
            Err(e) => {
                log::warn!("chat stream failed: {}", e);
                StreamEvent::Error(e)
            }
        };
        log::debug!("chat stream finished: {:?}", terminal);
        let _ = tx.send(terminal);
    }

    async fn run_stream(
        &self,
        config: &SessionConfig,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<Outcome, GatewayError> {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        let body = ChatCompletionRequest {
            model: config.model(),
            messages,
            stream: true,
            user: Some(CLIENT_USER),
            max_tokens: None,
        };
        let request = HttpRequest {
            method: Method::Post,
            url: format!("{}/v1/chat/completions", config.base_url()),
            headers: config.headers(),
            body: Some(serde_json::to_vec(&body)?),
        };
        log::debug!(
            "POST {} model={} messages={}",
            request.url,
            config.model(),
            messages.len()
        );

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
            res = self.transport.send(request) => res?,
        };
        if !res.is_success() {
            let err = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
                err = error_for_status(res) => err,
            };
            return Err(err);
        }

        let mut body = res.body;
        let mut decoder = SseDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
                next = body.next() => next,
            };
            let Some(bytes) = next else { break };
            for frame in decoder.push(&bytes?) {
                match frame {
                    SseFrame::Delta(text) => {
                        let _ = tx.send(StreamEvent::Chunk(text));
                    }
                    SseFrame::Done => return Ok(Outcome::Done),
                }
            }
        }
        if let Some(SseFrame::Delta(text)) = decoder.finish() {
            let _ = tx.send(StreamEvent::Chunk(text));
        }
        Ok(Outcome::Done)
    }
}

fn looks_like_api(res: &HttpResponse) -> bool {
    let content_type = res
        .content_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();
    if content_type.contains("json") || content_type.contains("text/event-stream") {
        return true;
    }
    res.is_success() && !content_type.contains("html")
}

fn is_html(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("<!doctype html") || lower.contains("<html")
}

/// Turn a non-success response into an error, reading the whole body.
async fn error_for_status(res: HttpResponse) -> GatewayError {
    let status = res.status;
    let body = res.text().await.unwrap_or_default();
    if is_html(&body) {
        return GatewayError::GatewayMisconfigured;
    }
    let body = if body.trim().is_empty() {
        reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
            .to_string()
    } else {
        body
    };
    GatewayError::Http { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_falls_back_and_trims() {
        assert_eq!(SessionConfig::new("").base_url(), DEFAULT_GATEWAY_URL);
        assert_eq!(SessionConfig::new("  ").base_url(), DEFAULT_GATEWAY_URL);
        assert_eq!(
            SessionConfig::new("http://gw:8080//").base_url(),
            "http://gw:8080"
        );
    }

    #[test]
    fn model_falls_back_when_unset_or_blank() {
        let mut config = SessionConfig::new("http://gw");
        assert_eq!(config.model(), DEFAULT_MODEL);
        config.model_id = Some(" ".to_string());
        assert_eq!(config.model(), DEFAULT_MODEL);
        config.model_id = Some("llama3".to_string());
        assert_eq!(config.model(), "llama3");
    }

    #[test]
    fn headers_include_token_and_agent_only_when_set() {
        let mut config = SessionConfig::new("http://gw");
        config.auth_token = Some(String::new());
        let names: Vec<String> = config.headers().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Content-Type".to_string()]);

        config.auth_token = Some("secret".to_string());
        config.agent_id = Some("main".to_string());
        let headers = config.headers();
        assert!(headers.contains(&("Authorization".to_string(), "Bearer secret".to_string())));
        assert!(headers.contains(&(AGENT_ID_HEADER.to_string(), "main".to_string())));
    }

    #[test]
    fn html_detection_is_case_insensitive() {
        assert!(is_html("<!DOCTYPE html><html><body>login</body></html>"));
        assert!(is_html("  <html lang=\"en\">"));
        assert!(!is_html(r#"{"error":{"message":"unauthorized"}}"#));
    }

    #[test]
    fn error_messages() {
        let e = GatewayError::Http {
            status: 401,
            body: "nope".to_string(),
        };
        assert_eq!(e.to_string(), "HTTP 401: nope");
        assert!(GatewayError::GatewayMisconfigured
            .to_string()
            .contains("Check your auth token"));
    }
}
