//! OpenAI-compatible wire types for the gateway's chat completions endpoint.

use serde::{Deserialize, Serialize};

/// Fallback model id sent when no model is configured.
pub const DEFAULT_MODEL: &str = "openclaw";

/// Value of the `user` field on every completion request.
pub const CLIENT_USER: &str = "clawface-app";

/// Header carrying the optional agent routing hint.
pub const AGENT_ID_HEADER: &str = "x-openclaw-agent-id";

/// Payload of the `data:` line that ends a completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One message as sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChunk {
    pub choices: Option<Vec<StreamChoice>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChoice {
    pub delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamDelta {
    pub content: Option<String>,
}

impl StreamChunk {
    /// `choices[0].delta.content`, when present and non-empty.
    pub fn into_content(self) -> Option<String> {
        self.choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelsResponse {
    pub data: Option<Vec<ModelObject>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelObject {
    pub id: String,
}

/// A model advertised by the gateway's `/v1/models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayModel {
    pub id: String,
}
