//! Chat session: the transcript and the idle/streaming state machine around it.
//!
//! A [`ChatSession`] owns its transcript behind a mutex and is the only writer. Sending
//! appends the user message plus an empty assistant placeholder, starts a gateway
//! stream, and folds the stream's events back into the placeholder from a spawned task.
//! Events from a request that is no longer current (stopped, cleared, superseded) are
//! dropped.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SettingsStore;
use crate::gateway::{ChatMessage, GatewayClient, Role, StreamEvent};

/// Unique message identifier.
pub type MessageId = uuid::Uuid;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Who wrote a transcript message. System prompts never appear in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl From<Speaker> for Role {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::User => Role::User,
            Speaker::Assistant => Role::Assistant,
        }
    }
}

/// A message in the displayed transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub speaker: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(speaker: Speaker, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            speaker,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.speaker == Speaker::User
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
}

/// Change notifications for front-ends (repaint, print deltas).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// A send was accepted; `message_id` is the assistant placeholder.
    Started { message_id: MessageId },
    Delta { message_id: MessageId, text: String },
    Finished,
    Failed(String),
    Stopped,
    Cleared,
}

struct InFlight {
    request_id: u64,
    assistant_id: MessageId,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Transcript {
    messages: Vec<Message>,
    error: Option<String>,
    in_flight: Option<InFlight>,
    next_request_id: u64,
}

/// One conversation with the gateway. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChatSession {
    client: GatewayClient,
    settings: Arc<SettingsStore>,
    inner: Arc<Mutex<Transcript>>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl ChatSession {
    pub fn new(client: GatewayClient, settings: Arc<SettingsStore>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            client,
            settings,
            inner: Arc::new(Mutex::new(Transcript::default())),
            updates,
        }
    }

    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Snapshot of the transcript in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    pub fn state(&self) -> SessionState {
        if self.is_loading() {
            SessionState::Streaming
        } else {
            SessionState::Idle
        }
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn clear_error(&self) {
        self.lock().error = None;
    }

    /// Start a new turn. Returns `None` (and changes nothing) when `text` is blank or a
    /// reply is already streaming; otherwise the handle of the task folding the reply
    /// into the transcript. Must be called from within a tokio runtime.
    pub fn send_message(&self, text: &str) -> Option<JoinHandle<()>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let (request_id, assistant_id, cancel, history) = {
            let mut t = self.lock();
            if t.in_flight.is_some() {
                log::debug!("send ignored: a reply is already streaming");
                return None;
            }
            t.error = None;
            let user = Message::new(Speaker::User, text);
            let assistant = Message::new(Speaker::Assistant, "");
            let assistant_id = assistant.id;
            t.messages.push(user);
            t.messages.push(assistant);
            let history = outbound_history(&t.messages, assistant_id);

            t.next_request_id += 1;
            let request_id = t.next_request_id;
            let cancel = CancellationToken::new();
            t.in_flight = Some(InFlight {
                request_id,
                assistant_id,
                cancel: cancel.clone(),
            });
            (request_id, assistant_id, cancel, history)
        };

        let config = self.settings.get().session_config();
        log::info!(
            "sending turn {} ({} messages) to {}",
            request_id,
            history.len(),
            config.base_url()
        );
        self.notify(SessionUpdate::Started {
            message_id: assistant_id,
        });

        let mut stream = self.client.stream_chat(config, history, cancel);
        let session = self.clone();
        Some(tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                session.apply(request_id, event);
            }
        }))
    }

    /// Cancel the streaming reply, if any, and return to idle right away. Whatever the
    /// placeholder received so far stays in the transcript.
    pub fn stop_generation(&self) {
        let stopped = self.lock().in_flight.take();
        if let Some(flight) = stopped {
            flight.cancel.cancel();
            log::info!("stopped turn {}", flight.request_id);
            self.notify(SessionUpdate::Stopped);
        }
    }

    /// Empty the transcript and error. A streaming reply is cancelled as well.
    pub fn clear_messages(&self) {
        let stopped = {
            let mut t = self.lock();
            t.messages.clear();
            t.error = None;
            t.in_flight.take()
        };
        if let Some(flight) = stopped {
            flight.cancel.cancel();
            log::info!("cancelled turn {} on clear", flight.request_id);
        }
        self.notify(SessionUpdate::Cleared);
    }

    fn apply(&self, request_id: u64, event: StreamEvent) {
        let update = {
            let mut t = self.lock();
            let assistant_id = match t.in_flight.as_ref() {
                Some(f) if f.request_id == request_id => f.assistant_id,
                _ => {
                    log::debug!("dropping event for stale turn {}", request_id);
                    return;
                }
            };
            match event {
                StreamEvent::Chunk(text) => {
                    let Some(m) = t.messages.iter_mut().find(|m| m.id == assistant_id) else {
                        return;
                    };
                    m.content.push_str(&text);
                    SessionUpdate::Delta {
                        message_id: assistant_id,
                        text,
                    }
                }
                StreamEvent::Done => {
                    t.in_flight = None;
                    SessionUpdate::Finished
                }
                StreamEvent::Error(e) => {
                    t.in_flight = None;
                    let message = e.to_string();
                    t.error = Some(message.clone());
                    if let Some(idx) = t
                        .messages
                        .iter()
                        .position(|m| m.id == assistant_id && m.content.is_empty())
                    {
                        t.messages.remove(idx);
                    }
                    SessionUpdate::Failed(message)
                }
                StreamEvent::Cancelled => {
                    t.in_flight = None;
                    SessionUpdate::Stopped
                }
            }
        };
        self.notify(update);
    }

    fn notify(&self, update: SessionUpdate) {
        // no subscribers is fine
        let _ = self.updates.send(update);
    }

    fn lock(&self) -> MutexGuard<'_, Transcript> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wire history for a turn: every message in order except the placeholder and
/// messages that never received content.
fn outbound_history(messages: &[Message], placeholder: MessageId) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| m.id != placeholder && !m.content.is_empty())
        .map(|m| ChatMessage {
            role: m.speaker.into(),
            content: m.content.clone(),
        })
        .collect()
}
