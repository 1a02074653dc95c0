//! Gateway stream client: talks to an OpenAI-compatible chat completions gateway and
//! decodes its server-sent event stream into content deltas.

mod client;
pub mod protocol;
pub mod sse;
pub mod transport;

pub use client::{
    ChatStream, GatewayClient, GatewayError, SessionConfig, StreamEvent, CHECK_TIMEOUT,
    DEFAULT_GATEWAY_URL,
};
pub use protocol::{ChatMessage, GatewayModel, Role};
pub use transport::{ByteStream, HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
