//! HTTP transport seam: "a request that returns a byte stream".
//!
//! The stream client only needs a status, a content type and a body stream, so the
//! transport can be swapped (reqwest, a platform HTTP client, an in-memory fake)
//! without touching the decode logic.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use super::GatewayError;

/// Body of a response, yielded one read at a time.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, GatewayError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request as handed to the transport; the body is already serialized JSON.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into a string (lossy UTF-8).
    pub async fn text(self) -> Result<String, GatewayError> {
        let mut body = self.body;
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return once the response head is available.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError>;
}

/// Default transport over a shared `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let res = builder.send().await?;
        let status = res.status().as_u16();
        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = res
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(GatewayError::Request))
            .boxed();
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
