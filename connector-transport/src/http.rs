//! HTTP request/response types and the transport seam.
//!
//! Everything above this module talks to Google in terms of [`HttpRequest`]
//! and [`HttpResponse`] and reaches the network through the [`HttpTransport`]
//! trait, so tests can substitute a scripted transport without touching the
//! pipeline or service logic.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Byte stream produced by a streaming response.
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, TransportError>>;

/// Errors raised by the transport layer itself (never by upstream status
/// codes, which the request pipeline classifies).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport failure: {0}")]
    Other(String),

    #[error("failed to decode response body: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// HTTP method types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Canonical method name for logging and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP request builder.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    /// Attach a JSON body and content type.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let json = serde_json::to_vec(body).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.body = Some(Bytes::from(json));
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// Attach a form-encoded body and content type.
    pub fn form<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let encoded =
            serde_urlencoded::to_string(body).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.body = Some(Bytes::from(encoded));
        self.headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        Ok(self)
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Fully buffered HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// Body as a UTF-8 string, lossy on invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Classify the body into a tagged error payload.
    pub fn error_detail(&self) -> ErrorDetail {
        ErrorDetail::from_bytes(&self.body)
    }
}

/// HTTP response whose body is consumed incrementally.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    body: ByteStream,
}

impl StreamingResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Take ownership of the byte stream.
    pub fn into_body(self) -> ByteStream {
        self.body
    }

    /// Drain the stream into a buffered response. Used for non-2xx
    /// streaming replies, whose bodies are small error envelopes.
    pub async fn collect(self) -> Result<HttpResponse> {
        use futures::TryStreamExt;

        let status = self.status;
        let headers = self.headers;
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        let body = Bytes::from(chunks.concat());
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Tagged upstream error payload.
///
/// Upstream error bodies arrive as free text, a JSON object, or a JSON
/// array. Rather than passing an untyped value around, the shape is made
/// explicit so collaborators can render problem details without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ErrorDetail {
    Text(String),
    StructuredList(Vec<serde_json::Value>),
    StructuredMap(serde_json::Map<String, serde_json::Value>),
}

impl ErrorDetail {
    /// Classify a raw body.
    pub fn from_bytes(body: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => Self::StructuredMap(map),
            Ok(serde_json::Value::Array(list)) => Self::StructuredList(list),
            Ok(serde_json::Value::String(text)) => Self::Text(text),
            Ok(other) => Self::Text(other.to_string()),
            Err(_) => Self::Text(String::from_utf8_lossy(body).into_owned()),
        }
    }

    /// Best human-readable summary of the payload.
    ///
    /// For structured maps this follows the OAuth and Drive error envelopes:
    /// `error_description`, then a string `error`, then `error.message`.
    pub fn description(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::StructuredList(_) => None,
            Self::StructuredMap(map) => {
                if let Some(desc) = map.get("error_description").and_then(|v| v.as_str()) {
                    return Some(desc.to_string());
                }
                match map.get("error") {
                    Some(serde_json::Value::String(text)) => Some(text.clone()),
                    Some(serde_json::Value::Object(inner)) => inner
                        .get("message")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    _ => None,
                }
            }
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::StructuredList(list) => {
                write!(f, "{}", serde_json::Value::Array(list.clone()))
            }
            Self::StructuredMap(map) => {
                write!(f, "{}", serde_json::Value::Object(map.clone()))
            }
        }
    }
}

/// Async HTTP transport.
///
/// Implementations handle connection pooling and TLS; they do not retry and
/// they do not interpret status codes. Both concerns belong to the request
/// pipeline so that classification happens in exactly one place.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute a request and buffer the whole response body.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Execute a request and expose the response body as a byte stream.
    async fn execute_streaming(&self, request: HttpRequest) -> Result<StreamingResponse>;
}
