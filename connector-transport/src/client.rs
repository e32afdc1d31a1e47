//! Reqwest-backed transport implementation.

use crate::http::{
    ByteStream, HttpMethod, HttpRequest, HttpResponse, HttpTransport, Result, StreamingResponse,
    TransportError,
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Ceiling for streaming reads. The pooled client's default timeout covers
/// the whole body read, which would cut large downloads short; streams get
/// this much wider window unless the request carries its own.
const STREAMING_READ_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// HTTP transport built on `reqwest`.
///
/// Provides connection pooling, rustls TLS, and streaming bodies. Retry and
/// status classification are deliberately absent; see the request pipeline.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with the default 30-second timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a transport with a custom default timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent("gdrive-connector/0.1.0")
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self { client }
    }

    /// Wrap an existing `reqwest` client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(Self::convert_method(request.method), &request.url);

        for (key, value) in request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder
    }

    fn convert_error(error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout
        } else if error.is_connect() {
            TransportError::Connect(error.to_string())
        } else {
            TransportError::Other(error.to_string())
        }
    }

    fn convert_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect()
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(Self::convert_error)?;

        let status = response.status().as_u16();
        let headers = Self::convert_headers(response.headers());
        let body = response.bytes().await.map_err(Self::convert_error)?;

        debug!(url = %url, status, bytes = body.len(), "transport request completed");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn execute_streaming(&self, mut request: HttpRequest) -> Result<StreamingResponse> {
        if request.timeout.is_none() {
            request.timeout = Some(STREAMING_READ_TIMEOUT);
        }
        let url = request.url.clone();
        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(Self::convert_error)?;

        let status = response.status().as_u16();
        let headers = Self::convert_headers(response.headers());

        debug!(url = %url, status, "transport stream opened");

        let body: ByteStream = response
            .bytes_stream()
            .map_err(Self::convert_error)
            .boxed();

        Ok(StreamingResponse::new(status, headers, body))
    }
}
