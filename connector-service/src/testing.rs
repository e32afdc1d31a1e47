//! Shared test scaffolding: a mock transport and canned responses.

use async_trait::async_trait;
use bytes::Bytes;
use connector_auth::TokenProvider;
use connector_drive::{DriveClient, RetryPolicy};
use connector_runtime::ConnectorConfig;
use connector_transport::{
    HttpRequest, HttpResponse, HttpTransport, StreamingResponse,
};
use mockall::mock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub Transport {}

    #[async_trait]
    impl HttpTransport for Transport {
        async fn execute(
            &self,
            request: HttpRequest,
        ) -> connector_transport::Result<HttpResponse>;
        async fn execute_streaming(
            &self,
            request: HttpRequest,
        ) -> connector_transport::Result<StreamingResponse>;
    }
}

pub fn base_config() -> ConnectorConfig {
    ConnectorConfig::builder()
        .client_id("client-id")
        .client_secret("client-secret")
        .refresh_token("1//refresh")
        .build()
        .unwrap()
}

pub fn config() -> Arc<ConnectorConfig> {
    Arc::new(base_config())
}

pub fn config_with_webhook() -> Arc<ConnectorConfig> {
    Arc::new(
        ConnectorConfig::builder()
            .client_id("client-id")
            .client_secret("client-secret")
            .refresh_token("1//refresh")
            .webhook_url("https://connector.example.com/webhooks/drive")
            .build()
            .unwrap(),
    )
}

pub fn token_response() -> HttpResponse {
    json_response(200, r#"{"access_token": "tok", "expires_in": 3600}"#)
}

pub fn json_response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: HashMap::new(),
        body: Bytes::from(body.to_string()),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: Duration::ZERO,
    }
}

pub fn drive_client(transport: MockTransport) -> DriveClient {
    drive_client_with_config(config(), transport)
}

pub fn drive_client_with_config(
    config: Arc<ConnectorConfig>,
    transport: MockTransport,
) -> DriveClient {
    let transport: Arc<dyn HttpTransport> = Arc::new(transport);
    let tokens = Arc::new(TokenProvider::new(
        Arc::clone(&config),
        Arc::clone(&transport),
        None,
    ));
    DriveClient::new(config, transport, tokens).with_retry_policy(fast_retry())
}
