//! # Watch Channel Manager
//!
//! Lifecycle of webhook push-notification subscriptions on the Drive change
//! feed: **Requested → Active → Expired/Deleted**.
//!
//! Channel ids and shared secrets are generated locally; Drive assigns the
//! resource id/URI and expiration at registration time. Inbound deliveries
//! authenticate by echoing the shared secret.

use crate::error::{Result, ServiceError};
use chrono::{DateTime, Duration, TimeZone, Utc};
use connector_drive::{DriveClient, WatchParams, WatchRequest};
use connector_runtime::ConnectorConfig;
use connector_store::{NewWatchChannel, WatchChannel, WatchChannelRepository};
use rand::RngCore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Fields of an inbound webhook delivery relevant to channel bookkeeping
/// (the `X-Goog-Channel-*` headers).
#[derive(Debug, Clone, Default)]
pub struct WebhookDelivery {
    pub channel_id: String,
    pub resource_id: Option<String>,
    pub resource_uri: Option<String>,
    pub kind: Option<String>,
    /// `X-Goog-Channel-Expiration`, an HTTP-date string.
    pub expiration_header: Option<String>,
}

/// Manages watch-channel registration, validation, renewal, and teardown.
pub struct WatchChannelManager {
    config: Arc<ConnectorConfig>,
    client: Arc<DriveClient>,
    channels: Arc<dyn WatchChannelRepository>,
}

impl WatchChannelManager {
    pub fn new(
        config: Arc<ConnectorConfig>,
        client: Arc<DriveClient>,
        channels: Arc<dyn WatchChannelRepository>,
    ) -> Self {
        Self {
            config,
            client,
            channels,
        }
    }

    /// All locally known channels.
    pub async fn list_channels(&self) -> Result<Vec<WatchChannel>> {
        Ok(self.channels.list().await?)
    }

    /// One channel by id.
    pub async fn get_channel(&self, channel_id: &str) -> Result<Option<WatchChannel>> {
        Ok(self.channels.get(channel_id).await?)
    }

    /// Register a new watch on the change feed.
    ///
    /// Fails fast with [`ServiceError::Configuration`] when no webhook
    /// callback address is configured; no network call is made.
    #[instrument(skip(self))]
    pub async fn register(&self, ttl_seconds: u64) -> Result<WatchChannel> {
        let webhook_url = self.config.webhook_url.as_ref().ok_or_else(|| {
            ServiceError::Configuration(
                "webhook URL must be configured to register watches".to_string(),
            )
        })?;

        let channel_id = random_hex(16);
        let token = random_hex(12);
        let body = WatchRequest {
            id: channel_id.clone(),
            channel_type: "web_hook".to_string(),
            address: webhook_url.clone(),
            token: token.clone(),
            params: WatchParams {
                ttl: ttl_seconds.to_string(),
            },
        };

        let start_token = self.client.get_start_page_token().await?;
        let response = self.client.start_changes_watch(&start_token, &body).await?;

        let expiration = response
            .expiration
            .as_deref()
            .and_then(parse_epoch_millis);

        let record = self
            .channels
            .insert(NewWatchChannel {
                channel_id: channel_id.clone(),
                resource_id: response.resource_id,
                resource_uri: response.resource_uri,
                expiration,
                token: Some(token),
                account_id: self.config.default_account_id.clone(),
                kind: "changes".to_string(),
            })
            .await?;

        info!(
            channel_id = %channel_id,
            resource_id = record.resource_id.as_deref().unwrap_or(""),
            expiration = ?expiration,
            "watch channel registered"
        );
        Ok(record)
    }

    /// Stop a channel upstream and delete the local record.
    ///
    /// The remote stop runs first; when it fails, the local record is kept
    /// so the remote subscription is never silently orphaned.
    #[instrument(skip(self))]
    pub async fn delete(&self, channel_id: &str, resource_id: Option<&str>) -> Result<()> {
        let record = self.channels.get(channel_id).await?;
        let resource_id = resource_id
            .map(str::to_string)
            .or_else(|| record.as_ref().and_then(|r| r.resource_id.clone()));

        self.client
            .stop_channel(channel_id, resource_id.as_deref())
            .await?;

        if record.is_some() {
            self.channels.delete(channel_id).await?;
            info!(channel_id = %channel_id, "watch channel deleted");
        }
        Ok(())
    }

    /// Record an inbound webhook delivery against its channel.
    ///
    /// A delivery for an unknown channel creates a record defensively —
    /// deliveries can arrive before the registration response is persisted,
    /// or after a local record was lost. The server-assigned resource
    /// id/URI are always overwritten; an unparseable expiration header
    /// leaves the expiration null rather than failing the delivery.
    #[instrument(skip(self, delivery), fields(channel_id = %delivery.channel_id))]
    pub async fn upsert_from_notification(
        &self,
        delivery: WebhookDelivery,
    ) -> Result<WatchChannel> {
        let existing = self.channels.get(&delivery.channel_id).await?;
        let record = match existing {
            Some(record) => record,
            None => {
                info!("creating record for unknown watch channel");
                self.channels
                    .insert(NewWatchChannel {
                        channel_id: delivery.channel_id.clone(),
                        resource_id: None,
                        resource_uri: None,
                        expiration: None,
                        token: None,
                        account_id: self.config.default_account_id.clone(),
                        kind: delivery.kind.clone().unwrap_or_else(|| "changes".to_string()),
                    })
                    .await?
            }
        };

        let expiration = match delivery.expiration_header.as_deref() {
            None => record.expiration,
            Some(header) => {
                let parsed = parse_http_date(header);
                if parsed.is_none() {
                    warn!(header, "unparseable channel expiration header");
                }
                parsed
            }
        };

        let updated = self
            .channels
            .update_delivery(
                &delivery.channel_id,
                delivery.resource_id.as_deref(),
                delivery.resource_uri.as_deref(),
                expiration,
            )
            .await?;
        Ok(updated)
    }

    /// Authenticate an inbound delivery against the stored channel secret.
    ///
    /// Fails with [`ServiceError::Permission`] for unknown channels and for
    /// any presented token that does not exactly match a stored secret. A
    /// channel without a stored secret passes: no check is possible for
    /// channels registered out-of-band or recreated from a delivery, which
    /// never learn the secret. Callers relying on webhook authenticity
    /// should only register channels through this instance.
    pub async fn ensure_valid(
        &self,
        channel_id: &str,
        presented_token: Option<&str>,
    ) -> Result<WatchChannel> {
        let record = self.channels.get(channel_id).await?.ok_or_else(|| {
            ServiceError::Permission(format!("unknown watch channel {channel_id}"))
        })?;

        if let Some(secret) = record.token.as_deref() {
            if presented_token != Some(secret) {
                return Err(ServiceError::Permission(format!(
                    "invalid token for watch channel {channel_id}"
                )));
            }
        }

        Ok(record)
    }

    /// Delete and re-register every channel expiring within `threshold` of
    /// now (or already expired). A channel with no recorded expiration is
    /// never renewed: expiration is only absent when the registration
    /// response was malformed, and renewing on a guess would tear down a
    /// live subscription.
    ///
    /// Renewal is not atomic across channels: a failure partway through
    /// leaves earlier channels renewed, and the returned ids cover only the
    /// renewals completed before the failure.
    #[instrument(skip(self))]
    pub async fn renew(&self, threshold: Duration, ttl_seconds: u64) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut renewed = Vec::new();

        for channel in self.channels.list().await? {
            let Some(expiration) = channel.expiration else {
                continue;
            };
            if expiration - now > threshold {
                continue;
            }

            self.delete(&channel.channel_id, channel.resource_id.as_deref())
                .await?;
            let new_channel = self.register(ttl_seconds).await?;
            info!(
                old_channel = %channel.channel_id,
                new_channel = %new_channel.channel_id,
                "watch channel renewed"
            );
            renewed.push(new_channel.channel_id);
        }

        Ok(renewed)
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().fold(String::with_capacity(bytes * 2), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn parse_epoch_millis(value: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = value.parse().ok()?;
    if millis == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        config_with_webhook, drive_client_with_config, json_response, token_response,
        MockTransport,
    };
    use connector_store::{create_test_pool, SqliteWatchChannelRepository};

    async fn manager(transport: MockTransport) -> (WatchChannelManager, Arc<SqliteWatchChannelRepository>) {
        let config = config_with_webhook();
        let pool = create_test_pool().await.unwrap();
        let channels = Arc::new(SqliteWatchChannelRepository::new(pool));
        let client = Arc::new(drive_client_with_config(Arc::clone(&config), transport));
        (
            WatchChannelManager::new(config, client, channels.clone()),
            channels,
        )
    }

    fn watch_flow_transport() -> MockTransport {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if request.url.contains("oauth2.googleapis.com/token") {
                return Ok(token_response());
            }
            if request.url.contains("/changes/startPageToken") {
                return Ok(json_response(200, r#"{"startPageToken": "token-1"}"#));
            }
            if request.url.contains("/changes/watch") {
                assert!(request.url.contains("pageToken=token-1"));
                let body = request.body.as_ref().unwrap();
                let payload: serde_json::Value = serde_json::from_slice(body).unwrap();
                assert_eq!(payload["type"], "web_hook");
                assert_eq!(
                    payload["address"],
                    "https://connector.example.com/webhooks/drive"
                );
                return Ok(json_response(
                    200,
                    r#"{
                        "resourceId": "resource-1",
                        "resourceUri": "https://www.googleapis.com/drive/v3/changes",
                        "expiration": "1893456000000"
                    }"#,
                ));
            }
            if request.url.contains("/channels/stop") {
                return Ok(json_response(204, ""));
            }
            panic!("unexpected request: {}", request.url);
        });
        transport
    }

    #[tokio::test]
    async fn register_persists_server_assigned_fields() {
        let (manager, channels) = manager(watch_flow_transport()).await;

        let record = manager.register(86_400).await.unwrap();

        assert_eq!(record.channel_id.len(), 32);
        assert_eq!(record.token.as_ref().unwrap().len(), 24);
        assert_eq!(record.resource_id.as_deref(), Some("resource-1"));
        assert!(record.expiration.is_some());
        assert_eq!(record.kind, "changes");

        let stored = channels.get(&record.channel_id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn register_without_webhook_url_fails_before_any_network_call() {
        let config = crate::testing::config();
        let pool = create_test_pool().await.unwrap();
        let channels = Arc::new(SqliteWatchChannelRepository::new(pool));
        // No transport expectations: a network call panics the mock.
        let client = Arc::new(drive_client_with_config(
            Arc::clone(&config),
            MockTransport::new(),
        ));
        let manager = WatchChannelManager::new(config, client, channels);

        let error = manager.register(3600).await.unwrap_err();
        assert!(matches!(error, ServiceError::Configuration(_)));
    }

    #[tokio::test]
    async fn ensure_valid_matches_secret_exactly() {
        let (manager, _channels) = manager(watch_flow_transport()).await;
        let record = manager.register(3600).await.unwrap();
        let secret = record.token.clone().unwrap();

        assert!(manager
            .ensure_valid(&record.channel_id, Some(&secret))
            .await
            .is_ok());

        for wrong in [Some("wrong"), Some(""), None] {
            let error = manager
                .ensure_valid(&record.channel_id, wrong)
                .await
                .unwrap_err();
            assert!(matches!(error, ServiceError::Permission(_)), "{wrong:?}");
        }
    }

    #[tokio::test]
    async fn ensure_valid_rejects_unknown_channel() {
        let (manager, _channels) = manager(MockTransport::new()).await;
        let error = manager.ensure_valid("ghost", Some("any")).await.unwrap_err();
        assert!(matches!(error, ServiceError::Permission(_)));
    }

    #[tokio::test]
    async fn channel_without_stored_secret_passes_validation() {
        let (manager, _channels) = manager(MockTransport::new()).await;
        manager
            .upsert_from_notification(WebhookDelivery {
                channel_id: "external".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(manager.ensure_valid("external", Some("anything")).await.is_ok());
        assert!(manager.ensure_valid("external", None).await.is_ok());
    }

    #[tokio::test]
    async fn notification_for_unknown_channel_creates_record() {
        let (manager, channels) = manager(MockTransport::new()).await;

        let record = manager
            .upsert_from_notification(WebhookDelivery {
                channel_id: "surprise".to_string(),
                resource_id: Some("resource-9".to_string()),
                resource_uri: Some("https://example.com/r9".to_string()),
                kind: Some("changes".to_string()),
                expiration_header: Some("Mon, 01 Jan 2035 00:00:00 GMT".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(record.resource_id.as_deref(), Some("resource-9"));
        assert!(record.expiration.is_some());
        assert!(record.token.is_none());
        assert!(channels.get("surprise").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unparseable_expiration_header_is_tolerated() {
        let (manager, _channels) = manager(MockTransport::new()).await;

        let record = manager
            .upsert_from_notification(WebhookDelivery {
                channel_id: "chan".to_string(),
                expiration_header: Some("not a date".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(record.expiration.is_none());
    }

    #[tokio::test]
    async fn delivery_without_expiration_header_keeps_existing_value() {
        let (manager, channels) = manager(watch_flow_transport()).await;
        let registered = manager.register(3600).await.unwrap();
        assert!(registered.expiration.is_some());

        let updated = manager
            .upsert_from_notification(WebhookDelivery {
                channel_id: registered.channel_id.clone(),
                resource_id: Some("resource-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.expiration, registered.expiration);
        assert!(channels
            .get(&registered.channel_id)
            .await
            .unwrap()
            .unwrap()
            .expiration
            .is_some());
    }

    #[tokio::test]
    async fn renew_selects_only_expiring_channels() {
        let (manager, channels) = manager(watch_flow_transport()).await;
        let now = Utc::now();

        for (id, expiration) in [
            ("expired", Some(now - Duration::hours(1))),
            ("soon", Some(now + Duration::minutes(30))),
            ("healthy", Some(now + Duration::hours(10))),
            ("unconfirmed", None),
        ] {
            channels
                .insert(connector_store::NewWatchChannel {
                    channel_id: id.to_string(),
                    resource_id: Some(format!("resource-{id}")),
                    resource_uri: None,
                    expiration,
                    token: Some("secret".to_string()),
                    account_id: "default".to_string(),
                    kind: "changes".to_string(),
                })
                .await
                .unwrap();
        }

        let renewed = manager.renew(Duration::hours(1), 86_400).await.unwrap();
        assert_eq!(renewed.len(), 2);

        // The stale pair is gone, replaced by fresh ids; the healthy and
        // unconfirmed channels are untouched.
        assert!(channels.get("expired").await.unwrap().is_none());
        assert!(channels.get("soon").await.unwrap().is_none());
        assert!(channels.get("healthy").await.unwrap().is_some());
        assert!(channels.get("unconfirmed").await.unwrap().is_some());
        for id in &renewed {
            assert!(channels.get(id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn failed_remote_stop_keeps_local_record() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if request.url.contains("oauth2.googleapis.com/token") {
                return Ok(token_response());
            }
            assert!(request.url.contains("/channels/stop"));
            Ok(json_response(404, r#"{"error": {"message": "not found"}}"#))
        });

        let (manager, channels) = manager(transport).await;
        channels
            .insert(connector_store::NewWatchChannel {
                channel_id: "chan".to_string(),
                resource_id: Some("resource-1".to_string()),
                resource_uri: None,
                expiration: None,
                token: Some("secret".to_string()),
                account_id: "default".to_string(),
                kind: "changes".to_string(),
            })
            .await
            .unwrap();

        let error = manager.delete("chan", None).await.unwrap_err();
        assert!(matches!(error, ServiceError::Drive(_)));
        assert!(channels.get("chan").await.unwrap().is_some());
    }

    #[test]
    fn epoch_millis_parsing() {
        assert!(parse_epoch_millis("1893456000000").is_some());
        assert!(parse_epoch_millis("0").is_none());
        assert!(parse_epoch_millis("garbage").is_none());
    }
}
