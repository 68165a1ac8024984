use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::channels::{ChannelPlugin, OutboundMessage, SendOutcome, classify_status};
use crate::models::channel::ChannelKind;

/// Push delivery through an HTTP provider. The provider acks acceptance
/// synchronously and confirms device delivery later via webhook, so push
/// attempts stay in `sent` until the delivery receipt arrives.
pub struct PushChannel {
    http_client: Client,
    provider_url: String,
}

impl PushChannel {
    pub fn new(provider_url: String, timeout: Duration) -> Self {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            provider_url,
        }
    }
}

#[async_trait]
impl ChannelPlugin for PushChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    fn supports_delivery_receipts(&self) -> bool {
        true
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        debug!(
            request_id = %message.request_id,
            attempt_id = %message.attempt_id,
            recipient = %message.recipient,
            "Sending push notification"
        );

        let payload = json!({
            "user_id": message.recipient,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            // Echoed back in the delivery receipt webhook.
            "attempt_id": message.attempt_id,
            "request_id": message.request_id,
        });

        let response = self
            .http_client
            .post(&self.provider_url)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(response) => classify_status(response.status()),
            Err(e) => SendOutcome::Retryable(format!("push provider unreachable: {}", e)),
        }
    }
}
