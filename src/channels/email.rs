use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::channels::{ChannelPlugin, OutboundMessage, SendOutcome, classify_status};
use crate::models::channel::ChannelKind;

/// Email delivery through an HTTP provider endpoint. Address resolution is
/// the provider's job; we hand it the recipient user id.
pub struct EmailChannel {
    http_client: Client,
    provider_url: String,
}

impl EmailChannel {
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
impl ChannelPlugin for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        debug!(
            request_id = %message.request_id,
            recipient = %message.recipient,
            "Sending email notification"
        );

        let payload = json!({
            "user_id": message.recipient,
            "subject": message.title,
            "body": message.body,
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
            Err(e) => SendOutcome::Retryable(format!("email provider unreachable: {}", e)),
        }
    }
}
