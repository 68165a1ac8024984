use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::channels::{ChannelPlugin, OutboundMessage, SendOutcome, classify_status};
use crate::models::channel::ChannelKind;

pub struct SmsChannel {
    http_client: Client,
    provider_url: String,
}

impl SmsChannel {
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
impl ChannelPlugin for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        debug!(
            request_id = %message.request_id,
            recipient = %message.recipient,
            "Sending SMS notification"
        );

        // SMS bodies are short; the title is dropped and the body truncated
        // to a single segment-friendly length.
        let text: String = message.body.chars().take(320).collect();

        let payload = json!({
            "user_id": message.recipient,
            "text": text,
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
            Err(e) => SendOutcome::Retryable(format!("sms provider unreachable: {}", e)),
        }
    }
}
