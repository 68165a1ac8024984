pub mod email;
pub mod inapp;
pub mod push;
pub mod sms;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use uuid::Uuid;

use crate::models::{channel::ChannelKind, request::NotificationLevel};

/// Classification of one send. Plugins never surface raw transport errors;
/// the dispatch engine only acts on this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    Retryable(String),
    Permanent(String),
}

/// Fully rendered message handed to a plugin, one per (recipient, channel).
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub request_id: Uuid,
    pub attempt_id: Uuid,
    pub recipient: Uuid,
    pub title: String,
    pub body: String,
    pub level: NotificationLevel,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Whether the provider acks delivery asynchronously via webhook. Sends
    /// through such channels stay in `sent` until the receipt arrives.
    fn supports_delivery_receipts(&self) -> bool {
        false
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome;
}

#[derive(Default)]
pub struct ChannelRegistry {
    plugins: HashMap<ChannelKind, Arc<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, plugin: Arc<dyn ChannelPlugin>) -> Self {
        self.plugins.insert(plugin.kind(), plugin);
        self
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn ChannelPlugin>> {
        self.plugins.get(&kind).cloned()
    }

    pub fn supports(&self, kind: ChannelKind) -> bool {
        self.plugins.contains_key(&kind)
    }
}

/// Shared HTTP provider response classification: 2xx succeeds, 408/429/5xx
/// are worth retrying, the rest of 4xx is a hard reject.
pub fn classify_status(status: StatusCode) -> SendOutcome {
    if status.is_success() {
        SendOutcome::Success
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        SendOutcome::Retryable(format!("provider returned status {}", status))
    } else {
        SendOutcome::Permanent(format!("provider rejected request with status {}", status))
    }
}
