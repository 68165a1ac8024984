use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::models::webhook::{Gateway, WebhookEvent, WebhookStatus};
use crate::store::Store;
use crate::utils::verify_signature;

/// Result acked back to the gateway. Everything except a signature failure
/// maps to HTTP 200 so the gateway does not retry-storm us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckResult {
    Processed,
    Failed,
    Duplicate,
}

/// Domain-side reaction to a verified webhook event. Implementations are
/// black boxes to the ingest engine; a failure marks the event `failed` for
/// manual review (the gateway's own redelivery window is the retry).
#[async_trait]
pub trait DomainHook: Send + Sync {
    fn handles(&self, event_type: &str) -> bool;

    async fn apply(&self, event: &WebhookEvent) -> Result<(), anyhow::Error>;
}

/// Built-in hook: flips a `sent` push attempt to `delivered` when the
/// provider reports device delivery.
pub struct DeliveryReceiptHook {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl DeliveryReceiptHook {
    pub const EVENT_TYPE: &'static str = "notification.delivered";

    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl DomainHook for DeliveryReceiptHook {
    fn handles(&self, event_type: &str) -> bool {
        event_type == Self::EVENT_TYPE
    }

    async fn apply(&self, event: &WebhookEvent) -> Result<(), anyhow::Error> {
        let attempt_id = event
            .payload
            .get("data")
            .and_then(|d| d.get("attempt_id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("delivery receipt has no data.attempt_id"))?;

        let attempt_id = Uuid::parse_str(attempt_id)
            .map_err(|e| anyhow::anyhow!("invalid attempt_id in delivery receipt: {}", e))?;

        let confirmed = self
            .store
            .mark_attempt_delivered(attempt_id, self.clock.now())
            .await?;

        if !confirmed {
            return Err(anyhow::anyhow!(
                "attempt {} not found or not in sent status",
                attempt_id
            ));
        }

        info!(attempt_id = %attempt_id, "Delivery confirmed by gateway receipt");

        Ok(())
    }
}

/// Receives gateway callbacks: verify, dedup, persist, apply domain update.
/// Concurrent replays of the same (gateway, external_event_id) serialize on a
/// per-key lock so processing is idempotent under races.
pub struct IngestEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    secrets: HashMap<Gateway, String>,
    hooks: Vec<Arc<dyn DomainHook>>,
    key_locks: Mutex<HashMap<(Gateway, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl IngestEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        secrets: HashMap<Gateway, String>,
    ) -> Self {
        Self {
            store,
            clock,
            secrets,
            hooks: Vec::new(),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn DomainHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub async fn ingest(
        &self,
        gateway: Gateway,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<AckResult, EngineError> {
        let secret = self
            .secrets
            .get(&gateway)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::UnknownGateway(gateway.to_string()))?;

        // Rejected before anything is persisted.
        if !verify_signature(secret, raw_body, signature) {
            warn!(gateway = %gateway, "Webhook signature verification failed");
            return Err(EngineError::SignatureInvalid);
        }

        let now = self.clock.now();

        let (external_event_id, event_type, payload) =
            match parse_gateway_payload(gateway, raw_body) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    // Kept for audit, acked so the gateway stops retrying.
                    return self.persist_malformed(gateway, raw_body, &reason).await;
                }
            };

        let lock = self.key_lock(gateway, &external_event_id);
        let guard = lock.lock().await;
        let ack = self
            .process_event(gateway, &external_event_id, &event_type, payload, now)
            .await;
        drop(guard);
        self.release_key_lock(gateway, &external_event_id, &lock);

        ack
    }

    /// Dedup, persist, and apply domain hooks. Runs with the per-key lock
    /// held so replays of one event id cannot interleave.
    async fn process_event(
        &self,
        gateway: Gateway,
        external_event_id: &str,
        event_type: &str,
        payload: JsonValue,
        received_at: DateTime<Utc>,
    ) -> Result<AckResult, EngineError> {
        let event = WebhookEvent::pending(
            gateway,
            external_event_id.to_string(),
            event_type.to_string(),
            payload,
            received_at,
        );

        let (mut event, inserted) = self.store.insert_or_get_event(event).await?;

        if !inserted && event.status == WebhookStatus::Processed {
            info!(
                gateway = %gateway,
                external_event_id = %external_event_id,
                "Replay of processed event, skipping"
            );
            return Ok(AckResult::Duplicate);
        }

        if !inserted {
            info!(
                gateway = %gateway,
                external_event_id = %external_event_id,
                status = %event.status.as_str(),
                "Gateway replay of unprocessed event, reprocessing"
            );
        }

        let result = self.apply_hooks(&event).await;
        let now = self.clock.now();

        let ack = match result {
            Ok(()) => {
                event.status = WebhookStatus::Processed;
                event.processed_at = Some(now);
                event.error_message = None;
                AckResult::Processed
            }
            Err(e) => {
                event.status = WebhookStatus::Failed;
                event.error_message = Some(e.to_string());
                warn!(
                    gateway = %gateway,
                    external_event_id = %external_event_id,
                    event_type = %event_type,
                    error = %e,
                    "Webhook domain update failed, queued for manual review"
                );
                AckResult::Failed
            }
        };

        self.store.update_event(&event).await?;

        info!(
            gateway = %gateway,
            external_event_id = %external_event_id,
            event_type = %event_type,
            outcome = ?ack,
            "Webhook ingested"
        );

        Ok(ack)
    }

    async fn apply_hooks(&self, event: &WebhookEvent) -> Result<(), anyhow::Error> {
        for hook in &self.hooks {
            if hook.handles(&event.event_type) {
                return hook.apply(event).await;
            }
        }

        // Event types nobody reacts to are still recorded as processed.
        Ok(())
    }

    async fn persist_malformed(
        &self,
        gateway: Gateway,
        raw_body: &[u8],
        reason: &str,
    ) -> Result<AckResult, EngineError> {
        let now = self.clock.now();

        let mut event = WebhookEvent::pending(
            gateway,
            format!("malformed-{}", Uuid::new_v4()),
            "unknown".to_string(),
            json!({ "raw": String::from_utf8_lossy(raw_body) }),
            now,
        );
        event.status = WebhookStatus::Failed;
        event.error_message = Some(reason.to_string());

        self.store.insert_or_get_event(event).await?;

        warn!(gateway = %gateway, error = %reason, "Malformed webhook payload persisted");

        Ok(AckResult::Failed)
    }

    fn key_lock(
        &self,
        gateway: Gateway,
        external_event_id: &str,
    ) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap();
        locks
            .entry((gateway, external_event_id.to_string()))
            .or_default()
            .clone()
    }

    /// Evict the map entry once nobody else holds or awaits this key's lock;
    /// two strong refs means the map's and ours.
    fn release_key_lock(
        &self,
        gateway: Gateway,
        external_event_id: &str,
        lock: &Arc<tokio::sync::Mutex<()>>,
    ) {
        let mut locks = self.key_locks.lock().unwrap();
        if Arc::strong_count(lock) <= 2 {
            locks.remove(&(gateway, external_event_id.to_string()));
        }
    }

    /// Per-key locks currently registered. Entries live only while an ingest
    /// for that key is running or queued.
    pub fn active_key_locks(&self) -> usize {
        self.key_locks.lock().unwrap().len()
    }
}

/// Pull (external_event_id, event_type) out of a gateway-shaped JSON body.
fn parse_gateway_payload(
    gateway: Gateway,
    raw_body: &[u8],
) -> Result<(String, String, JsonValue), String> {
    let payload: JsonValue = serde_json::from_slice(raw_body)
        .map_err(|e| format!("invalid JSON body: {}", e))?;

    match gateway {
        Gateway::Stripe => {
            let id = payload
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "missing event id".to_string())?
                .to_string();
            let event_type = payload
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "missing event type".to_string())?
                .to_string();
            Ok((id, event_type, payload))
        }
        Gateway::Paystack => {
            let event_type = payload
                .get("event")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "missing event name".to_string())?
                .to_string();
            let data = payload.get("data").cloned().unwrap_or(JsonValue::Null);
            let id = match data.get("id") {
                Some(JsonValue::Number(n)) => n.to_string(),
                Some(JsonValue::String(s)) => s.clone(),
                _ => data
                    .get("reference")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| "missing data.id or data.reference".to_string())?,
            };
            Ok((id, event_type, payload))
        }
    }
}
