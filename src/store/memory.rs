use std::collections::HashMap;

use anyhow::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    alert::{Alert, AlertCandidate, AlertKind},
    attempt::{AttemptStatus, DeliveryAttempt},
    channel::ChannelKind,
    inbox::InboxMessage,
    request::NotificationRequest,
    webhook::{Gateway, WebhookEvent},
};
use crate::store::{InsertOutcome, Store};

#[derive(Default)]
struct Inner {
    requests: HashMap<Uuid, NotificationRequest>,
    request_keys: HashMap<String, Uuid>,
    attempts: HashMap<Uuid, DeliveryAttempt>,
    attempt_keys: HashMap<(Uuid, Uuid, ChannelKind), Uuid>,
    events: HashMap<Uuid, WebhookEvent>,
    event_keys: HashMap<(Gateway, String), Uuid>,
    alerts: Vec<Alert>,
    inbox: Vec<InboxMessage>,
}

/// Single-node store; all invariants (idempotency keys, dedup keys, claim
/// CAS, terminal-status protection) are enforced under one write lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_request(&self, request: NotificationRequest) -> Result<InsertOutcome, Error> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.request_keys.get(&request.idempotency_key) {
            return Ok(InsertOutcome::Duplicate(*existing));
        }

        inner
            .request_keys
            .insert(request.idempotency_key.clone(), request.id);
        inner.requests.insert(request.id, request);

        Ok(InsertOutcome::Inserted)
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<NotificationRequest>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.requests.get(&id).cloned())
    }

    async fn due_requests(&self, now: DateTime<Utc>) -> Result<Vec<NotificationRequest>, Error> {
        let inner = self.inner.read().await;

        let mut due: Vec<NotificationRequest> = inner
            .requests
            .values()
            .filter(|r| !r.dispatched && r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.created_at);

        Ok(due)
    }

    async fn mark_dispatched(&self, id: Uuid) -> Result<(), Error> {
        let mut inner = self.inner.write().await;

        if let Some(request) = inner.requests.get_mut(&id) {
            request.dispatched = true;
        }

        Ok(())
    }

    async fn insert_attempts(&self, attempts: Vec<DeliveryAttempt>) -> Result<(), Error> {
        let mut inner = self.inner.write().await;

        for attempt in attempts {
            let key = (attempt.request_id, attempt.recipient, attempt.channel);
            if inner.attempt_keys.contains_key(&key) {
                continue;
            }
            inner.attempt_keys.insert(key, attempt.id);
            inner.attempts.insert(attempt.id, attempt);
        }

        Ok(())
    }

    async fn attempts_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, Error> {
        let inner = self.inner.read().await;

        let mut attempts: Vec<DeliveryAttempt> = inner
            .attempts
            .values()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| (a.recipient, a.channel.as_str()));

        Ok(attempts)
    }

    async fn claim_due_attempts(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, Error> {
        let mut inner = self.inner.write().await;

        let mut due_ids: Vec<(DateTime<Utc>, Uuid)> = inner
            .attempts
            .values()
            .filter(|a| a.status == AttemptStatus::Pending && a.next_retry_at <= now)
            .map(|a| (a.next_retry_at, a.id))
            .collect();
        due_ids.sort();
        due_ids.truncate(limit);

        let mut claimed = Vec::with_capacity(due_ids.len());
        for (_, id) in due_ids {
            if let Some(attempt) = inner.attempts.get_mut(&id) {
                attempt.status = AttemptStatus::InFlight;
                attempt.updated_at = now;
                claimed.push(attempt.clone());
            }
        }

        Ok(claimed)
    }

    async fn update_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), Error> {
        let mut inner = self.inner.write().await;

        match inner.attempts.get_mut(&attempt.id) {
            Some(existing) if existing.status.is_terminal() => {
                warn!(
                    attempt_id = %attempt.id,
                    status = %existing.status,
                    "ignoring update for attempt already in terminal status"
                );
            }
            Some(existing) => {
                *existing = attempt.clone();
            }
            None => {
                warn!(attempt_id = %attempt.id, "update for unknown attempt");
            }
        }

        Ok(())
    }

    async fn release_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let mut inner = self.inner.write().await;

        let mut released = 0;
        for attempt in inner.attempts.values_mut() {
            if attempt.status == AttemptStatus::InFlight && attempt.updated_at <= cutoff {
                attempt.status = AttemptStatus::Pending;
                attempt.updated_at = now;
                released += 1;
            }
        }

        Ok(released)
    }

    async fn mark_attempt_delivered(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;

        match inner.attempts.get_mut(&id) {
            Some(attempt) if attempt.status == AttemptStatus::Sent => {
                attempt.status = AttemptStatus::Delivered;
                attempt.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_attempt_count(&self) -> Result<u64, Error> {
        let inner = self.inner.read().await;

        let count = inner
            .attempts
            .values()
            .filter(|a| a.status == AttemptStatus::Pending)
            .count();

        Ok(count as u64)
    }

    async fn insert_or_get_event(
        &self,
        event: WebhookEvent,
    ) -> Result<(WebhookEvent, bool), Error> {
        let mut inner = self.inner.write().await;

        let key = (event.gateway, event.external_event_id.clone());

        if let Some(existing_id) = inner.event_keys.get(&key) {
            let existing = inner
                .events
                .get(existing_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("dangling webhook event key"))?;
            return Ok((existing, false));
        }

        inner.event_keys.insert(key, event.id);
        inner.events.insert(event.id, event.clone());

        Ok((event, true))
    }

    async fn update_event(&self, event: &WebhookEvent) -> Result<(), Error> {
        let mut inner = self.inner.write().await;

        inner.events.insert(event.id, event.clone());

        Ok(())
    }

    async fn events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<WebhookEvent>, Error> {
        let inner = self.inner.read().await;

        let mut events: Vec<WebhookEvent> = inner
            .events
            .values()
            .filter(|e| e.received_at >= cutoff)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.received_at);

        Ok(events)
    }

    async fn last_event_received_at(
        &self,
        gateway: Option<Gateway>,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        let inner = self.inner.read().await;

        let last = inner
            .events
            .values()
            .filter(|e| gateway.is_none_or(|g| e.gateway == g))
            .map(|e| e.received_at)
            .max();

        Ok(last)
    }

    async fn upsert_open_alert(
        &self,
        candidate: &AlertCandidate,
        now: DateTime<Utc>,
    ) -> Result<(Alert, bool), Error> {
        let mut inner = self.inner.write().await;

        if let Some(open) = inner
            .alerts
            .iter_mut()
            .find(|a| a.is_open() && a.kind == candidate.kind && a.gateway == candidate.gateway)
        {
            open.triggered_at = now;
            open.payload = candidate.payload.clone();
            open.message = candidate.message.clone();
            return Ok((open.clone(), false));
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            kind: candidate.kind,
            gateway: candidate.gateway,
            severity: candidate.severity,
            message: candidate.message.clone(),
            payload: candidate.payload.clone(),
            triggered_at: now,
            resolved_at: None,
        };
        inner.alerts.push(alert.clone());

        Ok((alert, true))
    }

    async fn resolve_alert(
        &self,
        kind: AlertKind,
        gateway: Option<Gateway>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;

        if let Some(open) = inner
            .alerts
            .iter_mut()
            .find(|a| a.is_open() && a.kind == kind && a.gateway == gateway)
        {
            open.resolved_at = Some(now);
            return Ok(true);
        }

        Ok(false)
    }

    async fn open_alerts(&self) -> Result<Vec<Alert>, Error> {
        let inner = self.inner.read().await;

        Ok(inner.alerts.iter().filter(|a| a.is_open()).cloned().collect())
    }

    async fn insert_inbox_message(&self, message: InboxMessage) -> Result<(), Error> {
        let mut inner = self.inner.write().await;

        inner.inbox.push(message);

        Ok(())
    }

    async fn inbox_for_user(&self, user_id: Uuid) -> Result<Vec<InboxMessage>, Error> {
        let inner = self.inner.read().await;

        Ok(inner
            .inbox
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
