pub mod memory;
pub mod postgres;

use anyhow::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    alert::{Alert, AlertCandidate, AlertKind},
    attempt::DeliveryAttempt,
    inbox::InboxMessage,
    request::NotificationRequest,
    webhook::{Gateway, WebhookEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate(Uuid),
}

/// Persistence seam for the engines. The in-memory implementation backs tests
/// and single-node deployments; the Postgres implementation backs production.
#[async_trait]
pub trait Store: Send + Sync {
    // --- notification requests ---

    /// Insert unless the idempotency key is already taken; duplicates hand
    /// back the existing request id.
    async fn insert_request(&self, request: NotificationRequest) -> Result<InsertOutcome, Error>;

    async fn get_request(&self, id: Uuid) -> Result<Option<NotificationRequest>, Error>;

    /// Undispatched requests whose schedule time has passed.
    async fn due_requests(&self, now: DateTime<Utc>) -> Result<Vec<NotificationRequest>, Error>;

    async fn mark_dispatched(&self, id: Uuid) -> Result<(), Error>;

    // --- delivery attempts ---

    /// Insert fan-out rows. (request_id, recipient, channel) is unique, so a
    /// racing double fan-out collapses to one row per destination.
    async fn insert_attempts(&self, attempts: Vec<DeliveryAttempt>) -> Result<(), Error>;

    async fn attempts_for_request(&self, request_id: Uuid)
    -> Result<Vec<DeliveryAttempt>, Error>;

    /// Atomically claim due pending attempts (`pending` -> `in_flight`) so no
    /// two workers pick up the same attempt.
    async fn claim_due_attempts(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, Error>;

    /// Write back a worker-owned attempt. Attempts already in a terminal
    /// status are left untouched.
    async fn update_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), Error>;

    /// Put abandoned claims back into rotation: `in_flight` attempts not
    /// touched since `cutoff` (their worker died or failed to write back)
    /// return to `pending`. Returns the number released.
    async fn release_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error>;

    /// Confirmation path: `sent` -> `delivered`. Returns false when the
    /// attempt is unknown or not in `sent`.
    async fn mark_attempt_delivered(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, Error>;

    async fn pending_attempt_count(&self) -> Result<u64, Error>;

    // --- webhook events ---

    /// Insert keyed by (gateway, external_event_id); an existing row is
    /// returned instead. The bool is true when a new row was inserted.
    async fn insert_or_get_event(
        &self,
        event: WebhookEvent,
    ) -> Result<(WebhookEvent, bool), Error>;

    async fn update_event(&self, event: &WebhookEvent) -> Result<(), Error>;

    async fn events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<WebhookEvent>, Error>;

    async fn last_event_received_at(
        &self,
        gateway: Option<Gateway>,
    ) -> Result<Option<DateTime<Utc>>, Error>;

    // --- alerts ---

    /// Raise or refresh an open alert for (kind, gateway). An already-open
    /// alert gets its triggered_at/payload refreshed instead of a new row.
    /// The bool is true when a new alert was opened.
    async fn upsert_open_alert(
        &self,
        candidate: &AlertCandidate,
        now: DateTime<Utc>,
    ) -> Result<(Alert, bool), Error>;

    /// Close the open alert for (kind, gateway) if one exists.
    async fn resolve_alert(
        &self,
        kind: AlertKind,
        gateway: Option<Gateway>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error>;

    async fn open_alerts(&self) -> Result<Vec<Alert>, Error>;

    // --- in-app inbox ---

    async fn insert_inbox_message(&self, message: InboxMessage) -> Result<(), Error>;

    async fn inbox_for_user(&self, user_id: Uuid) -> Result<Vec<InboxMessage>, Error>;

    // --- health ---

    async fn health_check(&self) -> Result<(), Error>;
}
