use anyhow::{Error, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};
use uuid::Uuid;

use crate::models::{
    alert::{Alert, AlertCandidate, AlertKind, AlertSeverity},
    attempt::{AttemptStatus, DeliveryAttempt},
    channel::ChannelKind,
    inbox::InboxMessage,
    request::{NotificationLevel, NotificationRequest},
    webhook::{Gateway, WebhookEvent, WebhookStatus},
};
use crate::store::{InsertOutcome, Store};

pub struct PgStore {
    client: Client,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection task ended");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        self.client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS notification_requests (
                    id UUID PRIMARY KEY,
                    idempotency_key TEXT NOT NULL UNIQUE,
                    title TEXT NOT NULL,
                    body TEXT NOT NULL,
                    level TEXT NOT NULL,
                    recipients JSONB NOT NULL,
                    channels JSONB NOT NULL,
                    schedule_at TIMESTAMPTZ,
                    template_code TEXT,
                    metadata JSONB NOT NULL,
                    dispatched BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL
                );

                CREATE TABLE IF NOT EXISTS delivery_attempts (
                    id UUID PRIMARY KEY,
                    request_id UUID NOT NULL REFERENCES notification_requests(id),
                    recipient UUID NOT NULL,
                    channel TEXT NOT NULL,
                    status TEXT NOT NULL,
                    attempt_count INT NOT NULL DEFAULT 0,
                    last_error TEXT,
                    next_retry_at TIMESTAMPTZ NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    UNIQUE (request_id, recipient, channel)
                );
                CREATE INDEX IF NOT EXISTS idx_attempts_due
                    ON delivery_attempts (next_retry_at) WHERE status = 'pending';

                CREATE TABLE IF NOT EXISTS webhook_events (
                    id UUID PRIMARY KEY,
                    gateway TEXT NOT NULL,
                    external_event_id TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    status TEXT NOT NULL,
                    received_at TIMESTAMPTZ NOT NULL,
                    processed_at TIMESTAMPTZ,
                    error_message TEXT,
                    UNIQUE (gateway, external_event_id)
                );

                CREATE TABLE IF NOT EXISTS alerts (
                    id UUID PRIMARY KEY,
                    kind TEXT NOT NULL,
                    gateway TEXT,
                    severity TEXT NOT NULL,
                    message TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    triggered_at TIMESTAMPTZ NOT NULL,
                    resolved_at TIMESTAMPTZ
                );

                CREATE TABLE IF NOT EXISTS inbox_messages (
                    id UUID PRIMARY KEY,
                    user_id UUID NOT NULL,
                    request_id UUID NOT NULL,
                    title TEXT NOT NULL,
                    body TEXT NOT NULL,
                    level TEXT NOT NULL,
                    read BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL
                );
                "#,
            )
            .await
            .map_err(|e| anyhow!("Migration failed: {}", e))?;

        Ok(())
    }
}

fn request_from_row(row: &Row) -> Result<NotificationRequest, Error> {
    let level_str: String = row.try_get("level")?;
    let level: NotificationLevel = serde_json::from_value(serde_json::json!(level_str))
        .map_err(|_| anyhow!("Unknown notification level: {}", level_str))?;

    let recipients: serde_json::Value = row.try_get("recipients")?;
    let channels: serde_json::Value = row.try_get("channels")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;

    Ok(NotificationRequest {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        level,
        recipients: serde_json::from_value(recipients)?,
        channels: serde_json::from_value(channels)?,
        schedule_at: row.try_get("schedule_at")?,
        template_code: row.try_get("template_code")?,
        metadata: serde_json::from_value(metadata)?,
        dispatched: row.try_get("dispatched")?,
        created_at: row.try_get("created_at")?,
    })
}

fn attempt_from_row(row: &Row) -> Result<DeliveryAttempt, Error> {
    let status_str: String = row.try_get("status")?;
    let channel_str: String = row.try_get("channel")?;
    let attempt_count: i32 = row.try_get("attempt_count")?;

    Ok(DeliveryAttempt {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        recipient: row.try_get("recipient")?,
        channel: ChannelKind::from_str(&channel_str)
            .ok_or_else(|| anyhow!("Unknown channel: {}", channel_str))?,
        status: AttemptStatus::from_str(&status_str)
            .ok_or_else(|| anyhow!("Unknown attempt status: {}", status_str))?,
        attempt_count: attempt_count as u32,
        last_error: row.try_get("last_error")?,
        next_retry_at: row.try_get("next_retry_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &Row) -> Result<WebhookEvent, Error> {
    let gateway_str: String = row.try_get("gateway")?;
    let status_str: String = row.try_get("status")?;

    Ok(WebhookEvent {
        id: row.try_get("id")?,
        gateway: Gateway::from_str(&gateway_str)
            .ok_or_else(|| anyhow!("Unknown gateway: {}", gateway_str))?,
        external_event_id: row.try_get("external_event_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status: WebhookStatus::from_str(&status_str)
            .ok_or_else(|| anyhow!("Unknown webhook status: {}", status_str))?,
        received_at: row.try_get("received_at")?,
        processed_at: row.try_get("processed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

fn alert_from_row(row: &Row) -> Result<Alert, Error> {
    let kind_str: String = row.try_get("kind")?;
    let gateway_str: Option<String> = row.try_get("gateway")?;
    let severity_str: String = row.try_get("severity")?;

    let gateway = match gateway_str {
        Some(s) => Some(Gateway::from_str(&s).ok_or_else(|| anyhow!("Unknown gateway: {}", s))?),
        None => None,
    };

    let severity = match severity_str.as_str() {
        "warning" => AlertSeverity::Warning,
        "critical" => AlertSeverity::Critical,
        other => return Err(anyhow!("Unknown alert severity: {}", other)),
    };

    Ok(Alert {
        id: row.try_get("id")?,
        kind: AlertKind::from_str(&kind_str)
            .ok_or_else(|| anyhow!("Unknown alert kind: {}", kind_str))?,
        gateway,
        severity,
        message: row.try_get("message")?,
        payload: row.try_get("payload")?,
        triggered_at: row.try_get("triggered_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn severity_str(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Warning => "warning",
        AlertSeverity::Critical => "critical",
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_request(&self, request: NotificationRequest) -> Result<InsertOutcome, Error> {
        let inserted = self
            .client
            .execute(
                r#"
                INSERT INTO notification_requests
                    (id, idempotency_key, title, body, level, recipients, channels,
                     schedule_at, template_code, metadata, dispatched, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (idempotency_key) DO NOTHING
                "#,
                &[
                    &request.id,
                    &request.idempotency_key,
                    &request.title,
                    &request.body,
                    &request.level.to_string(),
                    &serde_json::to_value(&request.recipients)?,
                    &serde_json::to_value(&request.channels)?,
                    &request.schedule_at,
                    &request.template_code,
                    &serde_json::to_value(&request.metadata)?,
                    &request.dispatched,
                    &request.created_at,
                ],
            )
            .await
            .map_err(|e| anyhow!("Request insert failed: {}", e))?;

        if inserted == 1 {
            return Ok(InsertOutcome::Inserted);
        }

        let row = self
            .client
            .query_one(
                "SELECT id FROM notification_requests WHERE idempotency_key = $1",
                &[&request.idempotency_key],
            )
            .await
            .map_err(|e| anyhow!("Duplicate request lookup failed: {}", e))?;

        Ok(InsertOutcome::Duplicate(row.try_get("id")?))
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<NotificationRequest>, Error> {
        let row = self
            .client
            .query_opt("SELECT * FROM notification_requests WHERE id = $1", &[&id])
            .await
            .map_err(|e| anyhow!("Request lookup failed: {}", e))?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn due_requests(&self, now: DateTime<Utc>) -> Result<Vec<NotificationRequest>, Error> {
        let rows = self
            .client
            .query(
                r#"
                SELECT * FROM notification_requests
                WHERE dispatched = FALSE AND (schedule_at IS NULL OR schedule_at <= $1)
                ORDER BY created_at
                "#,
                &[&now],
            )
            .await
            .map_err(|e| anyhow!("Due request scan failed: {}", e))?;

        rows.iter().map(request_from_row).collect()
    }

    async fn mark_dispatched(&self, id: Uuid) -> Result<(), Error> {
        self.client
            .execute(
                "UPDATE notification_requests SET dispatched = TRUE WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| anyhow!("Dispatch flag update failed: {}", e))?;

        Ok(())
    }

    async fn insert_attempts(&self, attempts: Vec<DeliveryAttempt>) -> Result<(), Error> {
        for attempt in &attempts {
            self.client
                .execute(
                    r#"
                    INSERT INTO delivery_attempts
                        (id, request_id, recipient, channel, status, attempt_count,
                         last_error, next_retry_at, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    ON CONFLICT (request_id, recipient, channel) DO NOTHING
                    "#,
                    &[
                        &attempt.id,
                        &attempt.request_id,
                        &attempt.recipient,
                        &attempt.channel.as_str(),
                        &attempt.status.as_str(),
                        &(attempt.attempt_count as i32),
                        &attempt.last_error,
                        &attempt.next_retry_at,
                        &attempt.created_at,
                        &attempt.updated_at,
                    ],
                )
                .await
                .map_err(|e| anyhow!("Attempt insert failed: {}", e))?;
        }

        Ok(())
    }

    async fn attempts_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, Error> {
        let rows = self
            .client
            .query(
                "SELECT * FROM delivery_attempts WHERE request_id = $1 ORDER BY recipient, channel",
                &[&request_id],
            )
            .await
            .map_err(|e| anyhow!("Attempt lookup failed: {}", e))?;

        rows.iter().map(attempt_from_row).collect()
    }

    async fn claim_due_attempts(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, Error> {
        let rows = self
            .client
            .query(
                r#"
                UPDATE delivery_attempts
                SET status = 'in_flight', updated_at = $1
                WHERE id IN (
                    SELECT id FROM delivery_attempts
                    WHERE status = 'pending' AND next_retry_at <= $1
                    ORDER BY next_retry_at
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING *
                "#,
                &[&now, &(limit as i64)],
            )
            .await
            .map_err(|e| anyhow!("Attempt claim failed: {}", e))?;

        rows.iter().map(attempt_from_row).collect()
    }

    async fn update_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), Error> {
        // Terminal rows are filtered in the predicate so a late worker write
        // can never regress a finished attempt.
        self.client
            .execute(
                r#"
                UPDATE delivery_attempts
                SET status = $2, attempt_count = $3, last_error = $4,
                    next_retry_at = $5, updated_at = $6
                WHERE id = $1
                  AND status NOT IN ('delivered', 'failed', 'exhausted')
                "#,
                &[
                    &attempt.id,
                    &attempt.status.as_str(),
                    &(attempt.attempt_count as i32),
                    &attempt.last_error,
                    &attempt.next_retry_at,
                    &attempt.updated_at,
                ],
            )
            .await
            .map_err(|e| anyhow!("Attempt update failed: {}", e))?;

        Ok(())
    }

    async fn release_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let released = self
            .client
            .execute(
                r#"
                UPDATE delivery_attempts
                SET status = 'pending', updated_at = $2
                WHERE status = 'in_flight' AND updated_at <= $1
                "#,
                &[&cutoff, &now],
            )
            .await
            .map_err(|e| anyhow!("Stale claim release failed: {}", e))?;

        Ok(released)
    }

    async fn mark_attempt_delivered(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let updated = self
            .client
            .execute(
                r#"
                UPDATE delivery_attempts
                SET status = 'delivered', updated_at = $2
                WHERE id = $1 AND status = 'sent'
                "#,
                &[&id, &now],
            )
            .await
            .map_err(|e| anyhow!("Delivery confirmation failed: {}", e))?;

        Ok(updated == 1)
    }

    async fn pending_attempt_count(&self) -> Result<u64, Error> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) AS count FROM delivery_attempts WHERE status = 'pending'",
                &[],
            )
            .await
            .map_err(|e| anyhow!("Pending count failed: {}", e))?;

        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    async fn insert_or_get_event(
        &self,
        event: WebhookEvent,
    ) -> Result<(WebhookEvent, bool), Error> {
        let inserted = self
            .client
            .execute(
                r#"
                INSERT INTO webhook_events
                    (id, gateway, external_event_id, event_type, payload, status,
                     received_at, processed_at, error_message)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (gateway, external_event_id) DO NOTHING
                "#,
                &[
                    &event.id,
                    &event.gateway.as_str(),
                    &event.external_event_id,
                    &event.event_type,
                    &event.payload,
                    &event.status.as_str(),
                    &event.received_at,
                    &event.processed_at,
                    &event.error_message,
                ],
            )
            .await
            .map_err(|e| anyhow!("Webhook event insert failed: {}", e))?;

        if inserted == 1 {
            return Ok((event, true));
        }

        let row = self
            .client
            .query_one(
                "SELECT * FROM webhook_events WHERE gateway = $1 AND external_event_id = $2",
                &[&event.gateway.as_str(), &event.external_event_id],
            )
            .await
            .map_err(|e| anyhow!("Webhook event lookup failed: {}", e))?;

        Ok((event_from_row(&row)?, false))
    }

    async fn update_event(&self, event: &WebhookEvent) -> Result<(), Error> {
        self.client
            .execute(
                r#"
                UPDATE webhook_events
                SET status = $2, processed_at = $3, error_message = $4
                WHERE id = $1
                "#,
                &[
                    &event.id,
                    &event.status.as_str(),
                    &event.processed_at,
                    &event.error_message,
                ],
            )
            .await
            .map_err(|e| anyhow!("Webhook event update failed: {}", e))?;

        Ok(())
    }

    async fn events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<WebhookEvent>, Error> {
        let rows = self
            .client
            .query(
                "SELECT * FROM webhook_events WHERE received_at >= $1 ORDER BY received_at",
                &[&cutoff],
            )
            .await
            .map_err(|e| anyhow!("Webhook event scan failed: {}", e))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn last_event_received_at(
        &self,
        gateway: Option<Gateway>,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        let row = match gateway {
            Some(g) => self
                .client
                .query_one(
                    "SELECT MAX(received_at) AS last FROM webhook_events WHERE gateway = $1",
                    &[&g.as_str()],
                )
                .await
                .map_err(|e| anyhow!("Last event lookup failed: {}", e))?,
            None => self
                .client
                .query_one("SELECT MAX(received_at) AS last FROM webhook_events", &[])
                .await
                .map_err(|e| anyhow!("Last event lookup failed: {}", e))?,
        };

        Ok(row.try_get("last")?)
    }

    async fn upsert_open_alert(
        &self,
        candidate: &AlertCandidate,
        now: DateTime<Utc>,
    ) -> Result<(Alert, bool), Error> {
        let gateway_str = candidate.gateway.map(|g| g.as_str());

        let existing = self
            .client
            .query_opt(
                r#"
                UPDATE alerts
                SET triggered_at = $3, payload = $4, message = $5
                WHERE kind = $1
                  AND gateway IS NOT DISTINCT FROM $2
                  AND resolved_at IS NULL
                RETURNING *
                "#,
                &[
                    &candidate.kind.as_str(),
                    &gateway_str,
                    &now,
                    &candidate.payload,
                    &candidate.message,
                ],
            )
            .await
            .map_err(|e| anyhow!("Alert refresh failed: {}", e))?;

        if let Some(row) = existing {
            return Ok((alert_from_row(&row)?, false));
        }

        let id = Uuid::new_v4();
        let row = self
            .client
            .query_one(
                r#"
                INSERT INTO alerts
                    (id, kind, gateway, severity, message, payload, triggered_at, resolved_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NULL)
                RETURNING *
                "#,
                &[
                    &id,
                    &candidate.kind.as_str(),
                    &gateway_str,
                    &severity_str(candidate.severity),
                    &candidate.message,
                    &candidate.payload,
                    &now,
                ],
            )
            .await
            .map_err(|e| anyhow!("Alert insert failed: {}", e))?;

        Ok((alert_from_row(&row)?, true))
    }

    async fn resolve_alert(
        &self,
        kind: AlertKind,
        gateway: Option<Gateway>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let gateway_str = gateway.map(|g| g.as_str());

        let updated = self
            .client
            .execute(
                r#"
                UPDATE alerts
                SET resolved_at = $3
                WHERE kind = $1
                  AND gateway IS NOT DISTINCT FROM $2
                  AND resolved_at IS NULL
                "#,
                &[&kind.as_str(), &gateway_str, &now],
            )
            .await
            .map_err(|e| anyhow!("Alert resolve failed: {}", e))?;

        Ok(updated > 0)
    }

    async fn open_alerts(&self) -> Result<Vec<Alert>, Error> {
        let rows = self
            .client
            .query(
                "SELECT * FROM alerts WHERE resolved_at IS NULL ORDER BY triggered_at",
                &[],
            )
            .await
            .map_err(|e| anyhow!("Open alert scan failed: {}", e))?;

        rows.iter().map(alert_from_row).collect()
    }

    async fn insert_inbox_message(&self, message: InboxMessage) -> Result<(), Error> {
        self.client
            .execute(
                r#"
                INSERT INTO inbox_messages
                    (id, user_id, request_id, title, body, level, read, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
                &[
                    &message.id,
                    &message.user_id,
                    &message.request_id,
                    &message.title,
                    &message.body,
                    &message.level.to_string(),
                    &message.read,
                    &message.created_at,
                ],
            )
            .await
            .map_err(|e| anyhow!("Inbox insert failed: {}", e))?;

        Ok(())
    }

    async fn inbox_for_user(&self, user_id: Uuid) -> Result<Vec<InboxMessage>, Error> {
        let rows = self
            .client
            .query(
                "SELECT * FROM inbox_messages WHERE user_id = $1 ORDER BY created_at",
                &[&user_id],
            )
            .await
            .map_err(|e| anyhow!("Inbox lookup failed: {}", e))?;

        rows.iter()
            .map(|row| {
                let level_str: String = row.try_get("level")?;
                let level: NotificationLevel =
                    serde_json::from_value(serde_json::json!(level_str))
                        .map_err(|_| anyhow!("Unknown notification level: {}", level_str))?;

                Ok(InboxMessage {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    request_id: row.try_get("request_id")?,
                    title: row.try_get("title")?,
                    body: row.try_get("body")?,
                    level,
                    read: row.try_get("read")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1 AS check", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}
