use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures_util::{StreamExt, stream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::{ChannelRegistry, OutboundMessage, SendOutcome};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::models::{
    attempt::{AttemptStatus, DeliveryAttempt},
    request::{NewNotificationRequest, NotificationRequest, SubmitOutcome},
    retry::RetryConfig,
};
use crate::store::{InsertOutcome, Store};
use crate::utils::{backoff_delay, render_placeholders};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub retry: RetryConfig,
    pub send_timeout: Duration,
    pub worker_concurrency: usize,
    pub claim_batch_size: usize,
}

/// Core fan-out and retry state machine. Owns every `DeliveryAttempt` row:
/// workers claim attempts via the store CAS and are the single writer for a
/// claimed attempt until they put it back down.
pub struct DispatchEngine {
    store: Arc<dyn Store>,
    channels: Arc<ChannelRegistry>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn Store>,
        channels: Arc<ChannelRegistry>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            channels,
            clock,
            config,
        }
    }

    /// Accept a request. Immediate requests fan out before returning;
    /// scheduled ones wait for the scheduler. A known idempotency key is a
    /// soft duplicate returning the previously assigned id.
    pub async fn submit(
        &self,
        new: NewNotificationRequest,
    ) -> Result<SubmitOutcome, EngineError> {
        if new.recipients.is_empty() {
            return Err(EngineError::Validation(
                "request has no recipients".to_string(),
            ));
        }
        if new.channels.is_empty() {
            return Err(EngineError::Validation(
                "request has no channels".to_string(),
            ));
        }
        for channel in &new.channels {
            if !self.channels.supports(*channel) {
                return Err(EngineError::Validation(format!(
                    "unsupported channel: {}",
                    channel
                )));
            }
        }
        if new.idempotency_key.is_empty() {
            return Err(EngineError::Validation(
                "request has no idempotency key".to_string(),
            ));
        }

        let now = self.clock.now();
        let request = NotificationRequest::from_new(new, now);

        if let InsertOutcome::Duplicate(existing) =
            self.store.insert_request(request.clone()).await?
        {
            info!(
                idempotency_key = %request.idempotency_key,
                request_id = %existing,
                "Duplicate submission, returning existing request"
            );
            return Ok(SubmitOutcome::Duplicate(existing));
        }

        info!(
            request_id = %request.id,
            level = %request.level,
            recipients = request.recipients.len(),
            channels = request.channels.len(),
            "Notification request accepted"
        );

        if request.is_due(now) {
            self.dispatch_request(&request).await?;
        }

        Ok(SubmitOutcome::Accepted(request.id))
    }

    /// Expand recipients x channels into pending attempts. Idempotent: a
    /// request that already has attempts gains no new rows.
    pub async fn dispatch_request(
        &self,
        request: &NotificationRequest,
    ) -> Result<(), EngineError> {
        let existing = self.store.attempts_for_request(request.id).await?;
        if !existing.is_empty() {
            debug!(request_id = %request.id, "Request already fanned out, skipping");
            self.store.mark_dispatched(request.id).await?;
            return Ok(());
        }

        let now = self.clock.now();
        let mut attempts =
            Vec::with_capacity(request.recipients.len() * request.channels.len());
        for recipient in &request.recipients {
            for channel in &request.channels {
                attempts.push(DeliveryAttempt::new(request.id, *recipient, *channel, now));
            }
        }

        let count = attempts.len();
        self.store.insert_attempts(attempts).await?;
        self.store.mark_dispatched(request.id).await?;

        info!(request_id = %request.id, attempts = count, "Request fanned out");

        Ok(())
    }

    pub async fn get_status(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, EngineError> {
        Ok(self.store.attempts_for_request(request_id).await?)
    }

    /// Claim every due pending attempt and run the sends, bounded by the
    /// worker concurrency. Returns the number of attempts processed.
    pub async fn process_due(&self) -> Result<usize, EngineError> {
        let now = self.clock.now();

        // A live worker always writes back within the send timeout; a claim
        // twice that old belongs to a worker that died mid-send.
        let stale_cutoff =
            now - ChronoDuration::milliseconds(self.config.send_timeout.as_millis() as i64 * 2);
        let released = self.store.release_stale_claims(stale_cutoff, now).await?;
        if released > 0 {
            warn!(released, "Released stale in-flight claims back to pending");
        }

        let claimed = self
            .store
            .claim_due_attempts(now, self.config.claim_batch_size)
            .await?;

        if claimed.is_empty() {
            return Ok(0);
        }

        debug!(claimed = claimed.len(), "Processing due delivery attempts");

        let count = claimed.len();
        stream::iter(claimed)
            .map(|attempt| self.process_attempt(attempt))
            .buffer_unordered(self.config.worker_concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(count)
    }

    /// Run one claimed attempt to an outcome and write it back. Errors stay
    /// inside: an attempt that cannot be processed is marked, not bubbled.
    async fn process_attempt(&self, mut attempt: DeliveryAttempt) {
        attempt.attempt_count += 1;

        let outcome = self.try_send(&attempt).await;
        let now = self.clock.now();

        match outcome {
            SendOutcome::Success => {
                attempt.status = AttemptStatus::Sent;
                attempt.last_error = None;
                info!(
                    attempt_id = %attempt.id,
                    request_id = %attempt.request_id,
                    channel = %attempt.channel,
                    attempt_count = attempt.attempt_count,
                    "Notification sent"
                );
            }
            SendOutcome::Permanent(reason) => {
                attempt.status = AttemptStatus::Failed;
                attempt.last_error = Some(reason.clone());
                warn!(
                    attempt_id = %attempt.id,
                    request_id = %attempt.request_id,
                    channel = %attempt.channel,
                    error = %reason,
                    "Notification failed permanently"
                );
            }
            SendOutcome::Retryable(reason) => {
                attempt.last_error = Some(reason.clone());

                if attempt.attempt_count >= self.config.retry.max_attempts {
                    attempt.status = AttemptStatus::Exhausted;
                    warn!(
                        attempt_id = %attempt.id,
                        request_id = %attempt.request_id,
                        channel = %attempt.channel,
                        attempts = attempt.attempt_count,
                        error = %reason,
                        "Retry budget exhausted"
                    );
                } else {
                    let delay = backoff_delay(&self.config.retry, attempt.attempt_count);
                    attempt.status = AttemptStatus::Pending;
                    attempt.next_retry_at = now
                        + ChronoDuration::milliseconds(delay.as_millis() as i64);
                    debug!(
                        attempt_id = %attempt.id,
                        channel = %attempt.channel,
                        attempt_count = attempt.attempt_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Scheduling retry"
                    );
                }
            }
        }

        attempt.updated_at = now;

        if let Err(e) = self.store.update_attempt(&attempt).await {
            error!(
                attempt_id = %attempt.id,
                error = %e,
                "Failed to persist attempt outcome"
            );
        }
    }

    async fn try_send(&self, attempt: &DeliveryAttempt) -> SendOutcome {
        let request = match self.store.get_request(attempt.request_id).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                return SendOutcome::Permanent("request row is missing".to_string());
            }
            Err(e) => {
                return SendOutcome::Retryable(format!("request lookup failed: {}", e));
            }
        };

        let Some(plugin) = self.channels.get(attempt.channel) else {
            // Channels are validated at submit; losing one mid-flight means a
            // registry misconfiguration.
            return SendOutcome::Permanent(format!(
                "no plugin registered for channel {}",
                attempt.channel
            ));
        };

        let title = match render_placeholders(&request.title, &request.metadata) {
            Ok(title) => title,
            Err(e) => return SendOutcome::Permanent(format!("title render failed: {}", e)),
        };
        let body = match render_placeholders(&request.body, &request.metadata) {
            Ok(body) => body,
            Err(e) => return SendOutcome::Permanent(format!("body render failed: {}", e)),
        };

        let message = OutboundMessage {
            request_id: request.id,
            attempt_id: attempt.id,
            recipient: attempt.recipient,
            title,
            body,
            level: request.level,
            metadata: request.metadata.clone(),
        };

        // Sends are not cancellable mid-flight; the timeout is the only way
        // an attempt comes back from a wedged provider.
        match timeout(self.config.send_timeout, plugin.send(&message)).await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::Retryable(format!(
                "send timed out after {:?}",
                self.config.send_timeout
            )),
        }
    }
}
