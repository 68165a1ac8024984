use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::{dispatch::DispatchEngine, monitor::Monitor};
use crate::error::EngineError;
use crate::models::{
    channel::ChannelKind,
    request::{NewNotificationRequest, NotificationLevel},
};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: StdDuration,
    pub stats_window: Duration,
    /// Pending-attempt depth above which info-level scheduled requests are
    /// deferred to a later tick. Submissions are never dropped.
    pub max_pending_depth: u64,
    pub operator_recipients: Vec<Uuid>,
    pub alert_channels: Vec<ChannelKind>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickSummary {
    pub dispatched_requests: usize,
    pub deferred_requests: usize,
    pub processed_attempts: usize,
    pub new_alerts: usize,
}

/// Periodic driver: due-request dispatch, due-attempt processing, monitoring
/// sweep. A tick that fails is logged and the next tick runs untouched.
pub struct Scheduler {
    store: Arc<dyn Store>,
    dispatch: Arc<DispatchEngine>,
    monitor: Arc<Monitor>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        dispatch: Arc<DispatchEngine>,
        monitor: Arc<Monitor>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            dispatch,
            monitor,
            clock,
            config,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            interval.tick().await;

            match self.tick().await {
                Ok(summary) => {
                    debug!(
                        dispatched = summary.dispatched_requests,
                        deferred = summary.deferred_requests,
                        processed = summary.processed_attempts,
                        new_alerts = summary.new_alerts,
                        "Scheduler tick completed"
                    );
                }
                Err(e) => {
                    // Overdue items are picked up by the next successful tick.
                    error!(error = %e, "Scheduler tick failed");
                }
            }
        }
    }

    /// One full pass. Per-request dispatch failures are contained so a bad
    /// request cannot block the rest of the scan.
    pub async fn tick(&self) -> Result<TickSummary, EngineError> {
        let now = self.clock.now();
        let mut summary = TickSummary::default();

        let pending_depth = self.store.pending_attempt_count().await?;
        let throttled = pending_depth > self.config.max_pending_depth;
        if throttled {
            warn!(
                pending_depth,
                max = self.config.max_pending_depth,
                "Pending attempt backlog high, deferring info-level requests"
            );
        }

        for request in self.store.due_requests(now).await? {
            if throttled && request.level == NotificationLevel::Info {
                debug!(request_id = %request.id, "Deferring info-level request");
                summary.deferred_requests += 1;
                continue;
            }

            match self.dispatch.dispatch_request(&request).await {
                Ok(()) => summary.dispatched_requests += 1,
                Err(e) => {
                    error!(
                        request_id = %request.id,
                        error = %e,
                        "Failed to dispatch due request"
                    );
                }
            }
        }

        summary.processed_attempts = self.dispatch.process_due().await?;

        let new_alerts = self.monitor.sweep(self.config.stats_window).await?;
        summary.new_alerts = new_alerts.len();

        for alert in new_alerts {
            if let Err(e) = self.notify_operators(&alert).await {
                error!(
                    kind = %alert.kind,
                    error = %e,
                    "Failed to dispatch operator alert notification"
                );
            }
        }

        Ok(summary)
    }

    /// Alerts are notifications too: raised alerts go out through the same
    /// dispatch engine, keyed so one open alert produces one notification.
    async fn notify_operators(&self, alert: &crate::models::alert::Alert) -> Result<(), EngineError> {
        if self.config.operator_recipients.is_empty() {
            warn!(kind = %alert.kind, "No operator recipients configured, alert not notified");
            return Ok(());
        }

        let gateway_label = alert
            .gateway
            .map(|g| g.to_string())
            .unwrap_or_else(|| "global".to_string());

        let request = NewNotificationRequest {
            idempotency_key: format!("alert-{}", alert.id),
            title: format!("[{}] {}", gateway_label, alert.kind),
            body: alert.message.clone(),
            level: NotificationLevel::Critical,
            recipients: self.config.operator_recipients.clone(),
            channels: self.config.alert_channels.clone(),
            schedule_at: None,
            template_code: None,
            metadata: HashMap::new(),
        };

        self.dispatch.submit(request).await?;

        Ok(())
    }
}
