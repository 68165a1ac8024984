use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use notify_engine::{
    channels::{ChannelPlugin, ChannelRegistry, OutboundMessage, SendOutcome},
    channels::inapp::InAppChannel,
    clock::{Clock, ManualClock},
    engine::{
        dispatch::{DispatchConfig, DispatchEngine},
        monitor::Monitor,
        scheduler::{Scheduler, SchedulerConfig},
    },
    models::{
        alert::{AlertKind, AlertRule, AlertSeverity, Comparison},
        attempt::{AttemptStatus, DeliveryAttempt},
        channel::ChannelKind,
        request::{NewNotificationRequest, NotificationLevel, SubmitOutcome},
        retry::RetryConfig,
        webhook::{Gateway, WebhookEvent, WebhookStatus},
    },
    store::{Store, memory::MemoryStore},
};
use serde_json::json;
use uuid::Uuid;

struct ScriptedChannel {
    kind: ChannelKind,
    outcome: SendOutcome,
    calls: Arc<AtomicU32>,
}

impl ScriptedChannel {
    fn new(kind: ChannelKind, outcome: SendOutcome) -> (Arc<Self>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let channel = Arc::new(Self {
            kind,
            outcome,
            calls: calls.clone(),
        });
        (channel, calls)
    }
}

#[async_trait]
impl ChannelPlugin for ScriptedChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, _message: &OutboundMessage) -> SendOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
    ))
}

fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        retry: RetryConfig {
            max_attempts: 5,
            base_delay_ms: 30_000,
            backoff_factor: 2,
            max_delay_ms: 1_800_000,
        },
        send_timeout: StdDuration::from_secs(10),
        worker_concurrency: 4,
        claim_batch_size: 100,
    }
}

fn scheduler_config(max_pending_depth: u64, operators: Vec<Uuid>) -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: StdDuration::from_secs(60),
        stats_window: Duration::hours(24),
        max_pending_depth,
        operator_recipients: operators,
        alert_channels: vec![ChannelKind::InApp],
    }
}

fn request(
    key: &str,
    level: NotificationLevel,
    schedule_at: Option<chrono::DateTime<Utc>>,
) -> NewNotificationRequest {
    NewNotificationRequest {
        idempotency_key: key.to_string(),
        title: "Session reminder".to_string(),
        body: "Your session starts soon".to_string(),
        level,
        recipients: vec![Uuid::new_v4()],
        channels: vec![ChannelKind::InApp],
        schedule_at,
        template_code: None,
        metadata: HashMap::new(),
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    dispatch: Arc<DispatchEngine>,
    scheduler: Scheduler,
    calls: Arc<AtomicU32>,
}

fn harness(
    outcome: SendOutcome,
    rules: Vec<AlertRule>,
    config: SchedulerConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();

    let (channel, calls) = ScriptedChannel::new(ChannelKind::InApp, outcome);
    let registry = Arc::new(ChannelRegistry::new().register(channel));

    let dispatch = Arc::new(DispatchEngine::new(
        store.clone(),
        registry,
        clock.clone(),
        dispatch_config(),
    ));
    let monitor = Arc::new(Monitor::new(store.clone(), clock.clone(), rules));
    let scheduler = Scheduler::new(
        store.clone(),
        dispatch.clone(),
        monitor,
        clock.clone(),
        config,
    );

    Harness {
        store,
        clock,
        dispatch,
        scheduler,
        calls,
    }
}

/// Test: A scheduled request dispatches on the first tick after it is due
#[tokio::test]
async fn test_scheduled_request_dispatches_when_due() -> Result<()> {
    let h = harness(
        SendOutcome::Success,
        Vec::new(),
        scheduler_config(10_000, Vec::new()),
    );

    let schedule_at = h.clock.now() + Duration::minutes(30);
    let outcome = h
        .dispatch
        .submit(request("sched-1", NotificationLevel::Info, Some(schedule_at)))
        .await?;
    let request_id = outcome.request_id();

    // Not due yet: the tick leaves it untouched.
    let summary = h.scheduler.tick().await?;
    assert_eq!(summary.dispatched_requests, 0);
    assert!(h.dispatch.get_status(request_id).await?.is_empty());

    h.clock.advance(Duration::minutes(31));
    let summary = h.scheduler.tick().await?;

    assert_eq!(summary.dispatched_requests, 1);
    assert_eq!(summary.processed_attempts, 1);

    let attempts = h.dispatch.get_status(request_id).await?;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Sent);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: A due request is not dispatched twice across ticks
#[tokio::test]
async fn test_dispatched_request_not_rescanned() -> Result<()> {
    let h = harness(
        SendOutcome::Success,
        Vec::new(),
        scheduler_config(10_000, Vec::new()),
    );

    let schedule_at = h.clock.now() + Duration::minutes(5);
    let outcome = h
        .dispatch
        .submit(request("sched-2", NotificationLevel::Info, Some(schedule_at)))
        .await?;
    let request_id = outcome.request_id();

    h.clock.advance(Duration::minutes(6));
    h.scheduler.tick().await?;
    h.clock.advance(Duration::minutes(1));
    let summary = h.scheduler.tick().await?;

    assert_eq!(summary.dispatched_requests, 0);
    assert_eq!(h.dispatch.get_status(request_id).await?.len(), 1);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Backpressure defers info-level requests but never critical ones
#[tokio::test]
async fn test_backpressure_defers_info_level_only() -> Result<()> {
    let h = harness(
        SendOutcome::Success,
        Vec::new(),
        scheduler_config(0, Vec::new()),
    );

    // A backlog attempt not yet due, so the tick cannot drain it.
    let mut backlog = DeliveryAttempt::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        ChannelKind::InApp,
        h.clock.now(),
    );
    backlog.next_retry_at = h.clock.now() + Duration::hours(1);
    h.store.insert_attempts(vec![backlog]).await?;

    let due_at = h.clock.now() + Duration::minutes(5);
    let info = h
        .dispatch
        .submit(request("bp-info", NotificationLevel::Info, Some(due_at)))
        .await?;
    let critical = h
        .dispatch
        .submit(request("bp-critical", NotificationLevel::Critical, Some(due_at)))
        .await?;

    h.clock.advance(Duration::minutes(6));
    let summary = h.scheduler.tick().await?;

    assert_eq!(summary.deferred_requests, 1);
    assert_eq!(summary.dispatched_requests, 1);
    assert!(h.dispatch.get_status(info.request_id()).await?.is_empty());
    assert_eq!(h.dispatch.get_status(critical.request_id()).await?.len(), 1);

    // The next tick drains the backlog but measures depth before doing so,
    // so the info request stays deferred until the tick after.
    h.clock.advance(Duration::hours(1));
    let summary = h.scheduler.tick().await?;
    assert_eq!(summary.deferred_requests, 1);

    let summary = h.scheduler.tick().await?;
    assert_eq!(summary.dispatched_requests, 1);
    assert_eq!(h.dispatch.get_status(info.request_id()).await?.len(), 1);

    Ok(())
}

/// Test: A tick completes even when every send fails
#[tokio::test]
async fn test_tick_survives_failing_sends() -> Result<()> {
    let h = harness(
        SendOutcome::Retryable("provider down".to_string()),
        Vec::new(),
        scheduler_config(10_000, Vec::new()),
    );

    let due_at = h.clock.now() + Duration::minutes(1);
    let outcome = h
        .dispatch
        .submit(request("flaky", NotificationLevel::Info, Some(due_at)))
        .await?;

    h.clock.advance(Duration::minutes(2));
    let summary = h.scheduler.tick().await?;

    assert_eq!(summary.dispatched_requests, 1);
    assert_eq!(summary.processed_attempts, 1);

    let attempts = h.dispatch.get_status(outcome.request_id()).await?;
    assert_eq!(attempts[0].status, AttemptStatus::Pending);
    assert_eq!(attempts[0].attempt_count, 1);
    assert_eq!(
        attempts[0].last_error.as_deref(),
        Some("provider down"),
        "The failure reason is recorded for the retry"
    );

    Ok(())
}

/// Test: A raised alert lands in the operator's inbox on the next tick
#[tokio::test]
async fn test_alert_notifies_operators() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();
    let operator = Uuid::new_v4();

    let registry = Arc::new(ChannelRegistry::new().register(Arc::new(InAppChannel::new(
        store.clone(),
        clock.clone(),
    ))));
    let dispatch = Arc::new(DispatchEngine::new(
        store.clone(),
        registry,
        clock.clone(),
        dispatch_config(),
    ));
    let monitor = Arc::new(Monitor::new(
        store.clone(),
        clock.clone(),
        vec![AlertRule {
            kind: AlertKind::HighFailureRate,
            threshold: 5.0,
            comparison: Comparison::Above,
            severity: AlertSeverity::Warning,
        }],
    ));
    let scheduler = Scheduler::new(
        store.clone(),
        dispatch,
        monitor,
        clock.clone(),
        scheduler_config(10_000, vec![operator]),
    );

    for i in 0..6 {
        let event = WebhookEvent {
            status: WebhookStatus::Failed,
            ..WebhookEvent::pending(
                Gateway::Stripe,
                format!("f_{}", i),
                "payment.succeeded".to_string(),
                json!({}),
                clock.now(),
            )
        };
        store.insert_or_get_event(event).await?;
    }

    // First tick opens the alerts and submits the operator notifications.
    let summary = scheduler.tick().await?;
    assert_eq!(summary.new_alerts, 2, "Global and stripe scopes fire");

    // Second tick delivers them; the still-open alerts produce no new ones.
    clock.advance(Duration::minutes(1));
    let summary = scheduler.tick().await?;
    assert_eq!(summary.new_alerts, 0);
    assert_eq!(summary.processed_attempts, 2);

    let inbox = store.inbox_for_user(operator).await?;
    assert_eq!(inbox.len(), 2);
    assert!(inbox.iter().any(|m| m.title.contains("high_failure_rate")));
    assert!(inbox.iter().all(|m| m.level == NotificationLevel::Critical));
    assert!(
        inbox.iter().all(|m| m.created_at == clock.now()),
        "Inbox timestamps follow the injected clock"
    );

    Ok(())
}

/// Test: Submitting without a schedule dispatches and sends without a tick
#[tokio::test]
async fn test_immediate_request_needs_no_tick() -> Result<()> {
    let h = harness(
        SendOutcome::Success,
        Vec::new(),
        scheduler_config(10_000, Vec::new()),
    );

    let outcome = h
        .dispatch
        .submit(request("now-1", NotificationLevel::Info, None))
        .await?;
    assert!(matches!(outcome, SubmitOutcome::Accepted(_)));

    // Fan-out happened at submit; only the send itself waits for a worker.
    let attempts = h.dispatch.get_status(outcome.request_id()).await?;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Pending);

    h.dispatch.process_due().await?;
    let attempts = h.dispatch.get_status(outcome.request_id()).await?;
    assert_eq!(attempts[0].status, AttemptStatus::Sent);

    Ok(())
}
