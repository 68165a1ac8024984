use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use notify_engine::{
    clock::{Clock, ManualClock},
    engine::monitor::Monitor,
    models::{
        alert::{AlertKind, AlertRule, AlertSeverity, Comparison},
        webhook::{Gateway, WebhookEvent, WebhookStatus},
    },
    store::{Store, memory::MemoryStore},
};
use serde_json::json;

fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
    ))
}

fn all_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            kind: AlertKind::LowSuccessRate,
            threshold: 95.0,
            comparison: Comparison::Below,
            severity: AlertSeverity::Critical,
        },
        AlertRule {
            kind: AlertKind::HighFailureRate,
            threshold: 5.0,
            comparison: Comparison::Above,
            severity: AlertSeverity::Warning,
        },
        AlertRule {
            kind: AlertKind::StuckPending,
            threshold: 300.0,
            comparison: Comparison::Above,
            severity: AlertSeverity::Warning,
        },
        AlertRule {
            kind: AlertKind::NoRecentEvents,
            threshold: 7_200.0,
            comparison: Comparison::Above,
            severity: AlertSeverity::Warning,
        },
        AlertRule {
            kind: AlertKind::HighLatency,
            threshold: 10_000.0,
            comparison: Comparison::Above,
            severity: AlertSeverity::Warning,
        },
    ]
}

fn rule(kind: AlertKind) -> Vec<AlertRule> {
    all_rules().into_iter().filter(|r| r.kind == kind).collect()
}

/// Seeds one webhook event row with the given status, received `age` before
/// the clock's current time, optionally processed `latency` after receipt.
async fn seed_event(
    store: &MemoryStore,
    clock: &ManualClock,
    gateway: Gateway,
    external_id: &str,
    status: WebhookStatus,
    age: Duration,
    latency: Option<Duration>,
) -> Result<()> {
    let received_at = clock.now() - age;
    let mut event = WebhookEvent::pending(
        gateway,
        external_id.to_string(),
        "payment.succeeded".to_string(),
        json!({"id": external_id}),
        received_at,
    );
    event.status = status;
    if status != WebhookStatus::Pending {
        event.processed_at = Some(received_at + latency.unwrap_or_else(|| Duration::seconds(1)));
    }

    let (_, inserted) = store.insert_or_get_event(event).await?;
    assert!(inserted, "Seed ids must be unique");

    Ok(())
}

/// Test: An empty window reports a vacuous 100% success rate
#[tokio::test]
async fn test_empty_window_is_healthy() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();
    let monitor = Monitor::new(store, clock, all_rules());

    let report = monitor.compute_stats(Duration::hours(24)).await?;

    assert_eq!(report.global.total, 0);
    assert_eq!(report.global.success_rate, 100.0);
    for stats in &report.gateways {
        assert_eq!(stats.success_rate, 100.0);
    }

    let candidates = Monitor::evaluate(&report, &all_rules());
    assert!(candidates.is_empty(), "Nothing should fire on an empty window");

    Ok(())
}

/// Test: Per-gateway stats are split out from the global aggregate
#[tokio::test]
async fn test_stats_split_by_gateway() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();

    for i in 0..3 {
        seed_event(
            &store,
            &clock,
            Gateway::Stripe,
            &format!("st_{}", i),
            WebhookStatus::Processed,
            Duration::minutes(10),
            None,
        )
        .await?;
    }
    seed_event(
        &store,
        &clock,
        Gateway::Paystack,
        "ps_0",
        WebhookStatus::Failed,
        Duration::minutes(10),
        None,
    )
    .await?;

    let monitor = Monitor::new(store, clock, all_rules());
    let report = monitor.compute_stats(Duration::hours(24)).await?;

    assert_eq!(report.global.total, 4);
    assert_eq!(report.global.processed, 3);
    assert_eq!(report.global.failed, 1);
    assert_eq!(report.global.success_rate, 75.0);

    let stripe = report
        .gateways
        .iter()
        .find(|s| s.gateway == Some(Gateway::Stripe))
        .unwrap();
    assert_eq!(stripe.total, 3);
    assert_eq!(stripe.success_rate, 100.0);

    let paystack = report
        .gateways
        .iter()
        .find(|s| s.gateway == Some(Gateway::Paystack))
        .unwrap();
    assert_eq!(paystack.total, 1);
    assert_eq!(paystack.success_rate, 0.0);

    Ok(())
}

/// Test: A low success rate fires for the affected scopes only
#[tokio::test]
async fn test_low_success_rate_fires() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();

    seed_event(
        &store,
        &clock,
        Gateway::Stripe,
        "st_ok",
        WebhookStatus::Processed,
        Duration::minutes(5),
        None,
    )
    .await?;
    seed_event(
        &store,
        &clock,
        Gateway::Stripe,
        "st_bad",
        WebhookStatus::Failed,
        Duration::minutes(5),
        None,
    )
    .await?;

    let monitor = Monitor::new(store, clock, all_rules());
    let report = monitor.compute_stats(Duration::hours(24)).await?;

    let candidates = Monitor::evaluate(&report, &rule(AlertKind::LowSuccessRate));

    // Global (50%) and stripe (50%) fire; paystack has no terminal outcomes.
    assert_eq!(candidates.len(), 2);
    assert!(candidates.iter().any(|c| c.gateway.is_none()));
    assert!(candidates.iter().any(|c| c.gateway == Some(Gateway::Stripe)));
    assert_eq!(candidates[0].severity, AlertSeverity::Critical);

    Ok(())
}

/// Test: The failure spike rule only counts the last hour
#[tokio::test]
async fn test_failure_spike_counts_last_hour_only() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();

    // Six failures, but only three of them within the last hour.
    for i in 0..3 {
        seed_event(
            &store,
            &clock,
            Gateway::Stripe,
            &format!("old_{}", i),
            WebhookStatus::Failed,
            Duration::minutes(90),
            None,
        )
        .await?;
    }
    for i in 0..3 {
        seed_event(
            &store,
            &clock,
            Gateway::Stripe,
            &format!("new_{}", i),
            WebhookStatus::Failed,
            Duration::minutes(10),
            None,
        )
        .await?;
    }

    let monitor = Monitor::new(store.clone(), clock.clone(), all_rules());
    let report = monitor.compute_stats(Duration::hours(24)).await?;
    let candidates = Monitor::evaluate(&report, &rule(AlertKind::HighFailureRate));
    assert!(candidates.is_empty(), "Three recent failures stay below five");

    // Three more recent failures push the hourly count past the threshold.
    for i in 0..3 {
        seed_event(
            &store,
            &clock,
            Gateway::Stripe,
            &format!("spike_{}", i),
            WebhookStatus::Failed,
            Duration::minutes(5),
            None,
        )
        .await?;
    }

    let report = monitor.compute_stats(Duration::hours(24)).await?;
    let candidates = Monitor::evaluate(&report, &rule(AlertKind::HighFailureRate));

    assert_eq!(candidates.len(), 2, "Global and stripe scopes fire");
    assert!(candidates.iter().any(|c| c.gateway == Some(Gateway::Stripe)));
    assert!(
        !candidates.iter().any(|c| c.gateway == Some(Gateway::Paystack)),
        "A quiet gateway must not fire"
    );

    Ok(())
}

/// Test: An event pending past the threshold fires the stuck-pending rule
#[tokio::test]
async fn test_stuck_pending_fires() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();

    seed_event(
        &store,
        &clock,
        Gateway::Paystack,
        "ps_stuck",
        WebhookStatus::Pending,
        Duration::minutes(10),
        None,
    )
    .await?;

    let monitor = Monitor::new(store, clock, all_rules());
    let report = monitor.compute_stats(Duration::hours(24)).await?;

    let candidates = Monitor::evaluate(&report, &rule(AlertKind::StuckPending));
    assert_eq!(candidates.len(), 2);
    assert!(candidates.iter().any(|c| c.gateway == Some(Gateway::Paystack)));

    Ok(())
}

/// Test: Prolonged silence fires only for scopes that ever had traffic
#[tokio::test]
async fn test_liveness_ignores_scopes_without_traffic() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();

    seed_event(
        &store,
        &clock,
        Gateway::Stripe,
        "st_old",
        WebhookStatus::Processed,
        Duration::hours(3),
        None,
    )
    .await?;

    let monitor = Monitor::new(store, clock, all_rules());
    let report = monitor.compute_stats(Duration::hours(24)).await?;

    let candidates = Monitor::evaluate(&report, &rule(AlertKind::NoRecentEvents));

    assert_eq!(candidates.len(), 2, "Global and stripe have gone quiet");
    assert!(
        !candidates.iter().any(|c| c.gateway == Some(Gateway::Paystack)),
        "A gateway with no traffic ever has nothing overdue"
    );

    Ok(())
}

/// Test: Slow processing fires the latency rule
#[tokio::test]
async fn test_high_latency_fires() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();

    seed_event(
        &store,
        &clock,
        Gateway::Stripe,
        "st_slow",
        WebhookStatus::Processed,
        Duration::minutes(5),
        Some(Duration::seconds(15)),
    )
    .await?;

    let monitor = Monitor::new(store, clock, all_rules());
    let report = monitor.compute_stats(Duration::hours(24)).await?;

    let stripe = report
        .gateways
        .iter()
        .find(|s| s.gateway == Some(Gateway::Stripe))
        .unwrap();
    assert_eq!(stripe.avg_latency_ms, Some(15_000.0));

    let candidates = Monitor::evaluate(&report, &rule(AlertKind::HighLatency));
    assert!(candidates.iter().any(|c| c.gateway == Some(Gateway::Stripe)));

    Ok(())
}

/// Test: A sweep opens an alert once and refreshes it on later passes
#[tokio::test]
async fn test_sweep_dedups_open_alerts() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();

    for i in 0..6 {
        seed_event(
            &store,
            &clock,
            Gateway::Stripe,
            &format!("f_{}", i),
            WebhookStatus::Failed,
            Duration::minutes(10),
            None,
        )
        .await?;
    }

    let monitor = Monitor::new(
        store.clone(),
        clock.clone(),
        rule(AlertKind::HighFailureRate),
    );

    let first = monitor.sweep(Duration::hours(24)).await?;
    assert_eq!(first.len(), 2, "Global and stripe alerts open");

    clock.advance(Duration::minutes(1));
    let second = monitor.sweep(Duration::hours(24)).await?;
    assert!(second.is_empty(), "Still-firing alerts are refreshed, not reopened");

    let open = store.open_alerts().await?;
    assert_eq!(open.len(), 2);
    assert_eq!(
        open[0].triggered_at,
        clock.now(),
        "Refresh updates triggered_at"
    );

    Ok(())
}

/// Test: An alert resolves once its condition clears
#[tokio::test]
async fn test_sweep_resolves_recovered_alerts() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = test_clock();

    for i in 0..6 {
        seed_event(
            &store,
            &clock,
            Gateway::Stripe,
            &format!("f_{}", i),
            WebhookStatus::Failed,
            Duration::minutes(10),
            None,
        )
        .await?;
    }

    let monitor = Monitor::new(
        store.clone(),
        clock.clone(),
        rule(AlertKind::HighFailureRate),
    );

    let opened = monitor.sweep(Duration::hours(24)).await?;
    assert_eq!(opened.len(), 2);

    // Ninety minutes later the failures have left the hourly window.
    clock.advance(Duration::minutes(90));
    let reopened = monitor.sweep(Duration::hours(24)).await?;
    assert!(reopened.is_empty());

    let open = store.open_alerts().await?;
    assert!(open.is_empty(), "Recovered alerts must be resolved");

    Ok(())
}
