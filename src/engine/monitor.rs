use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::models::{
    alert::{Alert, AlertCandidate, AlertKind, AlertRule},
    stats::{GatewayStats, StatsReport},
    webhook::{Gateway, WebhookEvent, WebhookStatus},
};
use crate::store::Store;

/// Read-only aggregation over webhook outcomes plus threshold evaluation.
/// `evaluate` is pure so rule logic is testable without a clock or store;
/// `sweep` is the side-effecting half that persists/resolves alerts.
pub struct Monitor {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    rules: Vec<AlertRule>,
}

impl Monitor {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, rules: Vec<AlertRule>) -> Self {
        Self {
            store,
            clock,
            rules,
        }
    }

    pub async fn compute_stats(&self, window: Duration) -> Result<StatsReport, EngineError> {
        let now = self.clock.now();
        let events = self.store.events_since(now - window).await?;

        let global_last = self.store.last_event_received_at(None).await?;
        let global = build_stats(None, &events, global_last, now);

        let mut gateways = Vec::with_capacity(Gateway::ALL.len());
        for gateway in Gateway::ALL {
            let scoped: Vec<WebhookEvent> = events
                .iter()
                .filter(|e| e.gateway == gateway)
                .cloned()
                .collect();
            let last = self.store.last_event_received_at(Some(gateway)).await?;
            gateways.push(build_stats(Some(gateway), &scoped, last, now));
        }

        Ok(StatsReport {
            window_hours: window.num_hours(),
            computed_at: now,
            global,
            gateways,
        })
    }

    /// Pure rule evaluation: no clock reads, no store writes. Every rule is
    /// checked independently and every firing is reported.
    pub fn evaluate(report: &StatsReport, rules: &[AlertRule]) -> Vec<AlertCandidate> {
        let mut candidates = Vec::new();

        let mut scopes: Vec<&GatewayStats> = vec![&report.global];
        scopes.extend(report.gateways.iter());

        for stats in scopes {
            for rule in rules {
                if let Some(candidate) = evaluate_rule(rule, stats) {
                    candidates.push(candidate);
                }
            }
        }

        candidates
    }

    /// One monitoring pass: compute stats, evaluate rules, open/refresh
    /// alerts for firings and resolve open alerts whose condition cleared.
    /// Returns the alerts newly opened by this pass.
    pub async fn sweep(&self, window: Duration) -> Result<Vec<Alert>, EngineError> {
        let report = self.compute_stats(window).await?;
        let candidates = Self::evaluate(&report, &self.rules);
        let now = self.clock.now();

        let mut new_alerts = Vec::new();

        for candidate in &candidates {
            let (alert, opened) = self.store.upsert_open_alert(candidate, now).await?;
            if opened {
                info!(
                    kind = %alert.kind,
                    gateway = ?alert.gateway.map(|g| g.to_string()),
                    message = %alert.message,
                    "Alert opened"
                );
                new_alerts.push(alert);
            } else {
                debug!(kind = %alert.kind, "Open alert refreshed");
            }
        }

        // Anything open that did not fire this pass has recovered.
        let fired: Vec<(AlertKind, Option<Gateway>)> = candidates
            .iter()
            .map(|c| (c.kind, c.gateway))
            .collect();

        for alert in self.store.open_alerts().await? {
            if !fired.contains(&(alert.kind, alert.gateway)) {
                self.store
                    .resolve_alert(alert.kind, alert.gateway, now)
                    .await?;
                info!(
                    kind = %alert.kind,
                    gateway = ?alert.gateway.map(|g| g.to_string()),
                    "Alert resolved"
                );
            }
        }

        Ok(new_alerts)
    }
}

fn build_stats(
    gateway: Option<Gateway>,
    events: &[WebhookEvent],
    last_received: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> GatewayStats {
    let total = events.len() as u64;
    let processed = events
        .iter()
        .filter(|e| e.status == WebhookStatus::Processed)
        .count() as u64;
    let failed = events
        .iter()
        .filter(|e| e.status == WebhookStatus::Failed)
        .count() as u64;
    let pending = events
        .iter()
        .filter(|e| e.status == WebhookStatus::Pending)
        .count() as u64;

    // Rate over terminal outcomes only; an empty window is vacuously healthy.
    let terminal = processed + failed;
    let success_rate = if terminal == 0 {
        100.0
    } else {
        (processed as f64 / terminal as f64) * 100.0
    };

    let hour_ago = now - Duration::hours(1);
    let failures_last_hour = events
        .iter()
        .filter(|e| e.status == WebhookStatus::Failed && e.received_at >= hour_ago)
        .count() as u64;

    let latencies: Vec<i64> = events
        .iter()
        .filter_map(|e| {
            e.processed_at
                .map(|done| (done - e.received_at).num_milliseconds())
        })
        .collect();
    let avg_latency_ms = if latencies.is_empty() {
        None
    } else {
        Some(latencies.iter().sum::<i64>() as f64 / latencies.len() as f64)
    };

    let oldest_pending_secs = events
        .iter()
        .filter(|e| e.status == WebhookStatus::Pending)
        .map(|e| (now - e.received_at).num_seconds())
        .max();

    let last_received_secs_ago = last_received.map(|at| (now - at).num_seconds());

    GatewayStats {
        gateway,
        total,
        processed,
        failed,
        pending,
        success_rate,
        failures_last_hour,
        avg_latency_ms,
        oldest_pending_secs,
        last_received_secs_ago,
    }
}

fn evaluate_rule(rule: &AlertRule, stats: &GatewayStats) -> Option<AlertCandidate> {
    let scope = stats
        .gateway
        .map(|g| g.to_string())
        .unwrap_or_else(|| "all gateways".to_string());

    let (value, message) = match rule.kind {
        AlertKind::LowSuccessRate => {
            // A window with no terminal outcomes cannot fail this rule.
            if stats.processed + stats.failed == 0 {
                return None;
            }
            (
                stats.success_rate,
                format!(
                    "Success rate {:.1}% below {:.1}% for {}",
                    stats.success_rate, rule.threshold, scope
                ),
            )
        }
        AlertKind::HighFailureRate => (
            stats.failures_last_hour as f64,
            format!(
                "{} failures in the last hour for {} (threshold {})",
                stats.failures_last_hour, scope, rule.threshold
            ),
        ),
        AlertKind::StuckPending => {
            let oldest = stats.oldest_pending_secs? as f64;
            (
                oldest,
                format!(
                    "Event pending for {}s for {} (threshold {}s)",
                    oldest as i64, scope, rule.threshold
                ),
            )
        }
        AlertKind::NoRecentEvents => {
            // No traffic ever recorded means nothing is expected yet.
            let silence = stats.last_received_secs_ago? as f64;
            (
                silence,
                format!(
                    "No events received for {}s from {} (threshold {}s)",
                    silence as i64, scope, rule.threshold
                ),
            )
        }
        AlertKind::HighLatency => {
            let latency = stats.avg_latency_ms?;
            (
                latency,
                format!(
                    "Average processing latency {:.0}ms for {} (threshold {}ms)",
                    latency, scope, rule.threshold
                ),
            )
        }
    };

    if !rule.comparison.triggered(value, rule.threshold) {
        return None;
    }

    Some(AlertCandidate {
        kind: rule.kind,
        gateway: stats.gateway,
        severity: rule.severity,
        message,
        payload: json!({
            "value": value,
            "threshold": rule.threshold,
            "total": stats.total,
            "processed": stats.processed,
            "failed": stats.failed,
            "pending": stats.pending,
        }),
    })
}
