use std::collections::HashMap;
use std::time::Duration as StdDuration;

use anyhow::{Error, Result, anyhow};
use chrono::Duration;
use dotenvy::dotenv;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::{dispatch::DispatchConfig, scheduler::SchedulerConfig};
use crate::models::{
    alert::{AlertKind, AlertRule, AlertSeverity, Comparison},
    channel::ChannelKind,
    retry::RetryConfig,
    webhook::Gateway,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Unset means the in-memory store (single-node / development).
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_attempts")]
    pub max_send_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub retry_backoff_factor: u32,
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_claim_batch_size")]
    pub claim_batch_size: usize,

    #[serde(default = "default_tick_secs")]
    pub scheduler_tick_secs: u64,
    #[serde(default = "default_stats_window_hours")]
    pub stats_window_hours: i64,
    #[serde(default = "default_max_pending_depth")]
    pub max_pending_depth: u64,

    #[serde(default)]
    pub stripe_webhook_secret: String,
    #[serde(default)]
    pub paystack_webhook_secret: String,

    #[serde(default)]
    pub email_provider_url: String,
    #[serde(default)]
    pub sms_provider_url: String,
    #[serde(default)]
    pub push_provider_url: String,

    /// Comma-separated operator user ids for alert notifications.
    #[serde(default)]
    pub operator_recipients: String,

    #[serde(default = "default_success_rate_threshold")]
    pub success_rate_threshold: f64,
    #[serde(default = "default_failure_count_threshold")]
    pub failure_count_threshold: u64,
    #[serde(default = "default_stuck_pending_secs")]
    pub stuck_pending_secs: u64,
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_threshold_ms: u64,
}

fn default_server_port() -> u16 {
    8080
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    30_000
}
fn default_backoff_factor() -> u32 {
    2
}
fn default_max_delay_ms() -> u64 {
    1_800_000
}
fn default_send_timeout_secs() -> u64 {
    10
}
fn default_worker_concurrency() -> usize {
    8
}
fn default_claim_batch_size() -> usize {
    100
}
fn default_tick_secs() -> u64 {
    60
}
fn default_stats_window_hours() -> i64 {
    24
}
fn default_max_pending_depth() -> u64 {
    10_000
}
fn default_success_rate_threshold() -> f64 {
    95.0
}
fn default_failure_count_threshold() -> u64 {
    5
}
fn default_stuck_pending_secs() -> u64 {
    300
}
fn default_liveness_window_secs() -> u64 {
    7_200
}
fn default_latency_threshold_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        // envy deserializes from an empty map into all-default fields.
        envy::from_iter::<_, Self>(std::iter::empty::<(String, String)>())
            .expect("default config is valid")
    }
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|_| anyhow!("Invalid or missing environmental variable"))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_send_attempts,
            base_delay_ms: self.retry_base_delay_ms,
            backoff_factor: self.retry_backoff_factor,
            max_delay_ms: self.retry_max_delay_ms,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            retry: self.retry_config(),
            send_timeout: StdDuration::from_secs(self.send_timeout_secs),
            worker_concurrency: self.worker_concurrency.max(1),
            claim_batch_size: self.claim_batch_size.max(1),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: StdDuration::from_secs(self.scheduler_tick_secs.max(1)),
            stats_window: Duration::hours(self.stats_window_hours.max(1)),
            max_pending_depth: self.max_pending_depth,
            operator_recipients: self.operator_ids(),
            alert_channels: vec![ChannelKind::InApp, ChannelKind::Email],
        }
    }

    pub fn gateway_secrets(&self) -> HashMap<Gateway, String> {
        let mut secrets = HashMap::new();
        if !self.stripe_webhook_secret.is_empty() {
            secrets.insert(Gateway::Stripe, self.stripe_webhook_secret.clone());
        }
        if !self.paystack_webhook_secret.is_empty() {
            secrets.insert(Gateway::Paystack, self.paystack_webhook_secret.clone());
        }
        secrets
    }

    pub fn operator_ids(&self) -> Vec<Uuid> {
        self.operator_recipients
            .split(',')
            .filter_map(|s| Uuid::parse_str(s.trim()).ok())
            .collect()
    }

    pub fn alert_rules(&self) -> Vec<AlertRule> {
        vec![
            AlertRule {
                kind: AlertKind::LowSuccessRate,
                threshold: self.success_rate_threshold,
                comparison: Comparison::Below,
                severity: AlertSeverity::Critical,
            },
            AlertRule {
                kind: AlertKind::HighFailureRate,
                threshold: self.failure_count_threshold as f64,
                comparison: Comparison::Above,
                severity: AlertSeverity::Warning,
            },
            AlertRule {
                kind: AlertKind::StuckPending,
                threshold: self.stuck_pending_secs as f64,
                comparison: Comparison::Above,
                severity: AlertSeverity::Warning,
            },
            AlertRule {
                kind: AlertKind::NoRecentEvents,
                threshold: self.liveness_window_secs as f64,
                comparison: Comparison::Above,
                severity: AlertSeverity::Warning,
            },
            AlertRule {
                kind: AlertKind::HighLatency,
                threshold: self.latency_threshold_ms as f64,
                comparison: Comparison::Above,
                severity: AlertSeverity::Warning,
            },
        ]
    }
}
