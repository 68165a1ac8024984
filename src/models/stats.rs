use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::webhook::Gateway;

/// Rolling-window webhook delivery statistics for one scope
/// (`gateway: None` is the global aggregate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStats {
    pub gateway: Option<Gateway>,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub pending: u64,
    pub success_rate: f64,
    pub failures_last_hour: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_secs: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_received_secs_ago: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub window_hours: i64,
    pub computed_at: DateTime<Utc>,
    pub global: GatewayStats,
    pub gateways: Vec<GatewayStats>,
}
