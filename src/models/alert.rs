use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::webhook::Gateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowSuccessRate,
    HighFailureRate,
    StuckPending,
    NoRecentEvents,
    HighLatency,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LowSuccessRate => "low_success_rate",
            AlertKind::HighFailureRate => "high_failure_rate",
            AlertKind::StuckPending => "stuck_pending",
            AlertKind::NoRecentEvents => "no_recent_events",
            AlertKind::HighLatency => "high_latency",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low_success_rate" => Some(AlertKind::LowSuccessRate),
            "high_failure_rate" => Some(AlertKind::HighFailureRate),
            "stuck_pending" => Some(AlertKind::StuckPending),
            "no_recent_events" => Some(AlertKind::NoRecentEvents),
            "high_latency" => Some(AlertKind::HighLatency),
            _ => None,
        }
    }
}

impl Display for AlertKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Below,
    Above,
}

impl Comparison {
    pub fn triggered(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Below => value < threshold,
            Comparison::Above => value > threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// Threshold rule evaluated against rolling-window stats. Evaluation is pure;
/// raising/persisting alerts happens separately in the monitoring sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub kind: AlertKind,
    pub threshold: f64,
    pub comparison: Comparison,
    pub severity: AlertSeverity,
}

/// A rule firing for a particular scope, before persistence/dedup.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub kind: AlertKind,
    pub gateway: Option<Gateway>,
    pub severity: AlertSeverity,
    pub message: String,
    pub payload: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub gateway: Option<Gateway>,
    pub severity: AlertSeverity,
    pub message: String,
    pub payload: JsonValue,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}
