use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::channel::ChannelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    InFlight,
    Sent,
    Delivered,
    Failed,
    Exhausted,
}

impl AttemptStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Delivered | AttemptStatus::Failed | AttemptStatus::Exhausted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::InFlight => "in_flight",
            AttemptStatus::Sent => "sent",
            AttemptStatus::Delivered => "delivered",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Exhausted => "exhausted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AttemptStatus::Pending),
            "in_flight" => Some(AttemptStatus::InFlight),
            "sent" => Some(AttemptStatus::Sent),
            "delivered" => Some(AttemptStatus::Delivered),
            "failed" => Some(AttemptStatus::Failed),
            "exhausted" => Some(AttemptStatus::Exhausted),
            _ => None,
        }
    }
}

impl Display for AttemptStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

/// One (recipient, channel) leg of a notification request. Owned by the
/// dispatch engine; every mutation goes through its state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub request_id: Uuid,
    pub recipient: Uuid,
    pub channel: ChannelKind,
    pub status: AttemptStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(
        request_id: Uuid,
        recipient: Uuid,
        channel: ChannelKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            recipient,
            channel,
            status: AttemptStatus::Pending,
            attempt_count: 0,
            last_error: None,
            next_retry_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}
