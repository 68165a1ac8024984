use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::channel::ChannelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Critical,
}

impl Display for NotificationLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            NotificationLevel::Info => write!(f, "info"),
            NotificationLevel::Warning => write!(f, "warning"),
            NotificationLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Producer-facing request body. Validated and frozen into a
/// `NotificationRequest` by the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotificationRequest {
    pub idempotency_key: String,
    pub title: String,
    pub body: String,
    pub level: NotificationLevel,
    pub recipients: Vec<Uuid>,
    pub channels: Vec<ChannelKind>,

    #[serde(default)]
    pub schedule_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub template_code: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub id: Uuid,
    pub idempotency_key: String,
    pub title: String,
    pub body: String,
    pub level: NotificationLevel,
    pub recipients: Vec<Uuid>,
    pub channels: Vec<ChannelKind>,
    pub schedule_at: Option<DateTime<Utc>>,
    pub template_code: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub dispatched: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRequest {
    pub fn from_new(new: NewNotificationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key: new.idempotency_key,
            title: new.title,
            body: new.body,
            level: new.level,
            recipients: new.recipients,
            channels: new.channels,
            schedule_at: new.schedule_at,
            template_code: new.template_code,
            metadata: new.metadata,
            dispatched: false,
            created_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule_at.is_none_or(|at| at <= now)
    }
}

/// Outcome of `submit`: a duplicate idempotency key is a soft hit that hands
/// back the previously assigned request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(Uuid),
    Duplicate(Uuid),
}

impl SubmitOutcome {
    pub fn request_id(&self) -> Uuid {
        match self {
            SubmitOutcome::Accepted(id) | SubmitOutcome::Duplicate(id) => *id,
        }
    }
}
