use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::request::NotificationLevel;

/// In-app channel sink: a message landing in a user's inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub request_id: Uuid,
    pub title: String,
    pub body: String,
    pub level: NotificationLevel,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
