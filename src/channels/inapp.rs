use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::channels::{ChannelPlugin, OutboundMessage, SendOutcome};
use crate::clock::Clock;
use crate::models::{channel::ChannelKind, inbox::InboxMessage};
use crate::store::Store;

/// In-app delivery writes straight to the recipient's inbox; there is no
/// external provider involved, so a store failure is the only retryable case.
pub struct InAppChannel {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl InAppChannel {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl ChannelPlugin for InAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let inbox_message = InboxMessage {
            id: Uuid::new_v4(),
            user_id: message.recipient,
            request_id: message.request_id,
            title: message.title.clone(),
            body: message.body.clone(),
            level: message.level,
            read: false,
            created_at: self.clock.now(),
        };

        match self.store.insert_inbox_message(inbox_message).await {
            Ok(()) => {
                debug!(
                    request_id = %message.request_id,
                    recipient = %message.recipient,
                    "In-app message stored"
                );
                SendOutcome::Success
            }
            Err(e) => SendOutcome::Retryable(format!("inbox write failed: {}", e)),
        }
    }
}
