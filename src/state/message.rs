use super::AppState;
use crate::types::{validate_message_text, MessageId, MessageRecord};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Process-wide chat message id source.
///
/// Ids start at 1, strictly increase, and are never handed out twice. Once
/// `i64::MAX` has been issued the counter refuses to go further.
#[derive(Debug, Clone, Default)]
pub struct MessageCounter {
    last: Arc<AtomicI64>,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose next id will be `last + 1`
    pub fn starting_after(last: MessageId) -> Self {
        Self {
            last: Arc::new(AtomicI64::new(last)),
        }
    }

    /// Claim the next id, or `None` if the id space is used up
    pub fn next_id(&self) -> Option<MessageId> {
        self.last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1))
            .ok()
            .map(|previous| previous + 1)
    }

    /// Most recently issued id (0 before the first message)
    pub fn last_id(&self) -> MessageId {
        self.last.load(Ordering::SeqCst)
    }
}

impl AppState {
    /// Validate a chat message and assign it the next global id
    pub fn next_message(&self, sender: &str, text: String) -> Result<MessageRecord, String> {
        validate_message_text(&text, self.config.max_message_len)?;

        let id = self
            .messages
            .next_id()
            .ok_or_else(|| "Message id space exhausted".to_string())?;

        Ok(MessageRecord {
            id,
            sender: sender.to_string(),
            text,
        })
    }

    /// Id of the most recent accepted message
    pub fn last_message_id(&self) -> MessageId {
        self.messages.last_id()
    }
}
