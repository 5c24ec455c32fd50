//! Chats the bot can no longer post into.
//!
//! Marked on "bot left/kicked" membership updates and on 403 responses,
//! cleared when the bot is added back. Entries expire so a long-running bot
//! does not accumulate dead chats forever.

use crate::transport::ChatId;
use moka::future::Cache;
use std::time::Duration;
use tracing::info;

/// Default lifetime of an "unreachable" mark
pub const UNREACHABLE_TTL_SECS: u64 = 24 * 60 * 60;
/// Upper bound on tracked chats
pub const UNREACHABLE_MAX_CHATS: u64 = 10_000;

/// Set of chats the bot was removed from
#[derive(Clone)]
pub struct ChatReachability {
    unreachable: Cache<ChatId, ()>,
}

impl Default for ChatReachability {
    fn default() -> Self {
        Self::new(UNREACHABLE_TTL_SECS, UNREACHABLE_MAX_CHATS)
    }
}

impl ChatReachability {
    /// Create a tracker with the given entry lifetime and capacity
    #[must_use]
    pub fn new(ttl_secs: u64, max_capacity: u64) -> Self {
        let unreachable = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { unreachable }
    }

    /// Remember that the bot was removed from `chat_id`
    pub async fn mark_unreachable(&self, chat_id: ChatId) {
        info!(chat_id, "Chat became unreachable");
        self.unreachable.insert(chat_id, ()).await;
    }

    /// The bot is present in `chat_id` again
    pub async fn mark_reachable(&self, chat_id: ChatId) {
        self.unreachable.invalidate(&chat_id).await;
    }

    /// Whether the bot may still post into `chat_id`
    #[must_use]
    pub fn is_reachable(&self, chat_id: ChatId) -> bool {
        !self.unreachable.contains_key(&chat_id)
    }
}
