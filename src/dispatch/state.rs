//! Conversation state store
//!
//! At most one active continuation per user. Read by the dispatcher on every
//! inbound event; written only by the renderer once an invocation completes.

use super::types::{Continuation, StateChange, Trigger};
use crate::transport::UserId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// User id → continuation handling that user's next input
#[derive(Default)]
pub struct ConversationStore {
    states: Mutex<HashMap<UserId, Continuation>>,
}

impl ConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Continuation>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Active continuation for a user
    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<Continuation> {
        self.lock().get(&user_id).cloned()
    }

    /// Install a continuation, replacing any previous one
    pub fn set(&self, user_id: UserId, continuation: Continuation) {
        debug!(user_id, "Conversation state installed");
        self.lock().insert(user_id, continuation);
    }

    /// Drop the user's conversation
    pub fn clear(&self, user_id: UserId) {
        if self.lock().remove(&user_id).is_some() {
            debug!(user_id, "Conversation state cleared");
        }
    }

    /// Apply the final state instruction of a completed invocation.
    ///
    /// Typed messages always reset the conversation unless the handler asked
    /// to continue; button presses only install, or clear when told to.
    pub fn apply(&self, user_id: UserId, trigger: Trigger, change: StateChange) {
        match (change, trigger) {
            (StateChange::Continue(next), _) => self.set(user_id, next),
            (StateChange::Clear, _) | (StateChange::Unchanged, Trigger::Message) => {
                self.clear(user_id);
            }
            (StateChange::Unchanged, Trigger::Callback) => {}
        }
    }

    /// Number of users mid-conversation
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no conversation is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> Continuation {
        Continuation::from_fn(|_, _| async {})
    }

    #[test]
    fn message_without_next_clears() {
        let store = ConversationStore::new();
        store.set(1, step());
        store.apply(1, Trigger::Message, StateChange::Unchanged);
        assert!(store.get(1).is_none());
    }

    #[test]
    fn callback_without_next_retains() {
        let store = ConversationStore::new();
        let current = step();
        store.set(1, current.clone());
        store.apply(1, Trigger::Callback, StateChange::Unchanged);
        assert!(store.get(1).is_some_and(|c| c.same_as(&current)));
    }

    #[test]
    fn callback_explicit_clear() {
        let store = ConversationStore::new();
        store.set(1, step());
        store.apply(1, Trigger::Callback, StateChange::Clear);
        assert!(store.is_empty());
    }

    #[test]
    fn next_replaces_existing() {
        let store = ConversationStore::new();
        let next = step();
        store.set(1, step());
        store.apply(1, Trigger::Message, StateChange::Continue(next.clone()));
        assert!(store.get(1).is_some_and(|c| c.same_as(&next)));
        assert_eq!(store.len(), 1);
    }
}
