//! Cancellation registry
//!
//! Maps (user, invocation token) to the cancellation token of a running
//! invocation, so a later button press can abort it. Cancellation is
//! cooperative: the running step observes its [`CancellationToken`] at its
//! own suspension points.

use crate::transport::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Callback payload prefix that requests cancellation of an invocation
pub const CANCEL_SIGIL: &str = "!cancel ";

/// Registry key: acting user plus invocation token
pub type CancelKey = (UserId, String);

/// Fresh process-unique invocation token
#[must_use]
pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Extract the invocation token from a cancellation payload
#[must_use]
pub fn parse_cancel(text: &str) -> Option<&str> {
    text.strip_prefix(CANCEL_SIGIL)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Registry of cancellable in-flight invocations
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<CancelKey, CancellationToken>>,
}

impl CancellationRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CancelKey, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the cancellation handle of an invocation
    pub fn register(&self, key: CancelKey, token: CancellationToken) {
        debug!(user_id = key.0, token = %key.1, "Registering cancellation token");
        self.lock().insert(key, token);
    }

    /// Register and return a guard that unregisters on drop, whichever way
    /// the owning task exits
    #[must_use]
    pub fn guard(self: &Arc<Self>, key: CancelKey, token: CancellationToken) -> Registration {
        self.register(key.clone(), token);
        Registration {
            registry: Arc::clone(self),
            key: Some(key),
        }
    }

    /// Signal the invocation to stop. Does not wait for it to notice.
    ///
    /// Returns `true` if cancellation was requested, `false` if the key is unknown
    pub fn cancel(&self, key: &CancelKey) -> bool {
        let token = self.lock().remove(key);
        match token {
            Some(token) => {
                token.cancel();
                info!(user_id = key.0, token = %key.1, "Cancellation requested");
                true
            }
            None => {
                debug!(user_id = key.0, token = %key.1, "No cancellation token found");
                false
            }
        }
    }

    /// Forget an invocation. Returns whether it was still registered.
    pub fn unregister(&self, key: &CancelKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Whether the key is currently registered
    #[must_use]
    pub fn contains(&self, key: &CancelKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of registered invocations
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Scope guard returned by [`CancellationRegistry::guard`]
pub struct Registration {
    registry: Arc<CancellationRegistry>,
    key: Option<CancelKey>,
}

impl Registration {
    /// Key this guard owns
    #[must_use]
    pub fn key(&self) -> Option<&CancelKey> {
        self.key.as_ref()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.registry.unregister(&key);
        }
    }
}
