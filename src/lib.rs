//! Conversational command dispatcher for Telegram bots.
//!
//! Inbound updates are routed to a registered command handler, to the
//! user's active multi-step conversation, or to the cancellation of a running
//! invocation. Each invocation runs concurrently and streams [`dispatch::Reply`]
//! values that the renderer turns into sent, edited or uploaded messages.

/// Settings loading and validation
pub mod config;
/// Routing, execution and rendering core
pub mod dispatch;
/// Error types
pub mod error;
/// Built-in handlers
pub mod handlers;
/// Redacting log output
pub mod logging;
/// Chat platform boundary
pub mod transport;
/// Text and retry helpers
pub mod utils;
