//! Outgoing requests with automatic retry.
//!
//! Wraps [`Transport`] calls in [`retry_telegram_operation`] so transient
//! network failures are retried with exponential backoff and jitter, and
//! clamps text to the platform limit before it leaves the process.

use super::{ChatId, MessageId, SentMessage, Transport};
use crate::config::TELEGRAM_MESSAGE_LIMIT;
use crate::dispatch::{InlineKeyboard, Media, Markup};
use crate::error::TransportError;
use crate::utils::{fit_message, retry_telegram_operation};
use tracing::debug;

/// Send a message, retrying network failures.
///
/// # Errors
///
/// Returns the platform error, or the last network error once retries are exhausted.
pub async fn send_message_resilient(
    transport: &dyn Transport,
    chat_id: ChatId,
    text: &str,
    markup: Option<Markup>,
) -> Result<SentMessage, TransportError> {
    let text = fit_message(text, TELEGRAM_MESSAGE_LIMIT);
    retry_telegram_operation(|| transport.send_message(chat_id, &text, markup.clone())).await
}

/// Edit a message in place, retrying network failures.
///
/// # Errors
///
/// Returns the platform error, or the last network error once retries are exhausted.
pub async fn edit_message_resilient(
    transport: &dyn Transport,
    chat_id: ChatId,
    message_id: MessageId,
    text: &str,
    keyboard: Option<InlineKeyboard>,
) -> Result<SentMessage, TransportError> {
    let text = fit_message(text, TELEGRAM_MESSAGE_LIMIT);
    retry_telegram_operation(|| {
        transport.edit_message_text(chat_id, message_id, &text, keyboard.clone())
    })
    .await
}

/// Edit a message, treating "message is not modified" as success.
///
/// Returns `Ok(true)` when the message changed and `Ok(false)` when the
/// platform reported nothing to change.
///
/// # Errors
///
/// Any other platform or network failure.
pub async fn edit_message_safe_resilient(
    transport: &dyn Transport,
    chat_id: ChatId,
    message_id: MessageId,
    text: &str,
    keyboard: Option<InlineKeyboard>,
) -> Result<bool, TransportError> {
    match edit_message_resilient(transport, chat_id, message_id, text, keyboard).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_modified() => {
            debug!(chat_id, message_id, "Message update skipped: {e}");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Upload an ordered media group, retrying network failures.
///
/// # Errors
///
/// Returns the platform error, or the last network error once retries are exhausted.
pub async fn send_media_group_resilient(
    transport: &dyn Transport,
    chat_id: ChatId,
    media: Vec<(String, Media)>,
) -> Result<Vec<SentMessage>, TransportError> {
    retry_telegram_operation(|| transport.send_media_group(chat_id, media.clone())).await
}
