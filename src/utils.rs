//! Text helpers and retry plumbing for outgoing requests.

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};
use crate::error::TransportError;
use crate::transport::UserId;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Truncate to at most `max_graphemes` user-perceived characters
///
/// # Examples
///
/// ```
/// use stepwise_bot::utils::truncate_str;
/// assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
/// ```
#[must_use]
pub fn truncate_str(s: &str, max_graphemes: usize) -> String {
    s.graphemes(true).take(max_graphemes).collect()
}

/// Piece of an HTML message: markup, or one visible character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fragment<'a> {
    Tag(&'a str),
    Visible(&'a str),
}

/// Splits Telegram HTML into tags and visible graphemes. Character
/// references such as `&amp;` count as one visible character.
struct Fragments<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Fragments<'a> {
    type Item = Fragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest;
        let len = if rest.starts_with('<') {
            rest.find('>').map(|end| end + 1)
        } else if rest.starts_with('&') {
            rest.char_indices()
                .take(12)
                .skip(1)
                .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '#' || *c == ';')
                .find(|(_, c)| *c == ';')
                .map(|(end, _)| end + 1)
        } else {
            None
        };
        let (fragment, len) = match len {
            Some(len) if rest.starts_with('<') => (Fragment::Tag(rest.get(..len)?), len),
            Some(len) => (Fragment::Visible(rest.get(..len)?), len),
            None => {
                let grapheme = rest.graphemes(true).next()?;
                (Fragment::Visible(grapheme), grapheme.len())
            }
        };
        self.rest = rest.get(len..)?;
        Some(fragment)
    }
}

const fn fragments(text: &str) -> Fragments<'_> {
    Fragments { rest: text }
}

/// Name of the element a tag opens or closes, with whether it closes
fn tag_name(tag: &str) -> (&str, bool) {
    let inner = tag.trim_start_matches('<').trim_end_matches('>').trim();
    let (inner, closing) = inner
        .strip_prefix('/')
        .map_or((inner, false), |name| (name, true));
    let name = inner.split_whitespace().next().unwrap_or_default();
    (name, closing)
}

/// Clamp Telegram HTML to `limit` visible characters, marking the cut.
///
/// Tags and character references are never split, and tags still open at
/// the cut are closed so the result parses.
///
/// # Examples
///
/// ```
/// use stepwise_bot::utils::fit_message;
/// assert_eq!(fit_message("<b>abcdef</b>", 4), "<b>abc…</b>");
/// ```
#[must_use]
pub fn fit_message(text: &str, limit: usize) -> String {
    let visible = fragments(text)
        .filter(|f| matches!(f, Fragment::Visible(_)))
        .count();
    if visible <= limit {
        return text.to_string();
    }

    let budget = limit.saturating_sub(1);
    let mut shown = 0;
    let mut open: Vec<&str> = Vec::new();
    let mut out = String::with_capacity(text.len().min(limit * 4));
    for fragment in fragments(text) {
        match fragment {
            Fragment::Visible(_) if shown == budget => break,
            Fragment::Visible(piece) => {
                shown += 1;
                out.push_str(piece);
            }
            Fragment::Tag(tag) => {
                match tag_name(tag) {
                    (name, true) => {
                        if let Some(pos) = open.iter().rposition(|o| *o == name) {
                            open.truncate(pos);
                        }
                    }
                    (name, false) if !name.is_empty() && !tag.ends_with("/>") => open.push(name),
                    _ => {}
                }
                out.push_str(tag);
            }
        }
    }
    out.push('…');
    for name in open.iter().rev() {
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }
    out
}

/// HTML mention of a user, recorded by Telegram as a text-mention entity
#[must_use]
pub fn mention_html(user_id: UserId, name: &str) -> String {
    format!(
        "<a href=\"tg://user?id={user_id}\">{}</a>",
        html_escape::encode_text(name)
    )
}

/// Remove `@botname` from a command token and from the end of the text
///
/// # Examples
///
/// ```
/// use stepwise_bot::utils::strip_bot_mention;
/// assert_eq!(strip_bot_mention("/ping@my_bot me", Some("my_bot")), "/ping me");
/// assert_eq!(strip_bot_mention("hello @my_bot", Some("my_bot")), "hello");
/// ```
#[must_use]
pub fn strip_bot_mention(text: &str, bot_username: Option<&str>) -> String {
    let Some(username) = bot_username.filter(|u| !u.is_empty()) else {
        return text.trim().to_string();
    };
    let suffix = format!("@{username}");

    let text = text.trim();
    let text = text.strip_suffix(suffix.as_str()).unwrap_or(text).trim_end();

    match text.split_once(' ') {
        Some((head, rest)) => {
            let head = head.strip_suffix(suffix.as_str()).unwrap_or(head);
            format!("{head} {rest}")
        }
        None => text.to_string(),
    }
}

/// Run a Telegram request, retrying transient network failures with
/// exponential backoff and jitter. API errors are returned immediately.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-transient error.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TransportError>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    RetryIf::start(retry_strategy, operation, TransportError::is_transient)
        .await
        .map_err(|e| {
            if e.is_transient() {
                warn!(
                    "Telegram API operation failed after {} retries: {}",
                    TELEGRAM_API_MAX_RETRIES, e
                );
            }
            e
        })
}
