//! Chat transport boundary
//!
//! The dispatcher never talks to the chat platform directly. Everything it
//! consumes or produces goes through [`Transport`], which keeps the core
//! testable with a fake and lets the production build use Telegram.

use crate::dispatch::{InlineKeyboard, Media, Markup};
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;

/// Resilient wrappers for outgoing Telegram requests
pub mod resilient;
/// Telegram (teloxide) implementation of the transport
pub mod telegram;

pub use telegram::TelegramTransport;

/// Platform user identifier
pub type UserId = i64;
/// Platform chat identifier
pub type ChatId = i64;
/// Platform message identifier (unique within a chat)
pub type MessageId = i32;

/// A chat participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Platform user id
    pub id: UserId,
    /// First name shown in mentions
    pub first_name: String,
    /// Optional `@username`
    pub username: Option<String>,
}

impl User {
    /// Human-readable name used when addressing the user
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.first_name.is_empty() {
            self.username.as_deref().unwrap_or("user")
        } else {
            &self.first_name
        }
    }
}

/// A conversation the bot participates in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    /// Platform chat id
    pub id: ChatId,
    /// Whether this is a one-to-one chat with the bot
    pub is_private: bool,
}

/// Voice or audio file attached to an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Opaque platform file id, resolved to a URL via [`Transport::get_file_url`]
    pub file_id: String,
    /// Original file name, when the platform knows it
    pub file_name: Option<String>,
}

/// An inbound (or echoed) chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message id within the chat
    pub id: MessageId,
    /// Chat the message belongs to
    pub chat: Chat,
    /// Sender, absent for channel posts
    pub from: Option<User>,
    /// Text or caption
    pub text: String,
    /// Text or caption rendered back to Telegram HTML, formatting included
    pub html: String,
    /// User referenced by the first text mention entity on the message
    pub mention_owner: Option<UserId>,
    /// Voice/audio attachment
    pub attachment: Option<Attachment>,
    /// User id carried by a "user shared" service payload
    pub shared_user: Option<UserId>,
    /// Whether the message carries an inline keyboard
    pub has_inline_keyboard: bool,
}

impl Message {
    /// Minimal text message, mostly useful for tests and fakes
    #[must_use]
    pub fn text(id: MessageId, chat: Chat, from: User, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id,
            chat,
            from: Some(from),
            html: html_escape::encode_text(&text).into_owned(),
            text,
            mention_owner: None,
            attachment: None,
            shared_user: None,
            has_inline_keyboard: false,
        }
    }
}

/// A button press on an inline keyboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    /// Query id, must be answered to stop the client spinner
    pub id: String,
    /// User who pressed the button
    pub from: User,
    /// Message the keyboard was attached to
    pub message: Option<Message>,
    /// Button payload
    pub data: String,
}

/// One inbound event from the long poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Monotonic update id, used to advance the poll offset
    pub id: i64,
    /// Event body
    pub kind: UpdateKind,
}

/// Event body of an [`Update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// New message
    Message(Message),
    /// Inline keyboard button press
    Callback(CallbackQuery),
    /// The bot's own membership in a chat changed
    Membership {
        /// Affected chat
        chat_id: ChatId,
        /// Whether the bot can still post there
        present: bool,
    },
    /// Anything the dispatcher does not care about
    Other,
}

/// Update types requested from the long poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    /// Messages
    Message,
    /// Callback queries
    CallbackQuery,
    /// Bot membership changes
    MyChatMember,
}

/// What the platform returned for a sent or edited message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Chat the message lives in
    pub chat_id: ChatId,
    /// Id of the message
    pub message_id: MessageId,
}

/// Command metadata published to the platform's command menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    /// Command without the leading slash
    pub command: String,
    /// Human-readable description
    pub description: String,
}

/// Operations the dispatcher consumes from the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Long-poll for updates after `offset`
    async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
        allowed: &[UpdateType],
    ) -> Result<Vec<Update>, TransportError>;

    /// Send a new text message (HTML parse mode)
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        markup: Option<Markup>,
    ) -> Result<SentMessage, TransportError>;

    /// Replace the text and inline keyboard of an existing message.
    /// `None` or an empty keyboard removes the markup.
    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<SentMessage, TransportError>;

    /// Upload attachments as one grouped message, in the given order
    async fn send_media_group(
        &self,
        chat_id: ChatId,
        media: Vec<(String, Media)>,
    ) -> Result<Vec<SentMessage>, TransportError>;

    /// Acknowledge a button press
    async fn answer_callback_query(
        &self,
        query_id: &str,
        text: Option<String>,
    ) -> Result<(), TransportError>;

    /// Resolve a file id to a download URL
    async fn get_file_url(&self, file_id: &str) -> Result<String, TransportError>;

    /// Publish the command menu
    async fn set_my_commands(&self, commands: &[CommandInfo]) -> Result<(), TransportError>;

    /// The bot's own username, used to strip `@botname` suffixes
    async fn bot_username(&self) -> Result<Option<String>, TransportError>;
}
