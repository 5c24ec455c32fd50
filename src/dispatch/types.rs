//! Handler-facing contract: continuations, payloads and replies.

use crate::transport::{ChatId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::cancel::CANCEL_SIGIL;

/// Execution context handed to a running step. Steps poll it (or race it
/// against blocking work) to honour cancellation.
pub type Context = CancellationToken;

/// One unit of conversation logic
#[async_trait]
pub trait Step: Send + Sync {
    /// Run the step, emitting replies through `payload`
    async fn run(&self, ctx: Context, payload: Payload);
}

/// Adapter turning an async closure into a [`Step`]
struct FnStep<F>(F);

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(Context, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(&self, ctx: Context, payload: Payload) {
        (self.0)(ctx, payload).await;
    }
}

/// A handler entry point or a "next step" captured by an earlier reply
#[derive(Clone)]
pub struct Continuation(Arc<dyn Step>);

impl Continuation {
    /// Wrap a step implementation
    pub fn new(step: impl Step + 'static) -> Self {
        Self(Arc::new(step))
    }

    /// Wrap an async closure
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Arc::new(FnStep(f)))
    }

    /// Execute the wrapped step
    pub async fn run(&self, ctx: Context, payload: Payload) {
        self.0.run(ctx, payload).await;
    }

    /// Whether two handles refer to the same step instance
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Continuation(..)")
    }
}

/// What an invocation asks to do with the user's conversation state
#[derive(Debug, Clone, Default)]
pub enum StateChange {
    /// No instruction
    #[default]
    Unchanged,
    /// Route the user's next input to this continuation
    Continue(Continuation),
    /// Explicitly end the conversation
    Clear,
}

/// Inline keyboard button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    /// Label
    pub text: String,
    /// Payload delivered back as callback data
    pub data: String,
}

impl InlineButton {
    /// Button that calls back with `data`
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Rows of inline buttons
pub type InlineKeyboard = Vec<Vec<InlineButton>>;

/// Rows of custom reply keyboard labels
pub type ReplyKeyboard = Vec<Vec<String>>;

/// Markup attached to a newly sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markup {
    /// Buttons under the message
    Inline(InlineKeyboard),
    /// Custom keyboard replacing the user's input keyboard
    Reply(ReplyKeyboard),
    /// Hide a previously shown custom keyboard
    Remove,
}

/// Kind of an uploaded attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Picture
    Photo,
    /// Music track
    Audio,
    /// Video clip
    Video,
    /// Any file
    Document,
}

/// Where attachment bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Local file
    Path(PathBuf),
    /// Remote URL fetched by the platform
    Url(String),
    /// In-memory bytes
    Bytes(Vec<u8>),
}

/// A named attachment in a media reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    /// Attachment kind
    pub kind: MediaKind,
    /// Content
    pub source: MediaSource,
    /// Optional caption
    pub caption: Option<String>,
}

impl Media {
    /// Attachment read from a local file
    pub fn file(kind: MediaKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: MediaSource::Path(path.into()),
            caption: None,
        }
    }
}

/// One unit of output from a continuation
#[derive(Debug, Default)]
pub struct Reply {
    /// Display text (Telegram HTML)
    pub text: String,
    /// Conversation state instruction
    pub state: StateChange,
    /// Inline keyboard
    pub inline: Option<InlineKeyboard>,
    /// Custom reply keyboard
    pub reply_keyboard: Option<ReplyKeyboard>,
    /// Ask the client to hide the custom keyboard
    pub remove_keyboard: bool,
    /// Named attachments
    pub media: Option<HashMap<String, Media>>,
    /// Never edit in place, always send a new message
    pub force_new: bool,
    /// Underlying failure, logged by the renderer
    pub error: Option<anyhow::Error>,
}

impl Reply {
    /// Plain text reply
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Standard failure reply with a button re-issuing `command`
    pub fn retry(text: impl Into<String>, command: impl Into<String>) -> Self {
        Self::text(text).inline(vec![vec![InlineButton::callback("🔄 Retry", command)]])
    }

    /// Route the user's next input to `next`
    #[must_use]
    pub fn then(mut self, next: Continuation) -> Self {
        self.state = StateChange::Continue(next);
        self
    }

    /// Explicitly end the conversation
    #[must_use]
    pub fn clear_state(mut self) -> Self {
        self.state = StateChange::Clear;
        self
    }

    /// Attach an inline keyboard
    #[must_use]
    pub fn inline(mut self, keyboard: InlineKeyboard) -> Self {
        self.inline = Some(keyboard);
        self
    }

    /// Attach a custom reply keyboard
    #[must_use]
    pub fn reply_keyboard(mut self, keyboard: ReplyKeyboard) -> Self {
        self.reply_keyboard = Some(keyboard);
        self
    }

    /// Hide the custom keyboard
    #[must_use]
    pub fn remove_keyboard(mut self) -> Self {
        self.remove_keyboard = true;
        self
    }

    /// Add a named attachment
    #[must_use]
    pub fn media(mut self, name: impl Into<String>, media: Media) -> Self {
        self.media
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), media);
        self
    }

    /// Always send a new message instead of editing
    #[must_use]
    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Attach the failure behind this reply
    #[must_use]
    pub fn error(mut self, err: impl Into<anyhow::Error>) -> Self {
        self.error = Some(err.into());
        self
    }

    /// Markup for a newly sent message: inline, else reply keyboard, else removal
    #[must_use]
    pub fn markup(&self) -> Option<Markup> {
        if let Some(inline) = &self.inline {
            return Some(Markup::Inline(inline.clone()));
        }
        if let Some(keyboard) = &self.reply_keyboard {
            return Some(Markup::Reply(keyboard.clone()));
        }
        if self.remove_keyboard {
            return Some(Markup::Remove);
        }
        None
    }
}

/// How an invocation was triggered; decides conversation-state handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Typed text or media
    Message,
    /// Inline button press
    Callback,
}

/// Sending half of an invocation's result stream
pub type ReplySender = mpsc::Sender<Reply>;

/// Who triggered an invocation, and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Acting user
    pub user_id: UserId,
    /// Acting user's display name
    pub user_name: String,
    /// Chat the invocation belongs to
    pub chat_id: ChatId,
    /// Whether the chat is a private chat
    pub is_private: bool,
}

/// Per-invocation input for a continuation
#[derive(Debug)]
pub struct Payload {
    /// Acting user
    pub user_id: UserId,
    /// Acting user's display name
    pub user_name: String,
    /// Chat the invocation belongs to
    pub chat_id: ChatId,
    /// Whether the chat is a private chat
    pub is_private: bool,
    /// Command text, callback data, or attachment file name
    pub text: String,
    /// Download URL of a voice/audio attachment
    pub file_url: Option<String>,
    /// Invocation token; also the correlation id for logs
    pub token: String,
    /// How the invocation was triggered
    pub trigger: Trigger,
    results: ReplySender,
}

impl Payload {
    /// Build a payload around the sending half of a result stream
    #[must_use]
    pub fn new(
        origin: Origin,
        text: impl Into<String>,
        token: impl Into<String>,
        trigger: Trigger,
        results: ReplySender,
    ) -> Self {
        Self {
            user_id: origin.user_id,
            user_name: origin.user_name,
            chat_id: origin.chat_id,
            is_private: origin.is_private,
            text: text.into(),
            file_url: None,
            token: token.into(),
            trigger,
            results,
        }
    }

    /// Emit a reply. Returns `false` once nobody renders this stream anymore.
    pub async fn send(&self, reply: Reply) -> bool {
        self.results.send(reply).await.is_ok()
    }

    /// Button that cancels this invocation
    #[must_use]
    pub fn cancel_button(&self) -> InlineButton {
        InlineButton::callback("❌ Cancel", format!("{CANCEL_SIGIL}{}", self.token))
    }

    /// Text after the command token, trimmed
    #[must_use]
    pub fn args(&self) -> &str {
        self.text
            .split_once(' ')
            .map_or("", |(_, rest)| rest.trim())
    }
}
