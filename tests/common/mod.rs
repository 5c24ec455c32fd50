//! Recording fake of [`Transport`] for integration tests.
//!
//! Every outgoing call is appended to a log the test can inspect; inbound
//! updates are served from a queue of batches, and an exhausted queue ends
//! the poll loop with a cancellation error.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stepwise_bot::dispatch::{InlineKeyboard, Markup, Media};
use stepwise_bot::error::TransportError;
use stepwise_bot::transport::{
    CallbackQuery, Chat, ChatId, CommandInfo, Message, MessageId, SentMessage, Transport, Update,
    UpdateKind, UpdateType, User,
};

/// One recorded outgoing call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        markup: Option<Markup>,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
    MediaGroup {
        chat_id: ChatId,
        names: Vec<String>,
    },
    AnswerCallback {
        query_id: String,
    },
    SetCommands {
        commands: Vec<String>,
    },
    Poll {
        offset: i64,
    },
}

impl Call {
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            Self::Send { chat_id, .. } | Self::Edit { chat_id, .. } | Self::MediaGroup { chat_id, .. } => {
                Some(*chat_id)
            }
            _ => None,
        }
    }

    /// Whether this call is visible to chat users
    pub fn is_render(&self) -> bool {
        self.chat_id().is_some()
    }
}

#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<Call>>,
    updates: Mutex<VecDeque<Vec<Update>>>,
    next_id: AtomicI32,
    fail_sends: Mutex<Option<TransportError>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI32::new(100),
            ..Self::default()
        })
    }

    /// Queue one batch for the next `get_updates`
    pub fn push_updates(&self, batch: Vec<Update>) {
        lock(&self.updates).push_back(batch);
    }

    /// Make every following send fail with `err`
    pub fn fail_sends_with(&self, err: TransportError) {
        *lock(&self.fail_sends) = Some(err);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Calls that reached a chat, in order
    pub fn renders(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_render).collect()
    }

    /// Rendered calls for one chat
    pub fn renders_in(&self, chat_id: ChatId) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.chat_id() == Some(chat_id))
            .collect()
    }

    /// Text of every rendered send/edit in `chat_id`
    pub fn texts_in(&self, chat_id: ChatId) -> Vec<String> {
        self.renders_in(chat_id)
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { text, .. } | Call::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Poll until `check` holds, failing the test after a second
    pub async fn wait_for(&self, check: impl Fn(&[Call]) -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if check(&self.calls()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "condition not reached, calls: {:#?}", self.calls());
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    fn next_message_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn send_failure(&self) -> Option<TransportError> {
        lock(&self.fail_sends).clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_updates(
        &self,
        offset: i64,
        _timeout: Duration,
        _allowed: &[UpdateType],
    ) -> Result<Vec<Update>, TransportError> {
        self.record(Call::Poll { offset });
        let batch = lock(&self.updates).pop_front();
        batch.ok_or(TransportError::Cancelled)
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        markup: Option<Markup>,
    ) -> Result<SentMessage, TransportError> {
        if let Some(err) = self.send_failure() {
            return Err(err);
        }
        let message_id = self.next_message_id();
        self.record(Call::Send {
            chat_id,
            message_id,
            text: text.to_string(),
            markup,
        });
        Ok(SentMessage {
            chat_id,
            message_id,
        })
    }

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<SentMessage, TransportError> {
        if let Some(err) = self.send_failure() {
            return Err(err);
        }
        self.record(Call::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(SentMessage {
            chat_id,
            message_id,
        })
    }

    async fn send_media_group(
        &self,
        chat_id: ChatId,
        media: Vec<(String, Media)>,
    ) -> Result<Vec<SentMessage>, TransportError> {
        if let Some(err) = self.send_failure() {
            return Err(err);
        }
        self.record(Call::MediaGroup {
            chat_id,
            names: media.iter().map(|(name, _)| name.clone()).collect(),
        });
        Ok(media
            .iter()
            .map(|_| SentMessage {
                chat_id,
                message_id: self.next_message_id(),
            })
            .collect())
    }

    async fn answer_callback_query(
        &self,
        query_id: &str,
        _text: Option<String>,
    ) -> Result<(), TransportError> {
        self.record(Call::AnswerCallback {
            query_id: query_id.to_string(),
        });
        Ok(())
    }

    async fn get_file_url(&self, file_id: &str) -> Result<String, TransportError> {
        Ok(format!("https://files.test/{file_id}"))
    }

    async fn set_my_commands(&self, commands: &[CommandInfo]) -> Result<(), TransportError> {
        self.record(Call::SetCommands {
            commands: commands.iter().map(|c| c.command.clone()).collect(),
        });
        Ok(())
    }

    async fn bot_username(&self) -> Result<Option<String>, TransportError> {
        Ok(Some("stepwise_bot".to_string()))
    }
}

pub fn user(id: i64, name: &str) -> User {
    User {
        id,
        first_name: name.to_string(),
        username: None,
    }
}

pub fn private_chat(id: ChatId) -> Chat {
    Chat {
        id,
        is_private: true,
    }
}

pub fn group_chat(id: ChatId) -> Chat {
    Chat {
        id,
        is_private: false,
    }
}

pub fn text_update(id: i64, chat: Chat, from: User, text: &str) -> Update {
    Update {
        id,
        kind: UpdateKind::Message(Message::text(i32::try_from(id).unwrap_or(1), chat, from, text)),
    }
}

/// Button press on `message` by `from`
pub fn callback_update(id: i64, from: User, message: Message, data: &str) -> Update {
    Update {
        id,
        kind: UpdateKind::Callback(CallbackQuery {
            id: format!("q{id}"),
            from,
            message: Some(message),
            data: data.to_string(),
        }),
    }
}
