//! Telegram Bot API transport
//!
//! Thin adapter between teloxide and the transport-neutral types the
//! dispatcher works with. Retries live one layer up in
//! [`super::resilient`]; this module only performs single requests and maps
//! their errors.

use super::{
    Attachment, CallbackQuery, Chat, ChatId, CommandInfo, Message, MessageId, SentMessage,
    Transport, Update, UpdateKind, UpdateType, User,
};
use crate::dispatch::{InlineKeyboard, Markup, Media, MediaKind, MediaSource};
use crate::error::{TransportError, CODE_BAD_REQUEST, CODE_FORBIDDEN};
use async_trait::async_trait;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, BotCommand, CallbackQueryId, ChatMemberKind, FileId, InlineKeyboardButton,
    InlineKeyboardMarkup, InputFile, InputMedia, InputMediaAudio, InputMediaDocument,
    InputMediaPhoto, InputMediaVideo, KeyboardButton, KeyboardMarkup, KeyboardRemove,
    MessageEntity, MessageEntityKind, MessageEntityRef, ParseMode, ReplyMarkup,
};
use std::cmp::Reverse;
use teloxide::{ApiError, RequestError};
use tracing::debug;

/// [`Transport`] backed by a teloxide [`Bot`]
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Create a transport for the bot with the given token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    /// Underlying teloxide bot
    #[must_use]
    pub const fn bot(&self) -> &Bot {
        &self.bot
    }
}

/// Map a teloxide failure onto the transport error taxonomy
fn map_error(err: RequestError) -> TransportError {
    match err {
        RequestError::Api(api) => {
            let code = match api {
                ApiError::BotBlocked
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup
                | ApiError::UserDeactivated
                | ApiError::CantInitiateConversation => CODE_FORBIDDEN,
                _ => CODE_BAD_REQUEST,
            };
            TransportError::api(code, api.to_string())
        }
        RequestError::MigrateToChatId(chat) => {
            TransportError::api(CODE_BAD_REQUEST, format!("chat migrated to {chat}"))
        }
        other => TransportError::Network(other.to_string()),
    }
}

fn inline_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.into_iter().map(|row| {
        row.into_iter()
            .map(|button| InlineKeyboardButton::callback(button.text, button.data))
            .collect::<Vec<_>>()
    }))
}

fn reply_markup(markup: Markup) -> ReplyMarkup {
    match markup {
        Markup::Inline(keyboard) => ReplyMarkup::InlineKeyboard(inline_markup(keyboard)),
        Markup::Reply(rows) => ReplyMarkup::Keyboard(
            KeyboardMarkup::new(
                rows.into_iter()
                    .map(|row| row.into_iter().map(KeyboardButton::new).collect::<Vec<_>>()),
            )
            .resize_keyboard(),
        ),
        Markup::Remove => ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    }
}

fn input_file(name: &str, source: MediaSource) -> Result<InputFile, TransportError> {
    Ok(match source {
        MediaSource::Path(path) => InputFile::file(path),
        MediaSource::Url(url) => InputFile::url(
            reqwest::Url::parse(&url)
                .map_err(|e| TransportError::api(CODE_BAD_REQUEST, format!("bad media url: {e}")))?,
        ),
        MediaSource::Bytes(bytes) => InputFile::memory(bytes).file_name(name.to_string()),
    })
}

fn input_media(name: &str, media: Media) -> Result<InputMedia, TransportError> {
    let file = input_file(name, media.source)?;
    let caption = media.caption;
    Ok(match media.kind {
        MediaKind::Photo => {
            let mut item = InputMediaPhoto::new(file).parse_mode(ParseMode::Html);
            if let Some(caption) = caption {
                item = item.caption(caption);
            }
            InputMedia::Photo(item)
        }
        MediaKind::Audio => {
            let mut item = InputMediaAudio::new(file).parse_mode(ParseMode::Html);
            if let Some(caption) = caption {
                item = item.caption(caption);
            }
            InputMedia::Audio(item)
        }
        MediaKind::Video => {
            let mut item = InputMediaVideo::new(file).parse_mode(ParseMode::Html);
            if let Some(caption) = caption {
                item = item.caption(caption);
            }
            InputMedia::Video(item)
        }
        MediaKind::Document => {
            let mut item = InputMediaDocument::new(file).parse_mode(ParseMode::Html);
            if let Some(caption) = caption {
                item = item.caption(caption);
            }
            InputMedia::Document(item)
        }
    })
}

fn user(user: &teloxide::types::User) -> User {
    User {
        id: user.id.0.cast_signed(),
        first_name: user.first_name.clone(),
        username: user.username.clone(),
    }
}

fn entity_tags(kind: &MessageEntityKind) -> Option<(String, String)> {
    let simple = |name: &str| Some((format!("<{name}>"), format!("</{name}>")));
    match kind {
        MessageEntityKind::Bold => simple("b"),
        MessageEntityKind::Italic => simple("i"),
        MessageEntityKind::Underline => simple("u"),
        MessageEntityKind::Strikethrough => simple("s"),
        MessageEntityKind::Spoiler => simple("tg-spoiler"),
        MessageEntityKind::Code => simple("code"),
        MessageEntityKind::Blockquote => simple("blockquote"),
        MessageEntityKind::ExpandableBlockquote => Some((
            "<blockquote expandable>".to_string(),
            "</blockquote>".to_string(),
        )),
        MessageEntityKind::Pre { language: None } => simple("pre"),
        MessageEntityKind::Pre {
            language: Some(language),
        } => Some((
            format!(
                "<pre><code class=\"language-{}\">",
                html_escape::encode_double_quoted_attribute(language)
            ),
            "</code></pre>".to_string(),
        )),
        MessageEntityKind::TextLink { url } => Some((
            format!(
                "<a href=\"{}\">",
                html_escape::encode_double_quoted_attribute(url.as_str())
            ),
            "</a>".to_string(),
        )),
        MessageEntityKind::TextMention { user } => Some((
            format!("<a href=\"tg://user?id={}\">", user.id.0),
            "</a>".to_string(),
        )),
        _ => None,
    }
}

/// Render `text` with its formatting entities back into Telegram HTML,
/// escaping everything outside the tags
fn entities_html(text: &str, entities: &[MessageEntity]) -> String {
    // (offset, opens, other end, nesting order, tag)
    let mut marks = Vec::new();
    for (index, entity) in MessageEntityRef::parse(text, entities).iter().enumerate() {
        let Some((open, close)) = entity_tags(entity.kind()) else {
            continue;
        };
        marks.push((entity.start(), true, Reverse(entity.end()), index, open));
        marks.push((
            entity.end(),
            false,
            Reverse(entity.start()),
            usize::MAX - index,
            close,
        ));
    }
    // Closing tags sort before opening ones at the same offset, and inner
    // ranges nest inside outer ones
    marks.sort_by_key(|(offset, opens, other, order, _)| (*offset, *opens, *other, *order));

    let mut html = String::with_capacity(text.len() + marks.len() * 8);
    let mut cursor = 0;
    for (offset, _, _, _, tag) in marks {
        html.push_str(&html_escape::encode_text(text.get(cursor..offset).unwrap_or_default()));
        html.push_str(&tag);
        cursor = offset;
    }
    html.push_str(&html_escape::encode_text(text.get(cursor..).unwrap_or_default()));
    html
}

fn message(msg: &teloxide::types::Message) -> Message {
    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    let html = msg
        .text()
        .zip(msg.entities())
        .or_else(|| msg.caption().zip(msg.caption_entities()))
        .map_or_else(
            || html_escape::encode_text(text).into_owned(),
            |(text, entities)| entities_html(text, entities),
        );
    let entities = msg.entities().or_else(|| msg.caption_entities());
    let mention_owner = entities.and_then(|entities| {
        entities.iter().find_map(|entity| match &entity.kind {
            MessageEntityKind::TextMention { user } => Some(user.id.0.cast_signed()),
            _ => None,
        })
    });

    let attachment = msg
        .voice()
        .map(|voice| Attachment {
            file_id: voice.file.id.0.clone(),
            file_name: None,
        })
        .or_else(|| {
            msg.audio().map(|audio| Attachment {
                file_id: audio.file.id.0.clone(),
                file_name: audio.file_name.clone(),
            })
        });

    let shared_user = msg
        .shared_users()
        .and_then(|shared| shared.users.first())
        .map(|shared| shared.user_id.0.cast_signed());

    Message {
        id: msg.id.0,
        chat: Chat {
            id: msg.chat.id.0,
            is_private: msg.chat.is_private(),
        },
        from: msg.from.as_ref().map(user),
        text: text.to_string(),
        html,
        mention_owner,
        attachment,
        shared_user,
        has_inline_keyboard: msg.reply_markup().is_some(),
    }
}

fn update_kind(kind: teloxide::types::UpdateKind) -> UpdateKind {
    use teloxide::types::UpdateKind as Tg;
    match kind {
        Tg::Message(msg) => UpdateKind::Message(message(&msg)),
        Tg::CallbackQuery(q) => UpdateKind::Callback(CallbackQuery {
            id: q.id.0.clone(),
            from: user(&q.from),
            message: q.message.as_ref().and_then(|m| m.regular_message()).map(message),
            data: q.data.unwrap_or_default(),
        }),
        Tg::MyChatMember(change) => UpdateKind::Membership {
            chat_id: change.chat.id.0,
            present: !matches!(
                change.new_chat_member.kind,
                ChatMemberKind::Left | ChatMemberKind::Banned(_)
            ),
        },
        _ => UpdateKind::Other,
    }
}

const fn allowed_update(kind: UpdateType) -> AllowedUpdate {
    match kind {
        UpdateType::Message => AllowedUpdate::Message,
        UpdateType::CallbackQuery => AllowedUpdate::CallbackQuery,
        UpdateType::MyChatMember => AllowedUpdate::MyChatMember,
    }
}

fn sent(msg: &teloxide::types::Message) -> SentMessage {
    SentMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
        allowed: &[UpdateType],
    ) -> Result<Vec<Update>, TransportError> {
        let updates = self
            .bot
            .get_updates()
            .offset(i32::try_from(offset).unwrap_or(i32::MAX))
            .timeout(u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX))
            .allowed_updates(allowed.iter().copied().map(allowed_update).collect::<Vec<_>>())
            .await
            .map_err(map_error)?;

        Ok(updates
            .into_iter()
            .map(|update| Update {
                id: i64::from(update.id.0),
                kind: update_kind(update.kind),
            })
            .collect())
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        markup: Option<Markup>,
    ) -> Result<SentMessage, TransportError> {
        let mut req = self
            .bot
            .send_message(teloxide::types::ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(markup) = markup {
            req = req.reply_markup(reply_markup(markup));
        }
        req.await.map(|msg| sent(&msg)).map_err(map_error)
    }

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<SentMessage, TransportError> {
        self.bot
            .edit_message_text(
                teloxide::types::ChatId(chat_id),
                teloxide::types::MessageId(message_id),
                text,
            )
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard.map_or_else(InlineKeyboardMarkup::default, inline_markup))
            .await
            .map(|msg| sent(&msg))
            .map_err(map_error)
    }

    async fn send_media_group(
        &self,
        chat_id: ChatId,
        media: Vec<(String, Media)>,
    ) -> Result<Vec<SentMessage>, TransportError> {
        let items = media
            .into_iter()
            .map(|(name, media)| input_media(&name, media))
            .collect::<Result<Vec<_>, _>>()?;

        self.bot
            .send_media_group(teloxide::types::ChatId(chat_id), items)
            .await
            .map(|messages| messages.iter().map(sent).collect())
            .map_err(map_error)
    }

    async fn answer_callback_query(
        &self,
        query_id: &str,
        text: Option<String>,
    ) -> Result<(), TransportError> {
        let mut req = self
            .bot
            .answer_callback_query(CallbackQueryId(query_id.to_string()));
        if let Some(text) = text {
            req = req.text(text);
        }
        req.await.map(|_| ()).map_err(map_error)
    }

    async fn get_file_url(&self, file_id: &str) -> Result<String, TransportError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(map_error)?;
        let url = self
            .bot
            .api_url()
            .join(&format!("file/bot{}/{}", self.bot.token(), file.path))
            .map_err(|e| TransportError::api(CODE_BAD_REQUEST, format!("bad file url: {e}")))?;
        debug!(file_id, "Resolved file URL");
        Ok(url.to_string())
    }

    async fn set_my_commands(&self, commands: &[CommandInfo]) -> Result<(), TransportError> {
        let commands: Vec<BotCommand> = commands
            .iter()
            .map(|c| BotCommand::new(c.command.clone(), c.description.clone()))
            .collect();
        self.bot
            .set_my_commands(commands)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn bot_username(&self) -> Result<Option<String>, TransportError> {
        let me = self.bot.get_me().await.map_err(map_error)?;
        Ok(me.user.username.clone())
    }
}
