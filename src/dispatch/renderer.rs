//! Turns an invocation's result stream into platform messages.
//!
//! One renderer task per invocation. It consumes replies in emission order,
//! decides per reply whether to upload media, edit the previous message in
//! place or send a new one, and applies the final conversation-state
//! instruction once the stream closes.

use super::reachability::ChatReachability;
use super::state::ConversationStore;
use super::types::{InlineKeyboard, Media, Origin, Reply, StateChange, Trigger};
use crate::error::TransportError;
use crate::transport::resilient::{
    edit_message_safe_resilient, send_media_group_resilient, send_message_resilient,
};
use crate::transport::{ChatId, MessageId, Transport};
use crate::utils::mention_html;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info_span, warn, Instrument};

/// The message an invocation last showed the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Message id, absent until something was sent
    pub message_id: Option<MessageId>,
    /// Text as displayed, mention prefix included
    pub text: String,
    /// Whether the message currently carries an inline keyboard
    pub has_keyboard: bool,
}

impl Rendered {
    /// Starting point for an invocation triggered by `message_id`
    #[must_use]
    pub fn origin(message_id: MessageId, text: impl Into<String>, has_keyboard: bool) -> Self {
        Self {
            message_id: Some(message_id),
            text: text.into(),
            has_keyboard,
        }
    }
}

/// Everything the renderer needs to know about one invocation
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Who triggered it, and where
    pub origin: Origin,
    /// How it was triggered
    pub trigger: Trigger,
    /// Invocation token, used as log correlation id
    pub token: String,
    /// The message replies may edit in place
    pub previous: Rendered,
}

/// Named attachments in upload order
#[must_use]
pub fn ordered_media(media: HashMap<String, Media>) -> Vec<(String, Media)> {
    let mut items: Vec<(String, Media)> = media.into_iter().collect();
    items.sort_by(|a, b| a.0.cmp(&b.0));
    items
}

fn has_buttons(keyboard: &InlineKeyboard) -> bool {
    keyboard.first().is_some_and(|row| !row.is_empty())
}

/// Keyboard for an in-place edit; an empty first row removes it
fn edit_keyboard(keyboard: InlineKeyboard) -> Option<InlineKeyboard> {
    has_buttons(&keyboard).then_some(keyboard)
}

/// Renders result streams through a [`Transport`]
pub struct Renderer {
    transport: Arc<dyn Transport>,
    states: Arc<ConversationStore>,
    reachability: ChatReachability,
}

impl Renderer {
    /// Create a renderer writing conversation state into `states`
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        states: Arc<ConversationStore>,
        reachability: ChatReachability,
    ) -> Self {
        Self {
            transport,
            states,
            reachability,
        }
    }

    /// Consume `results` until the handler drops its sender.
    ///
    /// The conversation state of the last rendered reply is applied at the
    /// end; an invocation that produced nothing leaves the state untouched.
    pub async fn render(self: Arc<Self>, job: RenderJob, mut results: mpsc::Receiver<Reply>) {
        let span = info_span!("render", token = %job.token, chat_id = job.origin.chat_id);
        async move {
            let mut previous = job.previous.clone();
            let mut last_state: Option<StateChange> = None;

            while let Some(mut reply) = results.recv().await {
                if !self.reachability.is_reachable(job.origin.chat_id) {
                    warn!("Chat is unreachable, dropping the rest of the stream");
                    break;
                }
                if let Some(err) = reply.error.take() {
                    error!("Handler reported an error: {err:#}");
                }
                last_state = Some(std::mem::take(&mut reply.state));

                if let Err(e) = self.render_one(&job.origin, &mut previous, reply).await {
                    self.on_send_error(job.origin.chat_id, &e).await;
                }
            }
            drop(results);

            if let Some(state) = last_state {
                self.states.apply(job.origin.user_id, job.trigger, state);
            }
            debug!("Result stream closed");
        }
        .instrument(span)
        .await;
    }

    async fn render_one(
        &self,
        origin: &Origin,
        previous: &mut Rendered,
        mut reply: Reply,
    ) -> Result<(), TransportError> {
        let chat_id = origin.chat_id;
        let transport = self.transport.as_ref();

        if let Some(media) = reply.media.take().filter(|m| !m.is_empty()) {
            let mut items = ordered_media(media);
            if !reply.text.is_empty() {
                if let Some((_, first)) = items.first_mut() {
                    if first.caption.is_none() {
                        first.caption = Some(addressed(origin, &reply.text));
                    }
                }
            }
            let sent = send_media_group_resilient(transport, chat_id, items).await?;
            *previous = Rendered {
                message_id: sent.first().map(|m| m.message_id),
                text: String::new(),
                has_keyboard: false,
            };
            return Ok(());
        }

        if let Some(keyboard) = reply.inline.clone() {
            if previous.has_keyboard && !reply.force_new {
                if let Some(message_id) = previous.message_id {
                    let text = if reply.text.is_empty() {
                        previous.text.clone()
                    } else {
                        addressed(origin, &reply.text)
                    };
                    let keyboard = edit_keyboard(keyboard);
                    let has_keyboard = keyboard.is_some();
                    edit_message_safe_resilient(transport, chat_id, message_id, &text, keyboard)
                        .await?;
                    previous.text = text;
                    previous.has_keyboard = has_keyboard;
                    return Ok(());
                }
            }
        }

        if reply.text.is_empty() {
            debug!("Reply without text or media, nothing to send");
            return Ok(());
        }

        let text = addressed(origin, &reply.text);
        let sent = send_message_resilient(transport, chat_id, &text, reply.markup()).await?;
        *previous = Rendered {
            message_id: Some(sent.message_id),
            text,
            has_keyboard: reply.inline.as_ref().is_some_and(has_buttons),
        };
        Ok(())
    }

    async fn on_send_error(&self, chat_id: ChatId, e: &TransportError) {
        if e.is_chat_unreachable() {
            self.reachability.mark_unreachable(chat_id).await;
        }
        error!("Failed to render reply: {e}");
    }
}

/// Prefix group replies with a mention of the acting user
fn addressed(origin: &Origin, text: &str) -> String {
    if origin.is_private {
        text.to_string()
    } else {
        format!("{}\n{text}", mention_html(origin.user_id, &origin.user_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::types::{Continuation, InlineButton, Markup, MediaKind};
    use crate::transport::{MockTransport, SentMessage};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn origin(is_private: bool) -> Origin {
        Origin {
            user_id: 7,
            user_name: "Ann".to_string(),
            chat_id: 70,
            is_private,
        }
    }

    fn job(is_private: bool, previous: Rendered) -> RenderJob {
        RenderJob {
            origin: origin(is_private),
            trigger: Trigger::Message,
            token: "tok".to_string(),
            previous,
        }
    }

    fn sent(chat_id: ChatId, message_id: MessageId) -> Result<SentMessage, TransportError> {
        Ok(SentMessage {
            chat_id,
            message_id,
        })
    }

    fn keyboard() -> InlineKeyboard {
        vec![vec![InlineButton::callback("❌ Cancel", "!cancel tok")]]
    }

    async fn run(transport: MockTransport, job: RenderJob, replies: Vec<Reply>) -> Arc<ConversationStore> {
        let states = Arc::new(ConversationStore::new());
        let renderer = Arc::new(Renderer::new(
            Arc::new(transport),
            Arc::clone(&states),
            ChatReachability::default(),
        ));
        let (tx, rx) = mpsc::channel(replies.len().max(1));
        for reply in replies {
            assert!(tx.send(reply).await.is_ok());
        }
        drop(tx);
        renderer.render(job, rx).await;
        states
    }

    #[tokio::test]
    async fn keyboard_replies_edit_the_previous_message() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        transport
            .expect_send_message()
            .with(eq(70), eq("working"), eq(Some(Markup::Inline(keyboard()))))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chat, _, _| sent(chat, 11));
        transport
            .expect_edit_message_text()
            .with(eq(70), eq(11), eq("50%"), eq(Some(keyboard())))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chat, id, _, _| sent(chat, id));
        transport
            .expect_edit_message_text()
            .with(eq(70), eq(11), eq("done"), eq(None))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chat, id, _, _| sent(chat, id));

        run(
            transport,
            job(true, Rendered::origin(1, "/heavy", false)),
            vec![
                Reply::text("working").inline(keyboard()),
                Reply::text("50%").inline(keyboard()),
                Reply::text("done").inline(vec![vec![]]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn force_new_sends_instead_of_editing() {
        let mut transport = MockTransport::new();
        transport.expect_edit_message_text().never();
        transport
            .expect_send_message()
            .with(eq(70), eq("again"), eq(Some(Markup::Inline(keyboard()))))
            .times(1)
            .returning(|chat, _, _| sent(chat, 12));

        run(
            transport,
            job(true, Rendered::origin(11, "old", true)),
            vec![Reply::text("again").inline(keyboard()).force_new()],
        )
        .await;
    }

    #[tokio::test]
    async fn group_replies_mention_the_user() {
        let mut transport = MockTransport::new();
        transport
            .expect_send_message()
            .withf(|chat, text, markup| {
                *chat == 70
                    && text == "<a href=\"tg://user?id=7\">Ann</a>\npong!"
                    && markup.is_none()
            })
            .times(1)
            .returning(|chat, _, _| sent(chat, 2));

        run(
            transport,
            job(false, Rendered::origin(1, "/ping", false)),
            vec![Reply::text("pong!")],
        )
        .await;
    }

    #[tokio::test]
    async fn media_is_uploaded_in_name_order() {
        let mut transport = MockTransport::new();
        transport
            .expect_send_media_group()
            .withf(|chat, media| {
                let names: Vec<&str> = media.iter().map(|(n, _)| n.as_str()).collect();
                *chat == 70 && names == ["a", "b", "c"] && media[0].1.caption.as_deref() == Some("files")
            })
            .times(1)
            .returning(|chat, _| Ok(vec![SentMessage { chat_id: chat, message_id: 3 }]));
        transport.expect_send_message().never();

        run(
            transport,
            job(true, Rendered::origin(1, "/files", false)),
            vec![Reply::text("files")
                .media("c", Media::file(MediaKind::Document, "/tmp/c"))
                .media("a", Media::file(MediaKind::Photo, "/tmp/a"))
                .media("b", Media::file(MediaKind::Audio, "/tmp/b"))],
        )
        .await;
    }

    #[tokio::test]
    async fn forbidden_marks_chat_and_stops() {
        let mut transport = MockTransport::new();
        transport
            .expect_send_message()
            .times(1)
            .returning(|_, _, _| Err(TransportError::api(403, "Forbidden: bot was blocked by the user")));

        let states = Arc::new(ConversationStore::new());
        let reachability = ChatReachability::default();
        let renderer = Arc::new(Renderer::new(
            Arc::new(transport),
            Arc::clone(&states),
            reachability.clone(),
        ));
        let (tx, rx) = mpsc::channel(4);
        assert!(tx.send(Reply::text("one")).await.is_ok());
        assert!(tx.send(Reply::text("two")).await.is_ok());
        drop(tx);

        renderer
            .render(job(true, Rendered::origin(1, "/x", false)), rx)
            .await;
        assert!(!reachability.is_reachable(70));
    }

    #[tokio::test]
    async fn state_follows_last_reply() {
        let next = Continuation::from_fn(|_, _| async {});
        let mut transport = MockTransport::new();
        transport
            .expect_send_message()
            .times(2)
            .returning(|chat, _, _| sent(chat, 5));

        let states = run(
            transport,
            job(true, Rendered::origin(1, "/ping me", false)),
            vec![Reply::text("hmm"), Reply::text("What is your name?").then(next.clone())],
        )
        .await;
        assert!(states.get(7).is_some_and(|c| c.same_as(&next)));
    }

    #[tokio::test]
    async fn empty_stream_leaves_state_alone() {
        let states = Arc::new(ConversationStore::new());
        let kept = Continuation::from_fn(|_, _| async {});
        states.set(7, kept.clone());

        let renderer = Arc::new(Renderer::new(
            Arc::new(MockTransport::new()),
            Arc::clone(&states),
            ChatReachability::default(),
        ));
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        renderer
            .render(job(true, Rendered::origin(1, "hi", false)), rx)
            .await;
        assert!(states.get(7).is_some_and(|c| c.same_as(&kept)));
    }
}
