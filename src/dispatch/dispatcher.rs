//! Inbound event routing and invocation lifecycle.
//!
//! The poll loop pulls updates in order and makes the routing decision
//! synchronously. Each resolved invocation then runs as two tasks (the
//! continuation and its renderer) joined only by the result stream.

use super::cancel::{new_token, parse_cancel, CancelKey, CancellationRegistry};
use super::reachability::ChatReachability;
use super::registry::{HandlerRegistry, COMMAND_SIGIL};
use super::renderer::{RenderJob, Rendered, Renderer};
use super::state::ConversationStore;
use super::types::{Continuation, Origin, Payload, Trigger};
use crate::error::TransportError;
use crate::transport::{
    Attachment, CallbackQuery, Message, Transport, Update, UpdateKind, UpdateType, User,
};
use crate::utils::strip_bot_mention;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Capacity of a single invocation's result stream
pub const RESULT_BUFFER: usize = 16;

/// Update types the poll loop asks for
pub const ALLOWED_UPDATES: [UpdateType; 3] = [
    UpdateType::Message,
    UpdateType::CallbackQuery,
    UpdateType::MyChatMember,
];

/// A resolved invocation, ready to launch
#[derive(Debug)]
pub struct Invocation {
    /// Continuation to run
    pub continuation: Continuation,
    /// Message or button press
    pub trigger: Trigger,
    /// Acting user and chat
    pub origin: Origin,
    /// Effective command text
    pub text: String,
    /// Attachment whose download URL goes into the payload
    pub attachment: Option<Attachment>,
    /// Message replies are reconciled against first
    pub previous: Rendered,
}

/// Outcome of the routing decision for one event
#[derive(Debug)]
pub enum Route {
    /// Run a continuation
    Invoke(Invocation),
    /// Cancel a running invocation
    Cancel(CancelKey),
    /// Nothing to do
    Ignore(&'static str),
}

/// Handles of a launched invocation
#[derive(Debug)]
pub struct Launched {
    /// Invocation token
    pub token: String,
    /// Task running the continuation
    pub handler: JoinHandle<()>,
    /// Task rendering its results
    pub renderer: JoinHandle<()>,
}

impl Launched {
    /// Wait until both tasks are done
    pub async fn join(self) {
        if let Err(e) = self.handler.await {
            warn!(token = %self.token, "Handler task failed: {e}");
        }
        if let Err(e) = self.renderer.await {
            warn!(token = %self.token, "Renderer task failed: {e}");
        }
    }
}

/// What [`Dispatcher::dispatch`] did with an update
#[derive(Debug)]
pub enum Dispatched {
    /// An invocation is running
    Launched(Launched),
    /// A cancellation was requested; `true` if something was running
    Cancelled(bool),
    /// The update was dropped
    Ignored(&'static str),
}

/// Routes inbound updates to continuations
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    handlers: Arc<HandlerRegistry>,
    states: Arc<ConversationStore>,
    cancels: Arc<CancellationRegistry>,
    reachability: ChatReachability,
    renderer: Arc<Renderer>,
    shutdown: CancellationToken,
    bot_username: Option<String>,
    poll_timeout: Duration,
    poll_retry: Duration,
}

impl Dispatcher {
    /// Dispatcher over `transport` serving the handlers in `handlers`
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, handlers: HandlerRegistry) -> Self {
        let states = Arc::new(ConversationStore::new());
        let reachability = ChatReachability::default();
        let renderer = Arc::new(Renderer::new(
            Arc::clone(&transport),
            Arc::clone(&states),
            reachability.clone(),
        ));
        Self {
            transport,
            handlers: Arc::new(handlers),
            states,
            cancels: Arc::new(CancellationRegistry::new()),
            reachability,
            renderer,
            shutdown: CancellationToken::new(),
            bot_username: None,
            poll_timeout: Duration::from_secs(30),
            poll_retry: Duration::from_secs(3),
        }
    }

    /// Strip `@username` from commands addressed to this bot
    #[must_use]
    pub fn with_bot_username(mut self, username: Option<String>) -> Self {
        self.bot_username = username;
        self
    }

    /// Long-poll timeout and retry backoff
    #[must_use]
    pub const fn with_polling(mut self, timeout: Duration, retry: Duration) -> Self {
        self.poll_timeout = timeout;
        self.poll_retry = retry;
        self
    }

    /// Token that stops the poll loop and cancels every running invocation
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Conversation state store
    #[must_use]
    pub fn states(&self) -> &Arc<ConversationStore> {
        &self.states
    }

    /// Running invocations
    #[must_use]
    pub fn cancels(&self) -> &Arc<CancellationRegistry> {
        &self.cancels
    }

    /// Chats the bot was removed from
    #[must_use]
    pub fn reachability(&self) -> &ChatReachability {
        &self.reachability
    }

    /// Publish the registered commands to the platform menu
    ///
    /// # Errors
    ///
    /// Returns the transport error if publishing failed.
    pub async fn publish_commands(&self) -> Result<(), TransportError> {
        let commands = self.handlers.commands();
        info!(count = commands.len(), "Publishing bot commands");
        self.transport.set_my_commands(&commands).await
    }

    /// Long-poll until the shutdown token is cancelled
    pub async fn run(&self) {
        let mut offset = 0_i64;
        info!("Dispatcher started");

        loop {
            let polled = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                polled = self.transport.get_updates(offset, self.poll_timeout, &ALLOWED_UPDATES) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.id + 1);
                        // Detached: the tasks outlive this iteration
                        drop(self.dispatch(update).await);
                    }
                }
                Err(e) if e.is_cancelled() => {
                    info!("Long poll cancelled");
                    break;
                }
                Err(e) => {
                    warn!("Failed to get updates: {e}, retrying in {:?}", self.poll_retry);
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.poll_retry) => {}
                    }
                }
            }
        }
        info!("Dispatcher stopped");
    }

    /// Route one update and launch whatever it resolves to
    pub async fn dispatch(&self, update: Update) -> Dispatched {
        let route = match update.kind {
            UpdateKind::Message(message) => self.route_message(&message),
            UpdateKind::Callback(query) => {
                if let Err(e) = self.transport.answer_callback_query(&query.id, None).await {
                    debug!("Failed to answer callback query: {e}");
                }
                self.route_callback(&query)
            }
            UpdateKind::Membership { chat_id, present } => {
                if present {
                    self.reachability.mark_reachable(chat_id).await;
                } else {
                    self.reachability.mark_unreachable(chat_id).await;
                }
                Route::Ignore("membership change")
            }
            UpdateKind::Other => Route::Ignore("unsupported update"),
        };

        match route {
            Route::Invoke(invocation) => Dispatched::Launched(self.launch(invocation).await),
            Route::Cancel(key) => Dispatched::Cancelled(self.cancels.cancel(&key)),
            Route::Ignore(reason) => {
                debug!(update_id = update.id, reason, "Update ignored");
                Dispatched::Ignored(reason)
            }
        }
    }

    /// Routing decision for a typed message
    #[must_use]
    pub fn route_message(&self, message: &Message) -> Route {
        let Some(from) = &message.from else {
            return Route::Ignore("message without sender");
        };
        let text = if let Some(user_id) = message.shared_user {
            user_id.to_string()
        } else if let Some(name) = message.attachment.as_ref().and_then(|a| a.file_name.clone()) {
            name
        } else {
            message.text.clone()
        };

        self.route_text(
            &text,
            origin(from, message),
            Trigger::Message,
            message.attachment.clone(),
            Rendered::origin(message.id, message.html.clone(), false),
        )
    }

    /// Routing decision for a button press
    #[must_use]
    pub fn route_callback(&self, query: &CallbackQuery) -> Route {
        let Some(message) = &query.message else {
            return Route::Ignore("callback without message");
        };
        // Only the user mentioned first on the message may drive it in shared chats
        if !message.chat.is_private && message.mention_owner != Some(query.from.id) {
            return Route::Ignore("callback from non-owner");
        }

        self.route_text(
            &query.data,
            origin(&query.from, message),
            Trigger::Callback,
            None,
            Rendered::origin(message.id, message.html.clone(), message.has_inline_keyboard),
        )
    }

    fn route_text(
        &self,
        raw: &str,
        origin: Origin,
        trigger: Trigger,
        attachment: Option<Attachment>,
        previous: Rendered,
    ) -> Route {
        let text = strip_bot_mention(raw, self.bot_username.as_deref());

        let continuation = if text.starts_with(COMMAND_SIGIL) {
            match self.handlers.resolve(&text) {
                Some(handler) => handler.entry.clone(),
                None => return Route::Ignore("unknown command"),
            }
        } else if let Some(token) = parse_cancel(&text) {
            return Route::Cancel((origin.user_id, token.to_string()));
        } else {
            match self.states.get(origin.user_id) {
                Some(continuation) => continuation,
                None => return Route::Ignore("no active conversation"),
            }
        };

        Route::Invoke(Invocation {
            continuation,
            trigger,
            origin,
            text,
            attachment,
            previous,
        })
    }

    /// Start the continuation and its renderer
    pub async fn launch(&self, invocation: Invocation) -> Launched {
        let file_url = match &invocation.attachment {
            Some(attachment) => match self.transport.get_file_url(&attachment.file_id).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(file_id = %attachment.file_id, "Failed to resolve file URL: {e}");
                    None
                }
            },
            None => None,
        };

        let token = new_token();
        let ctx = self.shutdown.child_token();
        let registration = self
            .cancels
            .guard((invocation.origin.user_id, token.clone()), ctx.clone());
        let (results, stream) = mpsc::channel(RESULT_BUFFER);

        let mut payload = Payload::new(
            invocation.origin.clone(),
            invocation.text,
            token.clone(),
            invocation.trigger,
            results,
        );
        payload.file_url = file_url;

        let job = RenderJob {
            origin: invocation.origin,
            trigger: invocation.trigger,
            token: token.clone(),
            previous: invocation.previous,
        };
        let renderer = tokio::spawn(Arc::clone(&self.renderer).render(job, stream));

        let span = info_span!(
            "invocation",
            token = %token,
            user_id = payload.user_id,
            chat_id = payload.chat_id,
        );
        let continuation = invocation.continuation;
        let handler = tokio::spawn(
            async move {
                let _registration = registration;
                debug!("Invocation started");
                continuation.run(ctx, payload).await;
                debug!("Invocation finished");
            }
            .instrument(span),
        );

        Launched {
            token,
            handler,
            renderer,
        }
    }
}

fn origin(from: &User, message: &Message) -> Origin {
    Origin {
        user_id: from.id,
        user_name: from.display_name().to_string(),
        chat_id: message.chat.id,
        is_private: message.chat.is_private,
    }
}
