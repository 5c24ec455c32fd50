//! Conversational dispatch core
//!
//! Routes inbound events to handlers or active conversations, runs each
//! invocation concurrently, and reconciles its result stream into chat
//! messages.

pub mod cancel;
pub mod dispatcher;
pub mod queue;
pub mod reachability;
pub mod registry;
pub mod renderer;
pub mod state;
pub mod types;

pub use cancel::{CancellationRegistry, CANCEL_SIGIL};
pub use dispatcher::{Dispatched, Dispatcher, Launched, Route};
pub use queue::{AdmissionQueue, Ticket, QUEUE_FULL_MESSAGE};
pub use reachability::ChatReachability;
pub use registry::{Handler, HandlerRegistry};
pub use renderer::{ordered_media, Renderer};
pub use state::ConversationStore;
pub use types::{
    Context, Continuation, InlineButton, InlineKeyboard, Markup, Media, MediaKind, MediaSource,
    Origin, Payload, Reply, ReplyKeyboard, StateChange, Step, Trigger,
};
