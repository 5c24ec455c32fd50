//! `/ping`: the smallest possible conversation
//!
//! `/ping` answers right away; `/ping me` asks for a name and greets it on
//! the next message.

use crate::dispatch::{Continuation, Handler, Payload, Reply};

/// Command prefix
pub const PREFIX: &str = "/ping";

/// `/ping` handler
#[must_use]
pub fn handler() -> Handler {
    Handler::new(PREFIX, "Check that the bot is alive", entry())
}

fn entry() -> Continuation {
    Continuation::from_fn(|_ctx, payload: Payload| async move {
        let reply = if payload.args() == "me" {
            Reply::text("What is your name?").then(greet())
        } else {
            Reply::text("pong!")
        };
        payload.send(reply).await;
    })
}

fn greet() -> Continuation {
    Continuation::from_fn(|_ctx, payload: Payload| async move {
        let name = payload.text.trim();
        let name = if name.is_empty() {
            payload.user_name.as_str()
        } else {
            name
        };
        let text = format!("Pong to {}!", html_escape::encode_text(name));
        payload.send(Reply::text(text).clear_state()).await;
    })
}
