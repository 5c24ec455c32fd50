//! `/help`: list of available commands

use crate::dispatch::{Continuation, Handler, HandlerRegistry, Payload, Reply};
use std::fmt::Write;

/// Command prefix
pub const PREFIX: &str = "/help";

/// Render the command list shown by `/help`
#[must_use]
pub fn help_text(registry: &HandlerRegistry) -> String {
    let mut text = String::from("<b>Available commands</b>\n");
    for command in registry.commands() {
        let _ = write!(
            text,
            "\n/{} - {}",
            command.command,
            html_escape::encode_text(&command.description)
        );
    }
    let _ = write!(text, "\n{PREFIX} - Show this message");
    text
}

/// Handler listing everything registered in `registry` so far
#[must_use]
pub fn handler(registry: &HandlerRegistry) -> Handler {
    let text = help_text(registry);
    Handler::new(
        PREFIX,
        "Show this message",
        Continuation::from_fn(move |_ctx, payload: Payload| {
            let text = text.clone();
            async move {
                payload.send(Reply::text(text).remove_keyboard()).await;
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_commands_with_escaped_descriptions() {
        let mut registry = HandlerRegistry::new();
        registry.register(Handler::new(
            "/cars",
            "Cars <beta>",
            Continuation::from_fn(|_, _| async {}),
        ));

        let text = help_text(&registry);
        assert!(text.contains("/cars - Cars &lt;beta&gt;"));
        assert!(text.ends_with("/help - Show this message"));
    }
}
