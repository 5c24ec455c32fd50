//! Handler registry: command prefix → handler.
//!
//! Populated once before the dispatcher starts and shared read-only afterwards.

use super::types::Continuation;
use crate::transport::CommandInfo;
use std::collections::HashMap;
use tracing::{info, warn};

/// Leading character of every command
pub const COMMAND_SIGIL: char = '/';

/// A named command with its entry-point continuation
#[derive(Debug, Clone)]
pub struct Handler {
    /// Command token including the sigil, e.g. `/ping`
    pub prefix: String,
    /// Shown in the platform's command menu
    pub description: String,
    /// Entry point
    pub entry: Continuation,
}

impl Handler {
    /// Build a handler; the sigil is added to `prefix` when missing
    pub fn new(
        prefix: impl Into<String>,
        description: impl Into<String>,
        entry: Continuation,
    ) -> Self {
        let prefix = prefix.into();
        let prefix = if prefix.starts_with(COMMAND_SIGIL) {
            prefix
        } else {
            format!("{COMMAND_SIGIL}{prefix}")
        };
        Self {
            prefix,
            description: description.into(),
            entry,
        }
    }

    /// Metadata published with `setMyCommands`
    #[must_use]
    pub fn info(&self) -> CommandInfo {
        CommandInfo {
            command: self.prefix.trim_start_matches(COMMAND_SIGIL).to_string(),
            description: self.description.clone(),
        }
    }
}

/// Table of registered handlers
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handler under its prefix; a later registration wins
    pub fn register(&mut self, handler: Handler) -> CommandInfo {
        let info = handler.info();
        if self
            .handlers
            .insert(handler.prefix.clone(), handler)
            .is_some()
        {
            warn!(command = %info.command, "Handler re-registered, previous one replaced");
        } else {
            info!(command = %info.command, "Handler registered");
        }
        info
    }

    /// Exact match of the first whitespace-delimited token against a prefix
    #[must_use]
    pub fn resolve(&self, text: &str) -> Option<&Handler> {
        if !text.starts_with(COMMAND_SIGIL) {
            return None;
        }
        let token = text.split(' ').next().unwrap_or(text);
        self.handlers.get(token)
    }

    /// Command metadata for every handler, sorted by command
    #[must_use]
    pub fn commands(&self) -> Vec<CommandInfo> {
        let mut commands: Vec<CommandInfo> = self.handlers.values().map(Handler::info).collect();
        commands.sort_by(|a, b| a.command.cmp(&b.command));
        commands
    }

    /// Number of registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
