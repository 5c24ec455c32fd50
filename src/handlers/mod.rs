//! Built-in command handlers

pub mod heavy;
pub mod help;
pub mod ping;

use crate::dispatch::{AdmissionQueue, HandlerRegistry};
use std::sync::Arc;

/// Register every built-in handler. `/help` goes last so it can list the rest.
pub fn register_builtin(registry: &mut HandlerRegistry, queue: Arc<AdmissionQueue>) {
    registry.register(ping::handler());
    registry.register(heavy::handler(queue));
    let help = help::handler(registry);
    registry.register(help);
}
