//! Event dispatch by naming convention.
//!
//! An incoming event name is turned into a selector (`chat.message` becomes
//! `onChatMessage`) and handed to every registered [`Listener`] that
//! declares that selector. Listeners declare their selectors once, at
//! registration, and the [`Dispatcher`] builds a lookup table from them.

pub mod builtin;
pub mod dispatcher;
pub mod provider;

pub use builtin::CoreListener;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use provider::{ListenerCatalog, ListenerFactory, ListenerProvider};

use crate::error::HandlerResult;
use crate::facade::ServerHandle;
use serde_json::Value;
use std::collections::HashMap;

/// Converts an event name into its handler selector.
///
/// The name is split on `.`, `_` and `-`, each segment gets an upper-case
/// first character, and the result is prefixed with `on`. Empty segments are
/// skipped.
///
/// ```
/// use switchboard_server::selector_for;
///
/// assert_eq!(selector_for("chat.message"), "onChatMessage");
/// assert_eq!(selector_for("user.went-offline"), "onUserWentOffline");
/// ```
pub fn selector_for(event: &str) -> String {
    let mut selector = String::with_capacity(event.len() + 2);
    selector.push_str("on");
    for segment in event.split(['.', '_', '-']).filter(|s| !s.is_empty()) {
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            selector.extend(first.to_uppercase());
            selector.push_str(chars.as_str());
        }
    }
    selector
}

/// An object that reacts to events.
///
/// `selectors` is read once when the listener is registered; `handle` is
/// then called with each matching selector.
pub trait Listener: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Selectors this listener responds to, e.g. `onChatMessage`.
    fn selectors(&self) -> Vec<String>;

    /// Handles one event routed to `selector`.
    fn handle(
        &mut self,
        selector: &str,
        data: &Value,
        server: &mut ServerHandle<'_>,
    ) -> HandlerResult;
}

type Callback = Box<dyn FnMut(&Value, &mut ServerHandle<'_>) -> HandlerResult + Send>;

/// A listener assembled from closures, one per event name.
///
/// ```
/// use switchboard_server::FnListener;
///
/// let listener = FnListener::new("ping").on("ping", |data, server| {
///     server.reply("pong", data)?;
///     Ok(())
/// });
/// ```
pub struct FnListener {
    name: String,
    callbacks: HashMap<String, Callback>,
}

impl FnListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            callbacks: HashMap::new(),
        }
    }

    /// Registers `callback` for `event`, replacing any earlier callback for
    /// the same selector.
    pub fn on<F>(mut self, event: &str, callback: F) -> Self
    where
        F: FnMut(&Value, &mut ServerHandle<'_>) -> HandlerResult + Send + 'static,
    {
        self.callbacks.insert(selector_for(event), Box::new(callback));
        self
    }
}

impl Listener for FnListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn selectors(&self) -> Vec<String> {
        self.callbacks.keys().cloned().collect()
    }

    fn handle(
        &mut self,
        selector: &str,
        data: &Value,
        server: &mut ServerHandle<'_>,
    ) -> HandlerResult {
        match self.callbacks.get_mut(selector) {
            Some(callback) => callback(data, server),
            None => Ok(()),
        }
    }
}
