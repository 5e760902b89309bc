//! Selector table and per-message dispatch.

use super::{selector_for, CoreListener, Listener, ListenerCatalog, ListenerProvider};
use crate::envelope::Envelope;
use crate::error::{HandlerError, ServerError};
use crate::facade::ServerHandle;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

/// Result of dispatching one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Selector the event name resolved to
    pub selector: String,
    /// Number of listeners invoked
    pub invoked: usize,
    /// Number of invocations that returned an error or panicked
    pub failed: usize,
}

impl DispatchOutcome {
    pub fn is_unmatched(&self) -> bool {
        self.invoked == 0
    }
}

/// Ordered listener list plus a selector lookup table.
///
/// The [`CoreListener`] is always first; application listeners follow in
/// registration order, and that is the order they are invoked in.
pub struct Dispatcher {
    listeners: Vec<Box<dyn Listener>>,
    table: HashMap<String, Vec<usize>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut dispatcher = Self {
            listeners: Vec::new(),
            table: HashMap::new(),
        };
        dispatcher.register(Box::new(CoreListener));
        dispatcher
    }

    /// Resolves every provider, in order, and registers the results.
    ///
    /// Fails on the first provider that cannot be resolved.
    pub fn from_providers(
        providers: Vec<ListenerProvider>,
        catalog: &ListenerCatalog,
    ) -> Result<Self, ServerError> {
        let mut dispatcher = Self::new();
        for provider in providers {
            dispatcher.register(provider.resolve(catalog)?);
        }
        Ok(dispatcher)
    }

    pub fn register(&mut self, listener: Box<dyn Listener>) {
        let index = self.listeners.len();
        let mut selectors = listener.selectors();
        selectors.sort();
        selectors.dedup();
        for selector in selectors {
            self.table.entry(selector).or_default().push(index);
        }
        debug!("Registered listener {}", listener.name());
        self.listeners.push(listener);
    }

    pub fn listener_names(&self) -> Vec<&str> {
        self.listeners.iter().map(|l| l.name()).collect()
    }

    pub fn handles(&self, event: &str) -> bool {
        self.table.contains_key(&selector_for(event))
    }

    /// Runs every listener registered for the envelope's event.
    ///
    /// A listener that fails or panics is logged; the remaining listeners
    /// still run.
    pub fn dispatch(
        &mut self,
        envelope: &Envelope,
        server: &mut ServerHandle<'_>,
    ) -> DispatchOutcome {
        let selector = selector_for(&envelope.event);
        debug!(event = %envelope.event, data = %envelope.data, "Dispatching event");

        let Some(indices) = self.table.get(&selector).cloned() else {
            debug!(event = %envelope.event, selector = %selector, "No handler matched event");
            return DispatchOutcome {
                selector,
                invoked: 0,
                failed: 0,
            };
        };

        let mut failed = 0;
        for &index in &indices {
            let listener = &mut self.listeners[index];
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                listener.handle(&selector, &envelope.data, server)
            }));

            match result {
                Ok(Ok(())) => debug!("ran {}::{}", listener.name(), selector),
                Ok(Err(e)) => {
                    failed += 1;
                    error!("Listener {}::{} failed: {}", listener.name(), selector, e);
                }
                Err(panic_info) => {
                    failed += 1;
                    error!(
                        "Listener {}::{} panicked: {}",
                        listener.name(),
                        selector,
                        panic_message(panic_info)
                    );
                }
            }
        }

        DispatchOutcome {
            selector,
            invoked: indices.len(),
            failed,
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic_info: Box<dyn std::any::Any + Send>) -> HandlerError {
    let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    HandlerError::Execution(message)
}
