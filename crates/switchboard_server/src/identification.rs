//! Pluggable identification decision.

use serde_json::Value;

/// Decides whether a connection may claim an identifier.
///
/// Called from the dispatch loop while an `identify` event is being handled,
/// so implementations must not block.
pub trait IdentificationAdapter: Send + Sync {
    /// Returns `true` to accept `identifier` for the calling connection.
    /// `context` is the optional `context` object sent with the request, or
    /// an empty object.
    fn identify(&self, identifier: &str, context: &Value) -> bool;
}

impl<F> IdentificationAdapter for F
where
    F: Fn(&str, &Value) -> bool + Send + Sync,
{
    fn identify(&self, identifier: &str, context: &Value) -> bool {
        self(identifier, context)
    }
}
