//! Listeners and identification adapters shipped with the binary.
//!
//! Configuration refers to them by name: `listeners.enabled` picks entries
//! from [`builtin_catalog`], `listeners.identification` is resolved with
//! [`resolve_identification`].

use serde_json::{json, Value};
use std::sync::Arc;
use switchboard_server::{
    HandlerError, HandlerResult, IdentificationAdapter, Listener, ListenerCatalog, ListenerProvider,
    ServerError, ServerHandle,
};

/// Replies to `echo` with the same payload.
#[derive(Debug, Default)]
pub struct EchoListener;

impl Listener for EchoListener {
    fn name(&self) -> &str {
        "echo"
    }

    fn selectors(&self) -> Vec<String> {
        vec!["onEcho".to_string()]
    }

    fn handle(
        &mut self,
        _selector: &str,
        data: &Value,
        server: &mut ServerHandle<'_>,
    ) -> HandlerResult {
        server.reply("echo", data)?;
        Ok(())
    }
}

/// Minimal chat room: `chat.message` goes to everybody else,
/// `chat.whisper` to one named client.
#[derive(Debug, Default)]
pub struct ChatListener;

impl ChatListener {
    fn text(data: &Value) -> Result<&str, HandlerError> {
        data.get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServerError::MalformedMessage("chat payload needs a string \"text\"".to_string())
                    .into()
            })
    }

    fn on_message(data: &Value, server: &mut ServerHandle<'_>) -> HandlerResult {
        let text = Self::text(data)?;
        let from = server.current_client()?.identifier().to_string();
        server.broadcast_others("chat.message", &json!({ "from": from, "text": text }), &[])?;
        Ok(())
    }

    fn on_whisper(data: &Value, server: &mut ServerHandle<'_>) -> HandlerResult {
        let text = Self::text(data)?;
        let to = data
            .get("to")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServerError::MalformedMessage("whisper needs a string \"to\"".to_string())
            })?;
        let from = server.current_client()?.identifier().to_string();

        let payload = json!({ "from": from, "text": text });
        let delivered = server.send_to(to, "chat.whisper", &payload, false)?;
        if !delivered {
            server.reply("chat.undeliverable", &json!({ "to": to }))?;
        }
        Ok(())
    }
}

impl Listener for ChatListener {
    fn name(&self) -> &str {
        "chat"
    }

    fn selectors(&self) -> Vec<String> {
        vec!["onChatMessage".to_string(), "onChatWhisper".to_string()]
    }

    fn handle(
        &mut self,
        selector: &str,
        data: &Value,
        server: &mut ServerHandle<'_>,
    ) -> HandlerResult {
        match selector {
            "onChatMessage" => Self::on_message(data, server),
            "onChatWhisper" => Self::on_whisper(data, server),
            _ => Ok(()),
        }
    }
}

/// Accepts every identification request.
#[derive(Debug, Default)]
pub struct AllowAll;

impl IdentificationAdapter for AllowAll {
    fn identify(&self, _identifier: &str, _context: &Value) -> bool {
        true
    }
}

/// Refuses every identification request.
#[derive(Debug, Default)]
pub struct DenyAll;

impl IdentificationAdapter for DenyAll {
    fn identify(&self, _identifier: &str, _context: &Value) -> bool {
        false
    }
}

pub fn builtin_catalog() -> ListenerCatalog {
    let mut catalog = ListenerCatalog::new();
    catalog
        .register("echo", || Box::new(EchoListener))
        .register("chat", || Box::new(ChatListener));
    catalog
}

/// Turns configured listener names into providers, preserving order.
pub fn providers_for(names: &[String]) -> Vec<ListenerProvider> {
    names.iter().map(ListenerProvider::named).collect()
}

pub fn resolve_identification(name: &str) -> Result<Arc<dyn IdentificationAdapter>, ServerError> {
    match name {
        "allow-all" => Ok(Arc::new(AllowAll)),
        "deny-all" => Ok(Arc::new(DenyAll)),
        other => Err(ServerError::Config(format!(
            "Unknown identification adapter \"{other}\". Available: allow-all, deny-all"
        ))),
    }
}
