//! Listener for the events the server itself consumes.

use super::Listener;
use crate::error::{HandlerError, HandlerResult, ServerError};
use crate::facade::ServerHandle;
use serde_json::{Map, Value};

const ON_IDENTIFY: &str = "onIdentify";
const ON_CURRENT: &str = "onCurrent";

/// Always registered first. Handles `identify` and `current`.
#[derive(Debug, Default)]
pub struct CoreListener;

impl CoreListener {
    fn on_identify(data: &Value, server: &mut ServerHandle<'_>) -> HandlerResult {
        let identifier = match data.get("identifier") {
            Some(Value::String(identifier)) if !identifier.is_empty() => identifier.as_str(),
            _ => {
                return Err(HandlerError::Server(ServerError::MalformedMessage(
                    "identify requires a non-empty string \"identifier\"".to_string(),
                )))
            }
        };

        let context = match data.get("context") {
            Some(context) if !context.is_null() => context.clone(),
            _ => Value::Object(Map::new()),
        };

        server.identify(identifier, &context)?;
        Ok(())
    }
}

impl Listener for CoreListener {
    fn name(&self) -> &str {
        "server"
    }

    fn selectors(&self) -> Vec<String> {
        vec![ON_IDENTIFY.to_string(), ON_CURRENT.to_string()]
    }

    fn handle(
        &mut self,
        selector: &str,
        data: &Value,
        server: &mut ServerHandle<'_>,
    ) -> HandlerResult {
        match selector {
            ON_IDENTIFY => Self::on_identify(data, server),
            ON_CURRENT => Ok(server.set_active()?),
            _ => Ok(()),
        }
    }
}
