//! Listener providers and the named listener catalog.
//!
//! Configuration refers to listeners either by name, through a factory, or
//! as ready-made instances. Every form is resolved into a concrete
//! [`Listener`] before the server starts serving; a provider that cannot be
//! resolved is an [`ServerError::InvalidListener`].

use super::Listener;
use crate::error::ServerError;
use std::collections::BTreeMap;
use std::fmt;

/// Builds a fresh listener instance.
pub type ListenerFactory = Box<dyn Fn() -> Box<dyn Listener> + Send + Sync>;

/// One entry in the configured listener list.
pub enum ListenerProvider {
    /// Constructed on resolution.
    Factory(ListenerFactory),
    /// Used as is.
    Instance(Box<dyn Listener>),
    /// Looked up in a [`ListenerCatalog`].
    Named(String),
}

impl ListenerProvider {
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn Listener> + Send + Sync + 'static,
    {
        ListenerProvider::Factory(Box::new(factory))
    }

    pub fn instance<L: Listener + 'static>(listener: L) -> Self {
        ListenerProvider::Instance(Box::new(listener))
    }

    pub fn named(name: impl Into<String>) -> Self {
        ListenerProvider::Named(name.into())
    }

    pub fn resolve(self, catalog: &ListenerCatalog) -> Result<Box<dyn Listener>, ServerError> {
        match self {
            ListenerProvider::Factory(factory) => Ok(factory()),
            ListenerProvider::Instance(listener) => Ok(listener),
            ListenerProvider::Named(name) => catalog.resolve(&name),
        }
    }
}

impl fmt::Debug for ListenerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerProvider::Factory(_) => f.write_str("Factory(..)"),
            ListenerProvider::Instance(listener) => write!(f, "Instance({})", listener.name()),
            ListenerProvider::Named(name) => write!(f, "Named({name})"),
        }
    }
}

/// Listener factories addressable by name.
#[derive(Default)]
pub struct ListenerCatalog {
    factories: BTreeMap<String, ListenerFactory>,
}

impl ListenerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Listener> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn resolve(&self, name: &str) -> Result<Box<dyn Listener>, ServerError> {
        let factory = self.factories.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.names().collect();
            ServerError::InvalidListener(format!(
                "\"{name}\" is not a known listener (available: {})",
                known.join(", ")
            ))
        })?;
        Ok(factory())
    }
}

impl fmt::Debug for ListenerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FnListener;

    fn catalog() -> ListenerCatalog {
        let mut catalog = ListenerCatalog::new();
        catalog.register("ping", || Box::new(FnListener::new("ping").on("ping", |_, _| Ok(()))));
        catalog
    }

    #[test]
    fn test_resolve_named_listener() {
        let listener = ListenerProvider::named("ping").resolve(&catalog()).unwrap();
        assert_eq!(listener.name(), "ping");
        assert_eq!(listener.selectors(), vec!["onPing"]);
    }

    #[test]
    fn test_unknown_name_is_invalid_listener() {
        let Err(err) = ListenerProvider::named("nope").resolve(&catalog()) else {
            panic!("unknown listener name resolved");
        };
        assert!(matches!(err, ServerError::InvalidListener(_)));
        assert!(err.to_string().contains("ping"));
    }

    #[test]
    fn test_factory_and_instance_resolve_without_catalog_entries() {
        let empty = ListenerCatalog::new();
        let from_factory = ListenerProvider::factory(|| Box::new(FnListener::new("made")))
            .resolve(&empty)
            .unwrap();
        let from_instance = ListenerProvider::instance(FnListener::new("given"))
            .resolve(&empty)
            .unwrap();
        assert_eq!(from_factory.name(), "made");
        assert_eq!(from_instance.name(), "given");
    }
}
