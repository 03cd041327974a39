//! Diagnostics
//!
//! Values of the host that outlive a boot (such as the reboot counter) or that are shown to an
//! operator (such as the host counters) are exposed through configuration handlers. A handler owns
//! the values under its name, the [`ConfRegistry`] routes names of the form `"<handler>/<key>"`
//! to the handler and persists values through a [`ConfStore`].

pub mod log;
pub mod reboot;

use crate::Error;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// The purpose of an export
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportTarget {
    /// Values are shown to an operator
    Show,
    /// Values are written to the store
    Persist,
}

/// The owner of the values under one name
pub trait ConfHandler {
    /// The name the handler is registered under
    fn name(&self) -> &str;

    /// Get the value of `key`
    fn get(&self, key: &str) -> Option<String>;

    /// Set the value of `key`
    fn set(&mut self, key: &str, value: &str) -> Result<(), Error>;

    /// Call `sink` with the full name and the value of every exported key
    fn export(&self, target: ExportTarget, sink: &mut dyn FnMut(&str, &str));
}

/// Storage of configuration values
pub trait ConfStore {
    fn save(&mut self, name: &str, value: &str) -> Result<(), Error>;

    /// Every stored name and value
    fn load(&self) -> Vec<(String, String)>;
}

/// A `ConfStore` that keeps values in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

impl ConfStore for MemoryStore {
    fn save(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.values.insert(name.to_string(), value.to_string());

        Ok(())
    }

    fn load(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

fn split_name(name: &str) -> Result<(&str, &str), Error> {
    match name.split_once('/') {
        Some((handler, key)) if !handler.is_empty() && !key.is_empty() => Ok((handler, key)),
        _ => Err(Error::InvalidParameter("configuration names are of the form <handler>/<key>")),
    }
}

/// The registered configuration handlers
pub struct ConfRegistry {
    handlers: Vec<Box<dyn ConfHandler>>,
    store: Box<dyn ConfStore>,
}

impl ConfRegistry {
    pub fn new<S: ConfStore + 'static>(store: S) -> Self {
        ConfRegistry {
            handlers: Vec::new(),
            store: Box::new(store),
        }
    }

    /// Register a handler
    ///
    /// # Error
    /// A handler with the same name is already registered
    pub fn register<H: ConfHandler + 'static>(&mut self, handler: H) -> Result<(), Error> {
        if self.handler(handler.name()).is_some() {
            return Err(Error::InvalidParameter("a handler with this name is already registered"));
        }

        ::log::debug!("registered configuration handler {}", handler.name());

        self.handlers.push(Box::new(handler));

        Ok(())
    }

    fn handler(&self, name: &str) -> Option<&dyn ConfHandler> {
        self.handlers.iter().find(|h| h.name() == name).map(|h| h.as_ref())
    }

    fn handler_mut(&mut self, name: &str) -> Option<&mut Box<dyn ConfHandler>> {
        self.handlers.iter_mut().find(|h| h.name() == name)
    }

    pub fn get(&self, name: &str) -> Result<Option<String>, Error> {
        let (handler, key) = split_name(name)?;

        Ok(self.handler(handler).and_then(|h| h.get(key)))
    }

    /// Set the value within the handler, the value is not persisted
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let (handler, key) = split_name(name)?;

        match self.handler_mut(handler) {
            Some(handler) => handler.set(key, value),
            None => Err(Error::InvalidParameter("no handler is registered under the name")),
        }
    }

    /// Persist a value, the handler's value is not changed
    pub fn save(&mut self, name: &str, value: &str) -> Result<(), Error> {
        split_name(name)?;

        self.store.save(name, value)
    }

    /// Every value of the store
    pub fn stored(&self) -> Vec<(String, String)> {
        self.store.load()
    }

    /// Set every stored value within its handler
    ///
    /// Values of handlers that are not registered are skipped.
    pub fn load(&mut self) -> Result<(), Error> {
        for (name, value) in self.store.load() {
            match self.set(&name, &value) {
                Ok(()) => (),
                Err(Error::InvalidParameter(reason)) => {
                    ::log::warn!("skipped stored value {}: {}", name, reason)
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Export the values of every handler
    pub fn export(&self, target: ExportTarget) -> Vec<(String, String)> {
        let mut exported = Vec::new();

        for handler in self.handlers.iter() {
            handler.export(target, &mut |name, value| {
                exported.push((name.to_string(), value.to_string()))
            });
        }

        exported
    }
}

/// The counters of the host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    ConnectionsEstablished,
    Disconnections,
    MalformedPdus,
    AttTimeouts,
    CommandTimeouts,
}

impl Counter {
    const ALL: [Counter; 5] = [
        Counter::ConnectionsEstablished,
        Counter::Disconnections,
        Counter::MalformedPdus,
        Counter::AttTimeouts,
        Counter::CommandTimeouts,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Counter::ConnectionsEstablished => "connections",
            Counter::Disconnections => "disconnections",
            Counter::MalformedPdus => "malformed_pdus",
            Counter::AttTimeouts => "att_timeouts",
            Counter::CommandTimeouts => "command_timeouts",
        }
    }

    fn index(&self) -> usize {
        match self {
            Counter::ConnectionsEstablished => 0,
            Counter::Disconnections => 1,
            Counter::MalformedPdus => 2,
            Counter::AttTimeouts => 3,
            Counter::CommandTimeouts => 4,
        }
    }
}

/// Counters shared between the host and its diagnostics
#[derive(Debug, Default)]
pub struct HostCounters {
    counts: [AtomicU32; 5],
}

impl HostCounters {
    pub fn increment(&self, counter: Counter) {
        self.counts[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u32 {
        self.counts[counter.index()].load(Ordering::Relaxed)
    }
}

/// The `ble_hs` handler, the host counters
///
/// The counters are read only and exported only to be shown.
pub struct CountersHandler {
    counters: Arc<HostCounters>,
}

impl CountersHandler {
    pub const NAME: &'static str = "ble_hs";

    pub fn new(counters: Arc<HostCounters>) -> Self {
        CountersHandler { counters }
    }
}

impl ConfHandler for CountersHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn get(&self, key: &str) -> Option<String> {
        Counter::ALL
            .iter()
            .find(|c| c.key() == key)
            .map(|c| self.counters.get(*c).to_string())
    }

    fn set(&mut self, _: &str, _: &str) -> Result<(), Error> {
        Err(Error::InvalidParameter("host counters are read only"))
    }

    fn export(&self, target: ExportTarget, sink: &mut dyn FnMut(&str, &str)) {
        if target == ExportTarget::Show {
            for counter in Counter::ALL.iter() {
                let name = format!("{}/{}", Self::NAME, counter.key());

                sink(&name, &self.counters.get(*counter).to_string())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_are_shown_not_persisted() {
        let counters = Arc::new(HostCounters::default());

        let mut registry = ConfRegistry::new(MemoryStore::new());

        registry.register(CountersHandler::new(counters.clone())).unwrap();

        counters.increment(Counter::MalformedPdus);
        counters.increment(Counter::MalformedPdus);

        assert_eq!(Ok(Some("2".to_string())), registry.get("ble_hs/malformed_pdus"));
        assert_eq!(Ok(None), registry.get("ble_hs/unknown"));
        assert!(registry.set("ble_hs/malformed_pdus", "0").is_err());

        let shown = registry.export(ExportTarget::Show);

        assert_eq!(5, shown.len());
        assert!(shown.contains(&("ble_hs/malformed_pdus".to_string(), "2".to_string())));
        assert!(registry.export(ExportTarget::Persist).is_empty());
    }

    #[test]
    fn names_are_checked() {
        let mut registry = ConfRegistry::new(MemoryStore::new());

        assert!(registry.get("no_key").is_err());
        assert!(registry.save("/key", "1").is_err());
        assert!(registry.set("missing/key", "1").is_err());
        assert_eq!(Ok(None), registry.get("missing/key"));
    }

    #[test]
    fn duplicate_handler() {
        let counters = Arc::new(HostCounters::default());

        let mut registry = ConfRegistry::new(MemoryStore::new());

        assert!(registry.register(CountersHandler::new(counters.clone())).is_ok());
        assert!(registry.register(CountersHandler::new(counters)).is_err());
    }
}
