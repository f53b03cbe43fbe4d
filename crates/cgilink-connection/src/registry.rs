use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::error::{ConnectionError, Result};
use crate::handler::Handler;

/// Callback for one notification type.
pub type Listener = Arc<dyn Fn(Value) + Send + Sync + 'static>;

/// Request handlers keyed by message type. At most one per type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `msg_type`.
    ///
    /// A second registration for the same type is rejected and the first
    /// handler stays in place.
    pub fn register(&self, msg_type: &str, handler: Arc<dyn Handler>) -> Result<()> {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(msg_type) {
            return Err(ConnectionError::HandlerAlreadyRegistered(
                msg_type.to_string(),
            ));
        }
        handlers.insert(msg_type.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, msg_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(msg_type)
            .cloned()
    }

    pub fn contains(&self, msg_type: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(msg_type)
    }

    /// Registered message types, sorted.
    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_types", &self.message_types())
            .finish()
    }
}

/// Notification listeners keyed by message type, kept in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, msg_type: &str, listener: Listener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(msg_type.to_string())
            .or_default()
            .push(listener);
    }

    /// Snapshot of the listeners for `msg_type`; the lock is not held while
    /// they run.
    pub fn listeners_for(&self, msg_type: &str) -> Vec<Listener> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(msg_type)
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_map()
            .entries(listeners.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::handler::HandlerError;

    fn echo() -> Arc<dyn Handler> {
        Arc::new(|payload: Value| async move { Ok::<_, HandlerError>(payload) })
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = HandlerRegistry::new();
        registry.register("ping", echo()).unwrap();

        let err = registry.register("ping", echo()).unwrap_err();
        assert!(matches!(err, ConnectionError::HandlerAlreadyRegistered(t) if t == "ping"));
        assert!(registry.contains("ping"));
        assert_eq!(registry.message_types(), vec!["ping".to_string()]);
    }

    #[test]
    fn missing_handler_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("analyzeSolution").is_none());
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            registry.add(
                "onDataUpdate",
                Arc::new(move |_payload: Value| seen.lock().unwrap().push(tag)),
            );
        }

        for listener in registry.listeners_for("onDataUpdate") {
            listener(Value::Null);
        }
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert!(registry.listeners_for("other").is_empty());
    }
}
