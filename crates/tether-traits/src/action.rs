//! Callback registries used for transport notifications.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A registered notification handler.
pub type Handler<T> = Box<dyn Fn(&T) + Send + Sync + 'static>;

/// A list of handlers that can be fired any number of times.
///
/// Handlers run outside the internal lock, so a handler may register further
/// handlers or fire other registries.
pub struct Actions<T> {
    handlers: Mutex<Vec<Arc<dyn Fn(&T) + Send + Sync + 'static>>>,
}

impl<T> Actions<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a handler.
    pub fn add(&self, handler: Handler<T>) {
        self.handlers.lock().push(Arc::from(handler));
    }

    /// Invokes every registered handler with `value`.
    pub fn fire(&self, value: &T) {
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(value);
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Actions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Actions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actions")
            .field("handlers", &self.len())
            .finish()
    }
}

/// A one-shot signal with memory.
///
/// The first [`fire`](Self::fire) wins; later calls are ignored. Handlers
/// registered after the signal fired are invoked immediately with the
/// remembered value.
pub struct OnceActions<T> {
    state: Mutex<OnceState<T>>,
}

struct OnceState<T> {
    fired: Option<T>,
    handlers: Vec<Handler<T>>,
}

impl<T: Clone> OnceActions<T> {
    /// Creates an unfired signal.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OnceState {
                fired: None,
                handlers: Vec::new(),
            }),
        }
    }

    /// Registers a handler, invoking it right away if the signal already fired.
    pub fn add(&self, handler: Handler<T>) {
        let mut state = self.state.lock();
        match state.fired.clone() {
            Some(value) => {
                drop(state);
                handler(&value);
            }
            None => state.handlers.push(handler),
        }
    }

    /// Fires the signal. Returns `false` if it had already fired.
    pub fn fire(&self, value: T) -> bool {
        let handlers = {
            let mut state = self.state.lock();
            if state.fired.is_some() {
                return false;
            }
            state.fired = Some(value.clone());
            std::mem::take(&mut state.handlers)
        };
        for handler in handlers {
            handler(&value);
        }
        true
    }

    /// Returns `true` once the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.state.lock().fired.is_some()
    }
}

impl<T: Clone> Default for OnceActions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for OnceActions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OnceActions")
            .field("fired", &state.fired.is_some())
            .field("handlers", &state.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_actions_fire_all_handlers() {
        let actions = Actions::<String>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            actions.add(Box::new(move |value: &String| {
                assert_eq!(value, "ping");
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        actions.fire(&"ping".to_string());
        actions.fire(&"ping".to_string());
        assert_eq!(hits.load(Ordering::SeqCst), 6);
        assert_eq!(actions.len(), 3);
    }

    #[test]
    fn test_handler_may_register_during_fire() {
        let actions = Arc::new(Actions::<()>::new());
        let inner = actions.clone();
        actions.add(Box::new(move |_: &()| inner.add(Box::new(|_: &()| {}))));

        actions.fire(&());
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_once_actions_fire_only_once() {
        let signal = OnceActions::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        signal.add(Box::new(move |_: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(signal.fire(()));
        assert!(!signal.fire(()));
        assert!(signal.is_fired());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_actions_remember_value() {
        let signal = OnceActions::<u32>::new();
        signal.fire(7);

        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        signal.add(Box::new(move |value: &u32| {
            sink.store(*value as usize, Ordering::SeqCst);
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
