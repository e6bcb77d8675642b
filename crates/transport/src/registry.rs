use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatcher::DynDispatcher;

/// A registry mapping dispatcher names to their implementations.
///
/// Delivery is fan-out, not load-balancing: every registered dispatcher
/// receives every delivered payload. The registry is built at startup by
/// whatever assembles the SDK instance; there is no runtime discovery by
/// string name.
#[derive(Default)]
pub struct DispatcherRegistry {
    dispatchers: HashMap<String, Arc<dyn DynDispatcher>>,
}

impl DispatcherRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatchers: HashMap::new(),
        }
    }

    /// Register a dispatcher under its [`DynDispatcher::name`]. An existing
    /// dispatcher with the same name is replaced.
    pub fn register(&mut self, dispatcher: Arc<dyn DynDispatcher>) {
        let name = dispatcher.name().to_owned();
        self.dispatchers.insert(name, dispatcher);
    }

    /// Look up a dispatcher by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn DynDispatcher>> {
        self.dispatchers.get(name).cloned()
    }

    /// All registered dispatchers, in name order for deterministic fan-out.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn DynDispatcher>> {
        let mut entries: Vec<_> = self.dispatchers.iter().collect();
        entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        entries.into_iter().map(|(_, d)| Arc::clone(d)).collect()
    }

    /// Whether any registered transport requires session bootstrapping.
    #[must_use]
    pub fn any_requires_session_bootstrap(&self) -> bool {
        self.dispatchers
            .values()
            .any(|d| d.requires_session_bootstrap())
    }

    /// Number of registered dispatchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    /// Return `true` if no dispatchers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }
}

impl std::fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherRegistry")
            .field("names", &self.dispatchers.keys().collect::<Vec<_>>())
            .finish()
    }
}
