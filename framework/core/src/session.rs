use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-iteration state shared by every step executed during that iteration.
///
/// A session is created fresh for every iteration and never shared across
/// iterations or runners, so it needs no synchronisation. The custom values
/// come from the `custom:` section of the configuration file and are injected
/// by the scheduler before the iteration starts.
pub struct Session {
    values: HashMap<String, Box<dyn Any + Send>>,
    custom: Arc<HashMap<String, serde_yaml::Value>>,
}

impl Session {
    pub fn new(custom: Arc<HashMap<String, serde_yaml::Value>>) -> Self {
        Self {
            values: HashMap::new(),
            custom,
        }
    }

    pub fn put<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Typed read of a value stored by an earlier step of the same iteration.
    /// Returns `None` when the key is absent or holds a different type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref())
    }

    /// Read-only configuration value from the config file's `custom:` map.
    pub fn custom(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.custom.get(key)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("custom_keys", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}
