//! Lifecycle callbacks.
//!
//! A callback is declared either as a closure or as the name of a method in
//! the model's method table. Names are resolved once, when the model is
//! registered, so a typo fails at definition time rather than on first save.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{StorageResult, ValidationError};
use crate::types::Record;

/// A hook that may inspect or rewrite a record.
pub type RecordHook = Arc<dyn Fn(&mut Record) -> StorageResult<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackEvent {
    BeforeSave,
    AfterSave,
    BeforeCreate,
    AfterCreate,
}

/// A callback as declared.
#[derive(Clone)]
pub enum Callback {
    Invoke(RecordHook),
    Method(String),
}

impl Callback {
    pub fn invoke<F>(f: F) -> Self
    where
        F: Fn(&mut Record) -> StorageResult<()> + Send + Sync + 'static,
    {
        Callback::Invoke(Arc::new(f))
    }

    pub fn method(name: impl Into<String>) -> Self {
        Callback::Method(name.into())
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Invoke(_) => f.write_str("Invoke(..)"),
            Callback::Method(name) => f.debug_tuple("Method").field(name).finish(),
        }
    }
}

/// Declared callbacks plus the method table they resolve against.
#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    declared: Vec<(CallbackEvent, Callback)>,
    methods: HashMap<String, RecordHook>,
    resolved: HashMap<CallbackEvent, Vec<RecordHook>>,
}

impl Callbacks {
    pub(crate) fn declare(&mut self, event: CallbackEvent, callback: Callback) {
        self.declared.push((event, callback));
    }

    pub(crate) fn define_method(&mut self, name: String, hook: RecordHook) {
        self.methods.insert(name, hook);
    }

    /// Binds every declared callback to a callable.
    pub(crate) fn resolve(&mut self) -> Result<(), ValidationError> {
        let mut resolved: HashMap<CallbackEvent, Vec<RecordHook>> = HashMap::new();
        for (event, callback) in &self.declared {
            let hook = match callback {
                Callback::Invoke(hook) => hook.clone(),
                Callback::Method(name) => self
                    .methods
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ValidationError::UnresolvedCallback(name.clone()))?,
            };
            resolved.entry(*event).or_default().push(hook);
        }
        self.resolved = resolved;
        Ok(())
    }

    /// Runs the resolved hooks for `event` in declaration order.
    pub(crate) fn run(&self, event: CallbackEvent, record: &mut Record) -> StorageResult<()> {
        if let Some(hooks) = self.resolved.get(&event) {
            for hook in hooks {
                hook(record)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("declared", &self.declared)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_callbacks_resolve_against_table() {
        let mut callbacks = Callbacks::default();
        callbacks.define_method(
            "stamp".to_string(),
            Arc::new(|record: &mut Record| {
                record.insert("stamped".to_string(), json!(true));
                Ok(())
            }),
        );
        callbacks.declare(CallbackEvent::BeforeSave, Callback::method("stamp"));
        callbacks.declare(
            CallbackEvent::BeforeSave,
            Callback::invoke(|record| {
                record.insert("count".to_string(), json!(1));
                Ok(())
            }),
        );
        callbacks.resolve().unwrap();

        let mut record = Record::new();
        callbacks.run(CallbackEvent::BeforeSave, &mut record).unwrap();
        assert_eq!(record.get("stamped"), Some(&json!(true)));
        assert_eq!(record.get("count"), Some(&json!(1)));

        let mut untouched = Record::new();
        callbacks.run(CallbackEvent::AfterSave, &mut untouched).unwrap();
        assert!(untouched.is_empty());
    }

    #[test]
    fn test_unknown_method_fails_at_resolution() {
        let mut callbacks = Callbacks::default();
        callbacks.declare(CallbackEvent::AfterCreate, Callback::method("missing"));
        let err = callbacks.resolve().unwrap_err();
        assert_eq!(err, ValidationError::UnresolvedCallback("missing".to_string()));
    }
}
