//! External method registry
//!
//! Methods are registered on a mutable [`ExternalCatalog`] before a run starts.
//! The scheduler takes an immutable [`ExternalRegistry`] snapshot that every
//! instance task shares, so lookups during a run never contend on a lock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::{BoxError, ExternalInvocationError};
use super::instance::InstanceId;
use crate::definition::Value;

/// Callable invoked by `InvokeExternal` activities.
///
/// Receives the calling instance id and the evaluated arguments. Methods are
/// shared by all instances and must keep any state of their own thread-safe.
pub type ExternalMethod =
    Arc<dyn Fn(InstanceId, &[Value]) -> Result<Option<Value>, BoxError> + Send + Sync>;

/// Mutable catalog used while wiring up a runtime.
#[derive(Default)]
pub struct ExternalCatalog {
    methods: RwLock<HashMap<String, ExternalMethod>>,
}

impl ExternalCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method, replacing any previous one with the same name.
    pub fn register<F>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(InstanceId, &[Value]) -> Result<Option<Value>, BoxError> + Send + Sync + 'static,
    {
        let mut methods = self.methods.write();
        methods.insert(name.into(), Arc::new(method));
    }

    /// Register a method that never fails and always returns a value.
    pub fn register_fn<F>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(InstanceId, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.register(name, move |instance, args| Ok(Some(method(instance, args))));
    }

    /// Produce an immutable snapshot for a run.
    pub fn snapshot(&self) -> ExternalRegistry {
        let methods = self.methods.read();
        ExternalRegistry {
            methods: Arc::new(methods.clone()),
        }
    }
}

/// Immutable runtime view of the catalog.
#[derive(Clone, Default)]
pub struct ExternalRegistry {
    methods: Arc<HashMap<String, ExternalMethod>>,
}

impl ExternalRegistry {
    /// Registry with no methods.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Find a method by name.
    pub fn lookup(&self, name: &str) -> Result<&ExternalMethod, ExternalInvocationError> {
        self.methods
            .get(name)
            .ok_or_else(|| ExternalInvocationError::NotFound(name.to_string()))
    }

    /// Look up and call a method, wrapping any failure.
    pub fn invoke(
        &self,
        name: &str,
        instance: InstanceId,
        args: &[Value],
    ) -> Result<Option<Value>, ExternalInvocationError> {
        let method = self.lookup(name)?;
        method(instance, args).map_err(|source| ExternalInvocationError::Failed {
            method: name.to_string(),
            source,
        })
    }

    /// Whether a method is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ExternalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalRegistry")
            .field("methods", &self.names())
            .finish()
    }
}
