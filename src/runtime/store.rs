//! Per-instance variable storage
//!
//! A store belongs to exactly one instance and is only touched by the task
//! running that instance, so it needs no synchronisation.

use std::collections::HashMap;

use super::error::EvaluationError;
use crate::definition::{Value, ValueType};

/// Mapping from variable name to its current value.
///
/// A declared slot holds no value until it is first assigned. The type of the
/// first value a slot holds is fixed for the rest of its scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableStore {
    slots: HashMap<String, Option<Value>>,
}

impl VariableStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with bound parameters.
    pub fn with_parameters(params: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            slots: params
                .into_iter()
                .map(|(name, value)| (name, Some(value)))
                .collect(),
        }
    }

    /// Introduce a variable, replacing any previous slot of the same name.
    pub fn declare(&mut self, name: impl Into<String>, value: Option<Value>) {
        self.slots.insert(name.into(), value);
    }

    /// Current value of a variable.
    pub fn get(&self, name: &str) -> Result<&Value, EvaluationError> {
        match self.slots.get(name) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(EvaluationError::UnassignedVariable(name.to_string())),
            None => Err(EvaluationError::UndeclaredVariable(name.to_string())),
        }
    }

    /// Overwrite a declared variable.
    ///
    /// Fails with `TypeMismatch` when the slot already holds a value of a
    /// different type.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), EvaluationError> {
        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| EvaluationError::UndeclaredVariable(name.to_string()))?;
        if let Some(current) = slot {
            let expected = current.value_type();
            if value.value_type() != expected {
                return Err(EvaluationError::TypeMismatch {
                    operation: format!("assign {}", name),
                    expected: expected.to_string(),
                    found: value.value_type().to_string(),
                });
            }
        }
        *slot = Some(value);
        Ok(())
    }

    /// Type fixed for a variable, if it holds a value.
    pub fn value_type(&self, name: &str) -> Option<ValueType> {
        self.slots.get(name)?.as_ref().map(Value::value_type)
    }

    /// Drop a variable when its scope ends.
    pub fn release(&mut self, name: &str) {
        self.slots.remove(name);
    }

    /// Whether the name is currently declared.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Number of declared variables.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_seed_assigned_slots() {
        let store = VariableStore::with_parameters(vec![("StartValue".to_string(), Value::Integer(10))]);
        assert_eq!(store.get("StartValue").unwrap(), &Value::Integer(10));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn set_requires_declaration() {
        let mut store = VariableStore::new();
        assert!(matches!(
            store.set("x", Value::Integer(1)).unwrap_err(),
            EvaluationError::UndeclaredVariable(_)
        ));

        store.declare("x", None);
        assert!(matches!(
            store.get("x").unwrap_err(),
            EvaluationError::UnassignedVariable(_)
        ));
        store.set("x", Value::Integer(1)).unwrap();
        assert_eq!(store.get("x").unwrap(), &Value::Integer(1));

        store.release("x");
        assert!(!store.contains("x"));
        assert!(store.is_empty());
    }

    #[test]
    fn first_value_fixes_the_slot_type() {
        let mut store = VariableStore::with_parameters(vec![("N".to_string(), Value::Integer(3))]);
        match store.set("N", Value::from("oops")).unwrap_err() {
            EvaluationError::TypeMismatch { expected, found, .. } => {
                assert_eq!(expected, "int");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(store.get("N").unwrap(), &Value::Integer(3));

        store.declare("later", None);
        assert_eq!(store.value_type("later"), None);
        store.set("later", Value::from("first")).unwrap();
        assert_eq!(store.value_type("later"), Some(ValueType::String));
        assert!(store.set("later", Value::Integer(1)).is_err());
        store.set("later", Value::from("second")).unwrap();
    }
}
