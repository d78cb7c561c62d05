//! Validation data
//!
//! Errors, validators and pending markers are all stored per source
//! [`ControlId`], so independent writers own disjoint slices.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::ControlId;

/// Error object produced by validation (e.g. `{"required": true}`)
pub type ValidationErrors = Map<String, Value>;

/// Error slices keyed by the source that owns them
pub type ErrorsStore = BTreeMap<ControlId, ValidationErrors>;

/// Sources currently marking a control as pending
pub type PendingStore = BTreeSet<ControlId>;

/// Validators keyed by the source that registered them
pub type ValidatorStore = BTreeMap<ControlId, Validator>;

/// Validator function over a control's value.
///
/// Equality is identity: two validators are equal only when they share the
/// same function allocation.
#[derive(Clone)]
pub struct Validator(Arc<dyn Fn(&Value) -> Option<ValidationErrors> + Send + Sync>);

impl Validator {
    pub fn new(f: impl Fn(&Value) -> Option<ValidationErrors> + Send + Sync + 'static) -> Self {
        Validator(Arc::new(f))
    }

    /// Run the validator; empty results count as "no errors"
    pub fn validate(&self, value: &Value) -> Option<ValidationErrors> {
        (self.0)(value).filter(|errors| !errors.is_empty())
    }

    /// Compose validators into one that runs all and merges their results
    pub fn compose(validators: Vec<Validator>) -> Validator {
        Validator::new(move |value| {
            let results: Vec<ValidationErrors> =
                validators.iter().filter_map(|v| v.validate(value)).collect();
            merge_errors(results.iter())
        })
    }

    /// Validator rejecting null, empty strings and empty collections
    pub fn required() -> Validator {
        Validator::new(|value| {
            let empty = match value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                Value::Array(a) => a.is_empty(),
                Value::Object(o) => o.is_empty(),
                _ => false,
            };
            empty.then(|| single_error("required", Value::Bool(true)))
        })
    }

    /// Validator rejecting strings shorter than `min` characters
    pub fn min_length(min: usize) -> Validator {
        Validator::new(move |value| match value {
            Value::String(s) if s.chars().count() < min => Some(single_error(
                "minLength",
                serde_json::json!({ "requiredLength": min, "actualLength": s.chars().count() }),
            )),
            _ => None,
        })
    }

    pub fn ptr_eq(&self, other: &Validator) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Validator {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Build an error object with one key
pub fn single_error(key: &str, detail: Value) -> ValidationErrors {
    let mut errors = Map::new();
    errors.insert(key.to_string(), detail);
    errors
}

/// Shallow-merge error objects in order; later entries win on collision
pub fn merge_errors<'a>(slices: impl Iterator<Item = &'a ValidationErrors>) -> Option<ValidationErrors> {
    let mut merged = Map::new();
    for slice in slices {
        for (key, detail) in slice {
            merged.insert(key.clone(), detail.clone());
        }
    }
    (!merged.is_empty()).then_some(merged)
}

/// Apply a partial error object to one slice. `null` values delete keys.
pub fn patch_slice(slice: Option<&ValidationErrors>, patch: &ValidationErrors) -> Option<ValidationErrors> {
    let mut patched = slice.cloned().unwrap_or_default();
    for (key, detail) in patch {
        if detail.is_null() {
            patched.remove(key);
        } else {
            patched.insert(key.clone(), detail.clone());
        }
    }
    (!patched.is_empty()).then_some(patched)
}

/// Drop empty slices so that "no errors" has a single representation
pub fn normalize_store(mut store: ErrorsStore) -> ErrorsStore {
    store.retain(|_, errors| !errors.is_empty());
    store
}

/// Store with the slice for `source` replaced (or removed when empty)
pub fn with_slice(store: &ErrorsStore, source: &ControlId, errors: Option<ValidationErrors>) -> ErrorsStore {
    let mut next = store.clone();
    match errors.filter(|e| !e.is_empty()) {
        Some(errors) => {
            next.insert(source.clone(), errors);
        }
        None => {
            next.remove(source);
        }
    }
    next
}
