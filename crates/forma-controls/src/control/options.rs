//! Construction options

use std::fmt;
use std::sync::Arc;

use forma_core::{
    with_slice, ControlId, ErrorsStore, PendingStore, Scheduler, ValidationErrors, Validator,
    ValidatorStore,
};
use serde_json::Value;

use crate::event::{Change, ControlEvent, Transform};

/// Initial state of a new control.
///
/// Every field left unset keeps the control default. Set fields are applied
/// as a burst of state changes right after allocation, in the order the
/// fields are declared here.
#[derive(Clone, Default)]
pub struct ControlOptions {
    pub id: Option<ControlId>,
    pub disabled: Option<bool>,
    pub touched: Option<bool>,
    pub dirty: Option<bool>,
    pub readonly: Option<bool>,
    pub submitted: Option<bool>,
    pub validators: Vec<Validator>,
    pub pending: Option<bool>,
    /// Initial own error slice
    pub errors: Option<ValidationErrors>,
    pub data: Option<Value>,
    /// Scheduler to run on instead of the thread's shared one
    pub scheduler: Option<Arc<Scheduler<ControlEvent>>>,
}

impl ControlOptions {
    pub fn new() -> Self {
        ControlOptions::default()
    }

    pub fn id(mut self, id: ControlId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    pub fn touched(mut self, touched: bool) -> Self {
        self.touched = Some(touched);
        self
    }

    pub fn dirty(mut self, dirty: bool) -> Self {
        self.dirty = Some(dirty);
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = Some(readonly);
        self
    }

    pub fn submitted(mut self, submitted: bool) -> Self {
        self.submitted = Some(submitted);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn validators(mut self, validators: Vec<Validator>) -> Self {
        self.validators = validators;
        self
    }

    pub fn pending(mut self, pending: bool) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn errors(mut self, errors: ValidationErrors) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<Scheduler<ControlEvent>>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Changes reproducing these options on the control `own`
    pub(crate) fn initial_changes(&self, own: &ControlId) -> Vec<Change> {
        let mut changes = Vec::new();
        let flags: [(Option<bool>, fn(Transform<bool>) -> Change); 5] = [
            (self.disabled, Change::Disabled),
            (self.touched, Change::Touched),
            (self.dirty, Change::Dirty),
            (self.readonly, Change::Readonly),
            (self.submitted, Change::Submitted),
        ];
        for (flag, change) in flags {
            if let Some(on) = flag {
                changes.push(change(Transform::to(on)));
            }
        }

        if !self.validators.is_empty() {
            let validator = match self.validators.len() {
                1 => self.validators[0].clone(),
                _ => Validator::compose(self.validators.clone()),
            };
            let store: ValidatorStore = [(own.clone(), validator)].into_iter().collect();
            changes.push(Change::ValidatorStore(Transform::to(store)));
        }
        if let Some(pending) = self.pending {
            let store: PendingStore = if pending { [own.clone()].into_iter().collect() } else { PendingStore::new() };
            changes.push(Change::PendingStore(Transform::to(store)));
        }
        if let Some(errors) = &self.errors {
            let owner = own.clone();
            let errors = errors.clone();
            changes.push(Change::ErrorsStore(Transform::new(move |store: &ErrorsStore| {
                with_slice(store, &owner, Some(errors.clone()))
            })));
        }
        if let Some(data) = &self.data {
            changes.push(Change::Data(Transform::to(data.clone())));
        }
        changes
    }
}

impl fmt::Debug for ControlOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlOptions")
            .field("id", &self.id)
            .field("disabled", &self.disabled)
            .field("touched", &self.touched)
            .field("dirty", &self.dirty)
            .field("readonly", &self.readonly)
            .field("submitted", &self.submitted)
            .field("validators", &self.validators.len())
            .field("pending", &self.pending)
            .field("errors", &self.errors)
            .field("data", &self.data)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}
