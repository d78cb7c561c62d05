//! Public mutation API
//!
//! Every method emits exactly one `StateChange` and returns the side effects
//! reported for it once the scheduler is quiescent. Called from inside a
//! running drain (e.g. from a subscriber), the change is queued and the
//! returned list is empty.

use forma_core::{
    patch_slice, with_slice, ControlId, ControlResult, ErrorsStore, Flag, PendingStore, Prop,
    ValidationErrors, Validator, ValidatorStore,
};
use serde_json::{Map, Value};

use crate::control::Control;
use crate::event::{Change, EventKind, StateChange, Transform};

impl Control {
    /// Emit a single change authored by this control
    pub fn emit(&self, change: Change) -> ControlResult<Vec<Prop>> {
        self.emit_by(change, self.id().clone())
    }

    /// Emit a single change authored by `source`
    pub fn emit_by(&self, change: Change, source: ControlId) -> ControlResult<Vec<Prop>> {
        let mut event = self.new_event(EventKind::StateChange(StateChange::new(change)));
        event.source = source;
        self.dispatch(event)
    }

    pub fn set_value(&self, value: Value) -> ControlResult<Vec<Prop>> {
        self.emit(Change::Value(Transform::to(value)))
    }

    pub fn mark_dirty(&self, dirty: bool) -> ControlResult<Vec<Prop>> {
        self.mark_flag(Flag::Dirty, dirty, Change::Dirty(Transform::to(dirty)))
    }

    pub fn mark_touched(&self, touched: bool) -> ControlResult<Vec<Prop>> {
        self.mark_flag(Flag::Touched, touched, Change::Touched(Transform::to(touched)))
    }

    pub fn mark_readonly(&self, readonly: bool) -> ControlResult<Vec<Prop>> {
        self.mark_flag(Flag::Readonly, readonly, Change::Readonly(Transform::to(readonly)))
    }

    pub fn mark_disabled(&self, disabled: bool) -> ControlResult<Vec<Prop>> {
        self.mark_flag(Flag::Disabled, disabled, Change::Disabled(Transform::to(disabled)))
    }

    pub fn mark_submitted(&self, submitted: bool) -> ControlResult<Vec<Prop>> {
        self.mark_flag(Flag::Submitted, submitted, Change::Submitted(Transform::to(submitted)))
    }

    /// Clearing a flag on a container also clears it on every descendant,
    /// since the effective flag includes the children
    fn mark_flag(&self, flag: Flag, on: bool, change: Change) -> ControlResult<Vec<Prop>> {
        let event = self.new_event(EventKind::StateChange(StateChange::new(change)));
        if on || !self.is_container() {
            return self.dispatch(event);
        }
        let mut pushes = Vec::new();
        self.push_flag_down(flag, &event, &mut pushes);
        if self.scheduler().is_draining() {
            return self.dispatch_with(event, pushes);
        }

        // the container's own change may be a no-op while its children's
        // pushes still move the effective flag
        let before = self.inner.state.lock().snapshot();
        let mut props = self.dispatch_with(event, pushes)?;
        let after = self.inner.state.lock().snapshot();
        for prop in before.diff(&after) {
            if !props.contains(&prop) {
                props.push(prop);
            }
        }
        Ok(props)
    }

    /// Mark or clear pending under this control's own id
    pub fn mark_pending(&self, pending: bool) -> ControlResult<Vec<Prop>> {
        self.mark_pending_by(pending, self.id().clone())
    }

    /// Mark or clear pending under `source`
    pub fn mark_pending_by(&self, pending: bool, source: ControlId) -> ControlResult<Vec<Prop>> {
        let owner = source.clone();
        let change = Change::PendingStore(Transform::new(move |store: &PendingStore| {
            let mut next = store.clone();
            if pending {
                next.insert(owner.clone());
            } else {
                next.remove(&owner);
            }
            next
        }));
        self.emit_by(change, source)
    }

    pub fn set_pending_store(&self, store: PendingStore) -> ControlResult<Vec<Prop>> {
        self.emit(Change::PendingStore(Transform::to(store)))
    }

    /// Replace this control's own error slice. `None` or `{}` removes it.
    pub fn set_errors(&self, errors: Option<ValidationErrors>) -> ControlResult<Vec<Prop>> {
        self.set_errors_by(errors, self.id().clone())
    }

    /// Replace the error slice owned by `source`
    pub fn set_errors_by(&self, errors: Option<ValidationErrors>, source: ControlId) -> ControlResult<Vec<Prop>> {
        let owner = source.clone();
        let change = Change::ErrorsStore(Transform::new(move |store: &ErrorsStore| {
            with_slice(store, &owner, errors.clone())
        }));
        self.emit_by(change, source)
    }

    pub fn set_errors_store(&self, store: ErrorsStore) -> ControlResult<Vec<Prop>> {
        self.emit(Change::ErrorsStore(Transform::to(store)))
    }

    /// Merge keys into this control's own slice; `null` deletes a key
    pub fn patch_errors(&self, patch: ValidationErrors) -> ControlResult<Vec<Prop>> {
        self.patch_errors_by(patch, self.id().clone())
    }

    pub fn patch_errors_by(&self, patch: ValidationErrors, source: ControlId) -> ControlResult<Vec<Prop>> {
        let owner = source.clone();
        let change = Change::ErrorsStore(Transform::new(move |store: &ErrorsStore| {
            with_slice(store, &owner, patch_slice(store.get(&owner), &patch))
        }));
        self.emit_by(change, source)
    }

    /// Patch several slices at once
    pub fn patch_errors_store(&self, patches: ErrorsStore) -> ControlResult<Vec<Prop>> {
        self.emit(Change::ErrorsStore(Transform::new(move |store: &ErrorsStore| {
            patches.iter().fold(store.clone(), |acc, (source, patch)| {
                let patched = patch_slice(acc.get(source), patch);
                with_slice(&acc, source, patched)
            })
        })))
    }

    /// Replace this control's own validators. An empty list removes them.
    pub fn set_validators(&self, validators: Vec<Validator>) -> ControlResult<Vec<Prop>> {
        self.set_validators_by(validators, self.id().clone())
    }

    pub fn set_validators_by(&self, validators: Vec<Validator>, source: ControlId) -> ControlResult<Vec<Prop>> {
        let validator = match validators.len() {
            0 => None,
            1 => validators.into_iter().next(),
            _ => Some(Validator::compose(validators)),
        };
        let owner = source.clone();
        let change = Change::ValidatorStore(Transform::new(move |store: &ValidatorStore| {
            let mut next = store.clone();
            match &validator {
                Some(validator) => {
                    next.insert(owner.clone(), validator.clone());
                }
                None => {
                    next.remove(&owner);
                }
            }
            next
        }));
        self.emit_by(change, source)
    }

    pub fn set_validator_store(&self, store: ValidatorStore) -> ControlResult<Vec<Prop>> {
        self.emit(Change::ValidatorStore(Transform::to(store)))
    }

    pub fn set_parent(&self, parent: Option<ControlId>) -> ControlResult<Vec<Prop>> {
        self.emit(Change::Parent(Transform::to(parent)))
    }

    pub fn set_data(&self, data: Value) -> ControlResult<Vec<Prop>> {
        self.emit(Change::Data(Transform::to(data)))
    }

    /// Emit a focus request for adapters bound to this control
    pub fn focus(&self, focused: bool) -> ControlResult<()> {
        self.dispatch(self.new_event(EventKind::Focus { focused })).map(|_| ())
    }

    /// Emit an adapter-defined event
    pub fn emit_custom(&self, tag: impl Into<String>, payload: Map<String, Value>) -> ControlResult<()> {
        let event = self.new_event(EventKind::Custom {
            tag: tag.into(),
            payload,
        });
        self.dispatch(event).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use crate::nodes::{FormControl, FormGroup};
    use forma_core::{single_error, ControlId, ControlStatus, Flag, Prop, Validator};
    use serde_json::json;

    fn errors(value: serde_json::Value) -> forma_core::ValidationErrors {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_error_slices_are_isolated() {
        let control = FormControl::new(json!(1));
        let (a, b) = (ControlId::named("a"), ControlId::named("b"));

        control.set_errors_by(Some(errors(json!({"fromA": true}))), a.clone()).unwrap();
        control.set_errors_by(Some(errors(json!({"fromB": true}))), b.clone()).unwrap();
        assert_eq!(control.errors_store().len(), 2);

        control.set_errors_by(None, a.clone()).unwrap();
        assert!(!control.errors_store().contains_key(&a));
        assert_eq!(control.errors(), Some(errors(json!({"fromB": true}))));
        assert_eq!(control.status(), ControlStatus::Invalid);
    }

    #[test]
    fn test_patch_errors_deletes_null_keys() {
        let control = FormControl::new(json!(1));
        control.set_errors(Some(errors(json!({"required": true, "min": 1})))).unwrap();
        control.patch_errors(errors(json!({"required": null}))).unwrap();
        assert_eq!(control.errors(), Some(errors(json!({"min": 1}))));

        control.patch_errors(errors(json!({"min": null}))).unwrap();
        assert!(control.errors().is_none());
        assert!(control.errors_store().is_empty());
        assert!(control.valid());
    }

    #[test]
    fn test_validators_run_on_value_change() {
        let control = FormControl::new(json!(""));
        let props = control.set_validators(vec![Validator::required()]).unwrap();
        assert!(props.contains(&Prop::Errors));
        assert!(control.invalid());

        control.set_value(json!("x")).unwrap();
        assert!(control.valid());
        assert!(control.errors_store().is_empty());

        control.set_validators(vec![]).unwrap();
        assert!(control.validator().is_none());
    }

    #[test]
    fn test_external_validator_keeps_own_slice() {
        let control = FormControl::new(json!(""));
        let svc = ControlId::named("svc");
        control.set_validators(vec![Validator::required()]).unwrap();
        control
            .set_validators_by(vec![Validator::new(|_| Some(single_error("remote", json!(1))))], svc.clone())
            .unwrap();

        let merged = control.errors().unwrap();
        assert!(merged.contains_key("required"));
        assert!(merged.contains_key("remote"));
        assert_eq!(control.validator_store().len(), 2);
    }

    #[test]
    fn test_pending_by_source() {
        let control = FormControl::new(json!(1));
        let svc = ControlId::named("svc");
        control.mark_pending(true).unwrap();
        control.mark_pending_by(true, svc.clone()).unwrap();
        control.mark_pending(false).unwrap();

        assert!(control.pending());
        assert_eq!(control.status(), ControlStatus::Pending);
        control.mark_pending_by(false, svc).unwrap();
        assert!(!control.pending());
    }

    #[test]
    fn test_container_clear_pushes_to_children() {
        let one = FormControl::new(json!(1));
        let two = FormControl::new(json!(2));
        let group = FormGroup::new([("one", one.clone()), ("two", two.clone())]).unwrap();

        one.mark_touched(true).unwrap();
        assert!(group.touched());

        let props = group.mark_touched(false).unwrap();
        assert!(props.contains(&Prop::Touched));
        assert!(props.contains(&Prop::Child(Flag::Touched)));
        assert!(!props.contains(&Prop::Value));
        assert!(!one.touched());
        assert!(!group.touched());

        // nothing left to clear
        assert!(group.mark_touched(false).unwrap().is_empty());
    }

    #[test]
    fn test_container_clear_reports_effective_disabled() {
        let one = FormControl::new(json!(1));
        let group = FormGroup::new([("one", one.clone())]).unwrap();
        one.mark_disabled(true).unwrap();
        assert!(group.disabled());

        let props = group.mark_disabled(false).unwrap();
        assert!(props.contains(&Prop::Disabled));
        assert!(props.contains(&Prop::Enabled));
        assert!(props.contains(&Prop::Status));
        assert!(group.enabled());
    }

    #[test]
    fn test_disabled_status_and_enabled() {
        let control = FormControl::new(json!(1));
        let props = control.mark_disabled(true).unwrap();
        assert!(props.contains(&Prop::Enabled));
        assert!(props.contains(&Prop::Status));
        assert_eq!(control.status(), ControlStatus::Disabled);
        assert!(!control.enabled());
    }
}
