//! Concrete node types and capability detection

mod form_array;
mod form_control;
mod form_group;

use std::any::Any;

pub use form_array::FormArray;
pub use form_control::FormControl;
pub use form_group::FormGroup;

use forma_core::ControlResult;
use serde_json::Value;

use crate::container::{check_children, ControlsStore};
use crate::control::{Control, ControlKind, ControlOptions};
use crate::event::{Change, Transform};

mod sealed {
    pub trait Sealed {}

    impl Sealed for crate::control::Control {}
    impl Sealed for super::FormControl {}
    impl Sealed for super::FormGroup {}
    impl Sealed for super::FormArray {}
}

/// Anything that is a control. Sealed: only this crate's node types and the
/// untyped [`Control`] handle implement it.
pub trait AbstractControl: sealed::Sealed + Send + Sync + 'static {
    fn as_control(&self) -> &Control;

    fn into_control(self) -> Control
    where
        Self: Sized;
}

/// A control with children
pub trait ControlContainer: AbstractControl {
    fn controls_store(&self) -> ControlsStore {
        self.as_control().controls_store()
    }

    fn size(&self) -> usize {
        self.as_control().size()
    }
}

impl AbstractControl for Control {
    fn as_control(&self) -> &Control {
        self
    }

    fn into_control(self) -> Control {
        self
    }
}

macro_rules! impl_node {
    ($node:ty) => {
        impl AbstractControl for $node {
            fn as_control(&self) -> &Control {
                &self.0
            }

            fn into_control(self) -> Control {
                self.0
            }
        }

        impl std::ops::Deref for $node {
            type Target = Control;

            fn deref(&self) -> &Control {
                &self.0
            }
        }

        impl From<$node> for Control {
            fn from(node: $node) -> Control {
                node.0
            }
        }
    };
}

impl_node!(FormControl);
impl_node!(FormGroup);
impl_node!(FormArray);

impl ControlContainer for FormGroup {}
impl ControlContainer for FormArray {}

/// Allocate a container and register `store` as its children before any
/// option is applied
fn build_container(kind: ControlKind, store: ControlsStore, options: ControlOptions) -> ControlResult<Control> {
    let empty = match kind {
        ControlKind::Array => Value::Array(Vec::new()),
        _ => Value::Object(Default::default()),
    };
    let control = Control::allocate(kind, empty, &options);
    check_children(control.id(), control.scheduler(), store.controls())?;

    let mut changes = Vec::with_capacity(1);
    if !store.is_empty() {
        changes.push(Change::ControlsStore(Transform::to(store)));
    }
    changes.extend(options.initial_changes(control.id()));
    control.apply_burst(changes)?;
    Ok(control)
}

/// Runtime check for any control type
pub fn is_control(value: &dyn Any) -> bool {
    value.is::<Control>() || value.is::<FormControl>() || value.is::<FormGroup>() || value.is::<FormArray>()
}

/// Runtime check for a control with children
pub fn is_container(value: &dyn Any) -> bool {
    if value.is::<FormGroup>() || value.is::<FormArray>() {
        return true;
    }
    value.downcast_ref::<Control>().map_or(false, Control::is_container)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_detection() {
        let leaf = FormControl::new(json!(1));
        let group = FormGroup::new([("a", FormControl::new(json!(1)))]).unwrap();
        let untyped: Control = group.clone().into_control();

        assert!(is_control(&leaf));
        assert!(!is_container(&leaf));
        assert!(is_container(&group));
        assert!(is_container(&untyped));
        assert!(!is_control(&"not a control"));
        assert!(!is_container(&json!({"a": 1})));
    }

    #[test]
    fn test_typed_conversions() {
        let group = FormGroup::new([("a", FormControl::new(json!(1)))]).unwrap();
        let untyped: Control = group.clone().into();

        assert!(FormGroup::try_from(untyped.clone()).is_ok());
        assert!(FormArray::try_from(untyped.clone()).is_err());
        assert!(FormControl::try_from(untyped).is_err());
        assert_eq!(ControlContainer::size(&group), 1);
    }
}
