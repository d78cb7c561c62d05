//! Scalar leaf control

use std::fmt;

use forma_core::{ControlError, ControlResult};
use serde_json::Value;

use crate::control::{Control, ControlKind, ControlOptions};

/// Leaf control holding one value
#[derive(Clone, PartialEq, Eq)]
pub struct FormControl(pub(crate) Control);

impl FormControl {
    pub fn new(value: impl Into<Value>) -> Self {
        FormControl(Control::allocate(ControlKind::Leaf, value.into(), &ControlOptions::default()))
    }

    pub fn with_options(value: impl Into<Value>, options: ControlOptions) -> ControlResult<Self> {
        let control = Control::allocate(ControlKind::Leaf, value.into(), &options);
        control.apply_burst(options.initial_changes(control.id()))?;
        Ok(FormControl(control))
    }

    pub fn deep_clone(&self) -> ControlResult<FormControl> {
        Ok(FormControl(self.0.deep_clone()?))
    }
}

impl TryFrom<Control> for FormControl {
    type Error = ControlError;

    fn try_from(control: Control) -> ControlResult<Self> {
        match control.kind() {
            ControlKind::Leaf => Ok(FormControl(control)),
            _ => Err(ControlError::InvalidValue {
                control: control.id().clone(),
                reason: "not a leaf control".to_string(),
            }),
        }
    }
}

impl fmt::Debug for FormControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormControl")
            .field("id", self.0.id())
            .field("value", &self.0.value())
            .field("status", &self.0.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forma_core::{ControlStatus, Prop};
    use serde_json::json;

    #[test]
    fn test_new_leaf_defaults() {
        let control = FormControl::new("a");
        assert_eq!(control.value(), json!("a"));
        assert_eq!(control.raw_value(), control.value());
        assert_eq!(control.enabled_value(), json!("a"));
        assert_eq!(control.status(), ControlStatus::Valid);
        assert!(control.parent().is_none());
        assert_eq!(control.size(), 0);
        assert!(control.get(["x"]).is_none());
    }

    #[test]
    fn test_patch_value_requires_container() {
        let control = FormControl::new(1);
        assert!(matches!(
            control.patch_value(json!(2)),
            Err(ControlError::NotAContainer(_))
        ));
    }

    #[test]
    fn test_focus_and_custom_events_pass_through() {
        let control = FormControl::new(1);
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            control.events().subscribe(move |e| seen.lock().push(e.kind.name().to_string()))
        };

        control.focus(true).unwrap();
        control.emit_custom("AccessorAttached", Default::default()).unwrap();
        assert_eq!(*seen.lock(), vec!["Focus", "AccessorAttached"]);
    }

    #[test]
    fn test_data_change_reports_no_value_effects() {
        let control = FormControl::new(1);
        let props = control.set_data(json!({"placeholder": "x"})).unwrap();
        assert!(props.is_empty());
        assert!(!props.contains(&Prop::Value));
    }
}
