//! Control state and snapshot diffing
//!
//! Handlers mutate a [`ControlState`] under the control's lock. Side effects
//! are never tracked by hand: a [`Snapshot`] of every observable property is
//! taken before and after, and [`Snapshot::diff`] lists what moved.

use std::collections::BTreeMap;

use forma_core::{
    merge_errors, with_slice, ControlId, ControlKey, ControlStatus, ErrorsStore, Flag,
    PendingStore, Prop, ValidationErrors, Validator, ValidatorStore,
};
use serde_json::Value;

use crate::container::ContainerState;
use crate::control::validation::ValidationRound;
use crate::control::ControlKind;

/// Existential/universal quantifier pair for one flag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Quantifier {
    /// At least one considered child has the flag
    pub child: bool,
    /// Every considered child has the flag, and there is at least one
    pub children: bool,
}

pub(crate) type Quantifiers = BTreeMap<Flag, Quantifier>;

/// What a container needs to know about one child
#[derive(Clone, Debug)]
pub(crate) struct ChildSummary {
    pub(crate) value: Value,
    pub(crate) errors: Option<ValidationErrors>,
    pub(crate) flags: BTreeMap<Flag, bool>,
}

impl ChildSummary {
    #[inline]
    pub(crate) fn flag(&self, flag: Flag) -> bool {
        self.flags.get(&flag).copied().unwrap_or(false)
    }
}

/// Quantify flags over a child set.
///
/// `disabled` considers every child; all other flags only consider children
/// that are not disabled.
pub(crate) fn quantify(children: &[ChildSummary]) -> Quantifiers {
    Flag::ALL
        .iter()
        .map(|&flag| {
            let considered: Vec<&ChildSummary> = children
                .iter()
                .filter(|c| flag == Flag::Disabled || !c.flag(Flag::Disabled))
                .collect();
            let quantifier = Quantifier {
                child: considered.iter().any(|c| c.flag(flag)),
                children: !considered.is_empty() && considered.iter().all(|c| c.flag(flag)),
            };
            (flag, quantifier)
        })
        .collect()
}

pub(crate) struct ControlState {
    pub(crate) value: Value,
    pub(crate) enabled_value: Value,
    // Own flags; containers combine them with their quantifiers
    pub(crate) disabled: bool,
    pub(crate) touched: bool,
    pub(crate) dirty: bool,
    pub(crate) readonly: bool,
    pub(crate) submitted: bool,
    pub(crate) pending_store: PendingStore,
    pub(crate) errors_store: ErrorsStore,
    pub(crate) validator_store: ValidatorStore,
    pub(crate) validator: Option<Validator>,
    pub(crate) errors: Option<ValidationErrors>,
    pub(crate) status: ControlStatus,
    pub(crate) parent: Option<ControlId>,
    pub(crate) data: Value,
    pub(crate) round: ValidationRound,
    pub(crate) container: Option<ContainerState>,
}

impl ControlState {
    pub(crate) fn new(kind: ControlKind, value: Value) -> Self {
        let container = kind.is_container().then(ContainerState::new);
        let value = match kind {
            ControlKind::Leaf => value,
            ControlKind::Group => Value::Object(Default::default()),
            ControlKind::Array => Value::Array(Vec::new()),
        };
        ControlState {
            enabled_value: value.clone(),
            value,
            disabled: false,
            touched: false,
            dirty: false,
            readonly: false,
            submitted: false,
            pending_store: PendingStore::new(),
            errors_store: ErrorsStore::new(),
            validator_store: ValidatorStore::new(),
            validator: None,
            errors: None,
            status: ControlStatus::Valid,
            parent: None,
            data: Value::Null,
            round: ValidationRound::default(),
            container,
        }
    }

    fn quantifier(&self, flag: Flag) -> Quantifier {
        self.container
            .as_ref()
            .and_then(|c| c.quantifiers.get(&flag).copied())
            .unwrap_or_default()
    }

    /// Effective flag value, combining own state with child quantifiers
    pub(crate) fn flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::Disabled => self.disabled || self.quantifier(flag).children,
            Flag::Readonly => self.readonly || self.quantifier(flag).children,
            Flag::Submitted => self.submitted || self.quantifier(flag).children,
            Flag::Touched => self.touched || self.quantifier(flag).child,
            Flag::Dirty => self.dirty || self.quantifier(flag).child,
            Flag::Pending => !self.pending_store.is_empty() || self.quantifier(flag).child,
            Flag::Valid => self.status == ControlStatus::Valid,
            Flag::Invalid => self.status == ControlStatus::Invalid,
        }
    }

    pub(crate) fn children_errors(&self) -> Option<&ValidationErrors> {
        self.container.as_ref().and_then(|c| c.children_errors.as_ref())
    }

    /// Recompute combined errors and status.
    ///
    /// Own slices merge in source-id order and win over child errors.
    pub(crate) fn refresh(&mut self) {
        let own = merge_errors(self.errors_store.values());
        self.errors = merge_errors(self.children_errors().into_iter().chain(own.as_ref()));
        self.status = ControlStatus::derive(
            self.flag(Flag::Disabled),
            self.flag(Flag::Pending),
            self.errors.is_some(),
        );
    }

    /// Run the composed validator and store its result under `own_id`
    pub(crate) fn rerun_validator(&mut self, own_id: &ControlId) {
        let result = self.validator.as_ref().and_then(|v| v.validate(&self.value));
        self.errors_store = with_slice(&self.errors_store, own_id, result);
        self.refresh();
    }

    pub(crate) fn replace_validators(&mut self, store: ValidatorStore, own_id: &ControlId) {
        self.validator = match store.len() {
            0 => None,
            1 => store.values().next().cloned(),
            _ => Some(Validator::compose(store.values().cloned().collect())),
        };
        self.validator_store = store;
        self.rerun_validator(own_id);
    }

    pub(crate) fn summary(&self) -> ChildSummary {
        ChildSummary {
            value: self.value.clone(),
            errors: self.errors.clone(),
            flags: Flag::ALL.iter().map(|&f| (f, self.flag(f))).collect(),
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let mut flags = BTreeMap::new();
        for flag in Flag::ALL {
            flags.insert(flag, self.flag(flag));
        }
        Snapshot {
            value: self.value.clone(),
            enabled_value: self.enabled_value.clone(),
            flags,
            pending_store: self.pending_store.clone(),
            errors: self.errors.clone(),
            errors_store: self.errors_store.clone(),
            validator_store: self.validator_store.clone(),
            status: self.status,
            parent: self.parent.clone(),
            data: self.data.clone(),
            controls: self.container.as_ref().map(|c| c.store.key_ids()),
            children_errors: self.children_errors().cloned(),
            quantifiers: self.container.as_ref().map(|c| c.quantifiers.clone()).unwrap_or_default(),
        }
    }
}

/// Every observable property of a control at one instant
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Snapshot {
    value: Value,
    enabled_value: Value,
    flags: BTreeMap<Flag, bool>,
    pending_store: PendingStore,
    errors: Option<ValidationErrors>,
    errors_store: ErrorsStore,
    validator_store: ValidatorStore,
    status: ControlStatus,
    parent: Option<ControlId>,
    data: Value,
    controls: Option<Vec<(ControlKey, ControlId)>>,
    children_errors: Option<ValidationErrors>,
    quantifiers: Quantifiers,
}

fn mark(props: &mut Vec<Prop>, changed: bool, names: &[Prop]) {
    if changed {
        props.extend_from_slice(names);
    }
}

impl Snapshot {
    /// Properties that differ between `self` (before) and `after`
    pub(crate) fn diff(&self, after: &Snapshot) -> Vec<Prop> {
        let mut props = Vec::new();
        if self == after {
            return props;
        }

        mark(&mut props, self.value != after.value, &[Prop::Value, Prop::RawValue]);
        mark(&mut props, self.enabled_value != after.enabled_value, &[Prop::EnabledValue]);

        let flag_changed = |flag: Flag| self.flags.get(&flag) != after.flags.get(&flag);
        mark(&mut props, flag_changed(Flag::Disabled), &[Prop::Disabled, Prop::Enabled]);
        for flag in [Flag::Touched, Flag::Dirty, Flag::Readonly, Flag::Submitted, Flag::Pending] {
            mark(&mut props, flag_changed(flag), &[flag.prop()]);
        }

        mark(&mut props, self.pending_store != after.pending_store, &[Prop::PendingStore]);
        mark(&mut props, self.errors != after.errors, &[Prop::Errors]);
        mark(&mut props, self.errors_store != after.errors_store, &[Prop::ErrorsStore]);
        mark(
            &mut props,
            self.validator_store != after.validator_store,
            &[Prop::ValidatorStore, Prop::Validator],
        );
        mark(&mut props, self.status != after.status, &[Prop::Status]);
        mark(&mut props, flag_changed(Flag::Valid), &[Prop::Valid]);
        mark(&mut props, flag_changed(Flag::Invalid), &[Prop::Invalid]);
        mark(&mut props, self.parent != after.parent, &[Prop::Parent]);
        mark(&mut props, self.data != after.data, &[Prop::Data]);

        if self.controls != after.controls {
            props.extend_from_slice(&[Prop::ControlsStore, Prop::Controls]);
            let size = |c: &Option<Vec<_>>| c.as_ref().map_or(0, Vec::len);
            mark(&mut props, size(&self.controls) != size(&after.controls), &[Prop::Size]);
        }
        mark(&mut props, self.children_errors != after.children_errors, &[Prop::ChildrenErrors]);

        for flag in Flag::ALL {
            let before = self.quantifiers.get(&flag).copied().unwrap_or_default();
            let now = after.quantifiers.get(&flag).copied().unwrap_or_default();
            mark(&mut props, before.child != now.child, &[Prop::Child(flag)]);
            mark(&mut props, before.children != now.children, &[Prop::Children(flag)]);
        }
        props
    }
}
