//! Control events
//!
//! Events are the only way control state changes. A `StateChange` names one
//! property and a pure transform of its previous value; everything else a
//! control reports (side effects, bubbling, validation phases) is derived
//! from processing those changes.

use std::fmt;
use std::sync::Arc;

use forma_core::{
    ControlError, ControlId, ControlKey, ControlResult, ErrorsStore, EventId, PendingStore, Prop,
    QueuedEvent, ValidatorStore,
};
use serde_json::{Map, Value};

use crate::container::ControlsStore;

/// Opaque side-channel data carried by an event
pub type Meta = Map<String, Value>;

/// Pure transform from a property's previous value to its next value
pub struct Transform<T>(Arc<dyn Fn(&T) -> T + Send + Sync>);

impl<T> Transform<T> {
    pub fn new(f: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        Transform(Arc::new(f))
    }

    #[inline]
    pub fn apply(&self, previous: &T) -> T {
        (self.0)(previous)
    }
}

impl<T: Clone + Send + Sync + 'static> Transform<T> {
    /// Transform ignoring the previous value
    pub fn to(value: T) -> Self {
        Transform::new(move |_| value.clone())
    }
}

impl<T> Clone for Transform<T> {
    fn clone(&self) -> Self {
        Transform(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Transform<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform")
    }
}

/// Single-property change. One variant per mutable intrinsic property.
#[derive(Clone)]
pub enum Change {
    Value(Transform<Value>),
    Disabled(Transform<bool>),
    Touched(Transform<bool>),
    Dirty(Transform<bool>),
    Readonly(Transform<bool>),
    Submitted(Transform<bool>),
    PendingStore(Transform<PendingStore>),
    ErrorsStore(Transform<ErrorsStore>),
    ValidatorStore(Transform<ValidatorStore>),
    ControlsStore(Transform<ControlsStore>),
    Parent(Transform<Option<ControlId>>),
    Data(Transform<Value>),
}

impl Change {
    /// Property this change writes
    pub fn prop(&self) -> Prop {
        match self {
            Change::Value(_) => Prop::Value,
            Change::Disabled(_) => Prop::Disabled,
            Change::Touched(_) => Prop::Touched,
            Change::Dirty(_) => Prop::Dirty,
            Change::Readonly(_) => Prop::Readonly,
            Change::Submitted(_) => Prop::Submitted,
            Change::PendingStore(_) => Prop::PendingStore,
            Change::ErrorsStore(_) => Prop::ErrorsStore,
            Change::ValidatorStore(_) => Prop::ValidatorStore,
            Change::ControlsStore(_) => Prop::ControlsStore,
            Change::Parent(_) => Prop::Parent,
            Change::Data(_) => Prop::Data,
        }
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Change({})", self.prop())
    }
}

/// Payload of a `StateChange` event
#[derive(Clone, Debug)]
pub struct StateChange {
    pub change: Change,
    /// Properties that changed as a consequence of applying `change`
    pub side_effects: Vec<Prop>,
}

impl StateChange {
    pub fn new(change: Change) -> Self {
        StateChange {
            change,
            side_effects: Vec::new(),
        }
    }

    /// Build from a dynamically assembled list, which must hold exactly one change
    pub fn from_changes(mut changes: Vec<Change>) -> ControlResult<Self> {
        if changes.len() != 1 {
            return Err(ControlError::MultipleChangeKeys(changes.len()));
        }
        Ok(StateChange::new(changes.remove(0)))
    }

    pub fn prop(&self) -> Prop {
        self.change.prop()
    }
}

/// A child's processed event, re-posted into its container
#[derive(Clone, Debug)]
pub struct ChildStateChange {
    /// Key of the child at forwarding time
    pub key: ControlKey,
    pub child: ControlId,
    pub event: Box<ControlEvent>,
    /// Properties of the container that changed in response
    pub side_effects: Vec<Prop>,
}

/// Event type
#[derive(Clone, Debug)]
pub enum EventKind {
    StateChange(StateChange),
    ChildStateChange(ChildStateChange),
    ValidationStart,
    AsyncValidationStart,
    ValidationComplete,
    Focus { focused: bool },
    /// Adapter-defined event
    Custom { tag: String, payload: Meta },
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            EventKind::StateChange(_) => "StateChange",
            EventKind::ChildStateChange(_) => "ChildStateChange",
            EventKind::ValidationStart => "ValidationStart",
            EventKind::AsyncValidationStart => "AsyncValidationStart",
            EventKind::ValidationComplete => "ValidationComplete",
            EventKind::Focus { .. } => "Focus",
            EventKind::Custom { tag, .. } => tag,
        }
    }
}

/// Event envelope
#[derive(Clone, Debug)]
pub struct ControlEvent {
    pub event_id: EventId,
    /// Id of the event that causally triggered this one
    pub originating_event_id: EventId,
    /// Length of the cause chain back to the originating event
    pub hops: u64,
    /// Control that authored the change
    pub source: ControlId,
    pub kind: EventKind,
    pub meta: Meta,
    /// Processed normally but hidden from observers
    pub no_emit: bool,
    /// Number of queue passes to wait before delivery
    pub delay: u32,
}

impl ControlEvent {
    /// Root-caused event
    pub fn new(event_id: EventId, source: ControlId, kind: EventKind) -> Self {
        ControlEvent {
            event_id,
            originating_event_id: event_id,
            hops: 0,
            source,
            kind,
            meta: Meta::new(),
            no_emit: false,
            delay: 0,
        }
    }

    /// Inherit the causal origin and the visibility of `cause`, one hop
    /// further from the origin
    pub fn caused_by(mut self, cause: &ControlEvent) -> Self {
        self.originating_event_id = cause.originating_event_id;
        self.hops = cause.hops + 1;
        self.no_emit = cause.no_emit;
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_no_emit(mut self, no_emit: bool) -> Self {
        self.no_emit = no_emit;
        self
    }

    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    pub fn state_change(&self) -> Option<&StateChange> {
        match &self.kind {
            EventKind::StateChange(change) => Some(change),
            _ => None,
        }
    }

    pub fn child_state_change(&self) -> Option<&ChildStateChange> {
        match &self.kind {
            EventKind::ChildStateChange(change) => Some(change),
            _ => None,
        }
    }

    pub fn is_state_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::StateChange(_) | EventKind::ChildStateChange(_)
        )
    }

    /// Side effects reported by the control that emitted this event
    pub fn side_effects(&self) -> &[Prop] {
        match &self.kind {
            EventKind::StateChange(change) => &change.side_effects,
            EventKind::ChildStateChange(change) => &change.side_effects,
            _ => &[],
        }
    }

    /// Every property of the emitting control this event reports as changed
    pub fn changed_props(&self) -> Vec<Prop> {
        match &self.kind {
            EventKind::StateChange(change) => {
                let mut props = vec![change.prop()];
                props.extend(change.side_effects.iter().copied());
                props
            }
            EventKind::ChildStateChange(change) => change.side_effects.clone(),
            _ => Vec::new(),
        }
    }

    pub fn touches(&self, prop: Prop) -> bool {
        self.changed_props().contains(&prop)
    }
}

impl QueuedEvent for ControlEvent {
    fn event_id(&self) -> EventId {
        self.event_id
    }

    fn originating_event_id(&self) -> EventId {
        self.originating_event_id
    }

    fn hops(&self) -> u64 {
        self.hops
    }

    fn delay(&self) -> u32 {
        self.delay
    }

    fn set_delay(&mut self, delay: u32) {
        self.delay = delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value_event(id: u64) -> ControlEvent {
        ControlEvent::new(
            EventId(id),
            ControlId::named("source"),
            EventKind::StateChange(StateChange::new(Change::Value(Transform::to(json!(1))))),
        )
    }

    #[test]
    fn test_root_event_originates_from_itself() {
        let event = value_event(7);
        assert_eq!(event.originating_event_id, EventId(7));
        assert_eq!(event.hops, 0);
        assert_eq!(event.kind.name(), "StateChange");
    }

    #[test]
    fn test_caused_by_inherits_origin_and_visibility() {
        let cause = value_event(3).with_no_emit(true);
        let effect = ControlEvent::new(EventId(9), ControlId::named("other"), EventKind::ValidationComplete)
            .caused_by(&cause);

        assert_eq!(effect.originating_event_id, EventId(3));
        assert!(effect.no_emit);
        assert_eq!(effect.hops, 1);

        let next = value_event(12).caused_by(&effect);
        assert_eq!(next.originating_event_id, EventId(3));
        assert_eq!(next.hops, 2);
    }

    #[test]
    fn test_changed_props_include_primary() {
        let mut event = value_event(1);
        if let EventKind::StateChange(change) = &mut event.kind {
            change.side_effects = vec![Prop::RawValue, Prop::Errors];
        }
        assert_eq!(event.changed_props(), vec![Prop::Value, Prop::RawValue, Prop::Errors]);
        assert!(event.touches(Prop::Errors));
        assert_eq!(event.side_effects(), &[Prop::RawValue, Prop::Errors]);
    }

    #[test]
    fn test_from_changes_requires_exactly_one() {
        let touched = Change::Touched(Transform::to(true));
        let dirty = Change::Dirty(Transform::to(true));

        assert_eq!(
            StateChange::from_changes(vec![touched.clone(), dirty]).unwrap_err(),
            ControlError::MultipleChangeKeys(2)
        );
        assert!(StateChange::from_changes(vec![]).is_err());
        assert_eq!(StateChange::from_changes(vec![touched]).unwrap().prop(), Prop::Touched);
    }

    #[test]
    fn test_transform_applies_to_previous() {
        let toggle = Transform::new(|b: &bool| !*b);
        assert!(toggle.apply(&false));
        assert_eq!(Transform::to(json!("x")).apply(&json!(null)), json!("x"));
    }
}
