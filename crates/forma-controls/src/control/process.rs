//! Event processing
//!
//! `StateChange` events are dispatched to one handler per property. Each
//! handler applies the transform, drops structurally equal results and
//! commits the rest; the event is then re-emitted with the side effects
//! found by diffing snapshots. Follow-up events (validation phases, value
//! push-down) are collected while the state lock is held and posted after
//! it is released.

use forma_core::{normalize_store, ControlError, ControlResult, ControlSource};
use tracing::{trace, warn};

use crate::container;
use crate::control::state::ControlState;
use crate::control::ControlInner;
use crate::event::{Change, ControlEvent, EventKind, Transform};

/// Result of one handler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Applied {
    /// Transform produced an equal value; nothing is emitted
    Unchanged,
    /// Committed; emit with side effects
    Committed,
    /// Accepted but re-queued for later (container value settle)
    Deferred,
}

/// Deliveries collected during a handler
#[derive(Default)]
pub(crate) struct Effects {
    posts: Vec<(ControlSource<ControlEvent>, ControlEvent)>,
}

impl Effects {
    pub(crate) fn post(&mut self, target: &ControlSource<ControlEvent>, event: ControlEvent) {
        self.posts.push((target.clone(), event));
    }

    /// Enqueue in collection order. Only called from inside a drain.
    pub(crate) fn flush(self) {
        for (target, event) in self.posts {
            target.enqueue(event);
        }
    }
}

fn apply_flag(slot: &mut bool, transform: &Transform<bool>) -> Applied {
    let next = transform.apply(slot);
    if next == *slot {
        return Applied::Unchanged;
    }
    *slot = next;
    Applied::Committed
}

fn apply_value<T: PartialEq>(slot: &mut T, next: T) -> Applied {
    if next == *slot {
        return Applied::Unchanged;
    }
    *slot = next;
    Applied::Committed
}

impl ControlInner {
    pub(crate) fn process_event(&self, event: ControlEvent) -> ControlResult<Option<ControlEvent>> {
        match &event.kind {
            EventKind::StateChange(_) => self.process_state_change(event),
            EventKind::ChildStateChange(_) if self.kind.is_container() => {
                container::process_child_change(self, event)
            }
            EventKind::ChildStateChange(_) => {
                warn!(control = %self.id, event = %event.event_id, "child change delivered to a leaf");
                Ok(None)
            }
            _ => Ok(Some(event)),
        }
    }

    fn process_state_change(&self, mut event: ControlEvent) -> ControlResult<Option<ControlEvent>> {
        let Some(change) = event.state_change().map(|sc| sc.change.clone()) else {
            return Ok(None);
        };
        let primary = change.prop();

        let mut effects = Effects::default();
        let side_effects = {
            let mut state = self.state.lock();
            let before = state.snapshot();
            match self.apply_change(&mut state, &change, &event, &mut effects)? {
                Applied::Committed => Some(before.diff(&state.snapshot())),
                Applied::Unchanged | Applied::Deferred => None,
            }
        };
        effects.flush();

        let Some(mut props) = side_effects.filter(|props| !props.is_empty()) else {
            trace!(control = %self.id, event = %event.event_id, prop = %primary, "state change not emitted");
            return Ok(None);
        };
        props.retain(|p| *p != primary);
        trace!(control = %self.id, event = %event.event_id, prop = %primary, ?props, "state change applied");

        if let EventKind::StateChange(sc) = &mut event.kind {
            sc.side_effects = props;
        }
        Ok(Some(event))
    }

    fn apply_change(
        &self,
        state: &mut ControlState,
        change: &Change,
        event: &ControlEvent,
        effects: &mut Effects,
    ) -> ControlResult<Applied> {
        let applied = match change {
            Change::Value(transform) if self.kind.is_container() => {
                return container::apply_value(self, state, transform, event, effects);
            }
            Change::ControlsStore(transform) if self.kind.is_container() => {
                return container::apply_controls(self, state, transform, event, effects);
            }
            Change::ControlsStore(_) => return Err(ControlError::NotAContainer(self.id.clone())),
            Change::Value(transform) => {
                let next = transform.apply(&state.value);
                if next == state.value {
                    return Ok(Applied::Unchanged);
                }
                state.enabled_value = next.clone();
                state.value = next;
                state.rerun_validator(&self.id);
                self.start_validation(state, event, effects);
                return Ok(Applied::Committed);
            }
            Change::Disabled(transform) => apply_flag(&mut state.disabled, transform),
            Change::Touched(transform) => apply_flag(&mut state.touched, transform),
            Change::Dirty(transform) => apply_flag(&mut state.dirty, transform),
            Change::Readonly(transform) => apply_flag(&mut state.readonly, transform),
            Change::Submitted(transform) => apply_flag(&mut state.submitted, transform),
            Change::PendingStore(transform) => {
                let next = transform.apply(&state.pending_store);
                apply_value(&mut state.pending_store, next)
            }
            Change::ErrorsStore(transform) => {
                let next = normalize_store(transform.apply(&state.errors_store));
                apply_value(&mut state.errors_store, next)
            }
            Change::ValidatorStore(transform) => {
                let next = transform.apply(&state.validator_store);
                if next == state.validator_store {
                    return Ok(Applied::Unchanged);
                }
                state.replace_validators(next, &self.id);
                return Ok(Applied::Committed);
            }
            Change::Parent(transform) => {
                let next = transform.apply(&state.parent);
                apply_value(&mut state.parent, next)
            }
            Change::Data(transform) => {
                let next = transform.apply(&state.data);
                apply_value(&mut state.data, next)
            }
        };
        if applied == Applied::Committed {
            state.refresh();
        }
        Ok(applied)
    }

    /// Begin a validation round caused by `cause`
    pub(crate) fn start_validation(&self, state: &mut ControlState, cause: &ControlEvent, effects: &mut Effects) {
        let kinds = state.round.start();
        trace!(control = %self.id, phase = ?state.round.phase(), "validation round started");
        for kind in kinds {
            let event = self.new_event(kind).caused_by(cause).with_meta(cause.meta.clone());
            effects.post(&self.source, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::container::ControlsStore;
    use crate::event::{Change, EventKind, StateChange, Transform};
    use crate::nodes::FormControl;
    use forma_core::{ControlError, Prop};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_no_op_change_is_not_emitted() {
        let control = FormControl::new(json!("same"));
        let count = Arc::new(Mutex::new(0));
        let _sub = {
            let count = count.clone();
            control.events().subscribe(move |_| *count.lock() += 1)
        };

        assert!(control.set_value(json!("same")).unwrap().is_empty());
        assert!(control.mark_touched(false).unwrap().is_empty());
        assert!(control.set_data(json!(null)).unwrap().is_empty());
        assert_eq!(*count.lock(), 0);
    }

    #[test]
    fn test_value_change_reports_side_effects() {
        let control = FormControl::new(json!(1));
        let props = control.set_value(json!(2)).unwrap();
        assert!(props.contains(&Prop::RawValue));
        assert!(props.contains(&Prop::EnabledValue));
        assert!(!props.contains(&Prop::Value));
    }

    #[test]
    fn test_controls_store_rejected_on_leaf() {
        let control = FormControl::new(json!(1));
        let event = control.new_event(EventKind::StateChange(StateChange::new(Change::ControlsStore(
            Transform::new(|store: &ControlsStore| store.clone()),
        ))));
        let err = control.dispatch(event).unwrap_err();
        assert!(matches!(err, ControlError::NotAContainer(_)));
        assert_eq!(control.scheduler().pending(), 0);
    }

    #[test]
    fn test_no_emit_updates_state_silently() {
        let control = FormControl::new(json!(1));
        let count = Arc::new(Mutex::new(0));
        let _sub = {
            let count = count.clone();
            control.events().subscribe(move |_| *count.lock() += 1)
        };

        let event = control
            .new_event(EventKind::StateChange(StateChange::new(Change::Value(Transform::to(json!(5))))))
            .with_no_emit(true);
        control.dispatch(event).unwrap();

        assert_eq!(control.value(), json!(5));
        assert_eq!(*count.lock(), 0);
    }
}
