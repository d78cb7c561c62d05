//! Replay snapshots
//!
//! A [`ReplayState`] captures a control's intrinsic state and turns it back
//! into an ordered list of state changes. Feeding those into a fresh
//! control reproduces everything observable except `id` and `parent`.
//! Replays are restartable: every run allocates fresh event ids and, for
//! containers, fresh child clones.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use forma_core::{ControlId, ControlKey, ControlResult, ErrorsStore, PendingStore, Scheduler, ValidatorStore};
use serde_json::Value;
use tracing::debug;

use crate::container::ControlsStore;
use crate::control::{Control, ControlKind, ControlOptions};
use crate::event::{Change, ControlEvent, EventKind, StateChange, Transform};

/// What a replay snapshot includes
#[derive(Clone, Debug)]
pub struct ReplayOptions {
    /// Replay children as fresh clones before the container's own state
    pub include_descendants: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions {
            include_descendants: true,
        }
    }
}

impl ReplayOptions {
    /// Container state only; the target keeps its own children
    pub fn shallow() -> Self {
        ReplayOptions {
            include_descendants: false,
        }
    }
}

struct Snapshot {
    origin: ControlId,
    kind: ControlKind,
    scheduler: Arc<Scheduler<ControlEvent>>,
    value: Value,
    disabled: bool,
    touched: bool,
    dirty: bool,
    readonly: bool,
    submitted: bool,
    validator_store: ValidatorStore,
    pending_store: PendingStore,
    errors_store: ErrorsStore,
    data: Value,
    children: Option<Vec<(ControlKey, ReplayState)>>,
}

/// Restartable snapshot of one control
#[derive(Clone)]
pub struct ReplayState {
    snapshot: Arc<Snapshot>,
}

fn rekey<V: Clone>(map: &BTreeMap<ControlId, V>, from: &ControlId, to: &ControlId) -> BTreeMap<ControlId, V> {
    map.iter()
        .map(|(k, v)| (if k == from { to.clone() } else { k.clone() }, v.clone()))
        .collect()
}

impl ReplayState {
    pub(crate) fn capture(control: &Control, options: &ReplayOptions) -> Self {
        let children = (control.is_container() && options.include_descendants).then(|| {
            control
                .controls_store()
                .iter()
                .map(|(key, child)| (key.clone(), ReplayState::capture(child, options)))
                .collect()
        });
        let state = control.inner.state.lock();
        ReplayState {
            snapshot: Arc::new(Snapshot {
                origin: control.id().clone(),
                kind: control.kind(),
                scheduler: Arc::clone(control.scheduler()),
                value: state.value.clone(),
                disabled: state.disabled,
                touched: state.touched,
                dirty: state.dirty,
                readonly: state.readonly,
                submitted: state.submitted,
                validator_store: state.validator_store.clone(),
                pending_store: state.pending_store.clone(),
                errors_store: state.errors_store.clone(),
                data: state.data.clone(),
                children,
            }),
        }
    }

    /// Id of the snapshotted control
    pub fn origin(&self) -> &ControlId {
        &self.snapshot.origin
    }

    pub fn kind(&self) -> ControlKind {
        self.snapshot.kind
    }

    /// Changes in replay order, with slices owned by the snapshotted
    /// control re-keyed to `target`
    pub fn changes_for(&self, target: &ControlId) -> ControlResult<Vec<Change>> {
        let s = &*self.snapshot;
        let mut changes = Vec::with_capacity(11);

        if let Some(children) = &s.children {
            let mut store = ControlsStore::new();
            for (key, child) in children {
                store.insert(key.clone(), child.instantiate_on(Arc::clone(&s.scheduler))?);
            }
            changes.push(Change::ControlsStore(Transform::to(store)));
        }

        let pending: PendingStore = s
            .pending_store
            .iter()
            .map(|id| if *id == s.origin { target.clone() } else { id.clone() })
            .collect();

        changes.extend([
            Change::Value(Transform::to(s.value.clone())),
            Change::Disabled(Transform::to(s.disabled)),
            Change::Touched(Transform::to(s.touched)),
            Change::Dirty(Transform::to(s.dirty)),
            Change::Readonly(Transform::to(s.readonly)),
            Change::Submitted(Transform::to(s.submitted)),
            Change::ValidatorStore(Transform::to(rekey(&s.validator_store, &s.origin, target))),
            Change::PendingStore(Transform::to(pending)),
            // errors last so the validator replay cannot clobber them
            Change::ErrorsStore(Transform::to(rekey(&s.errors_store, &s.origin, target))),
            Change::Data(Transform::to(s.data.clone())),
        ]);
        Ok(changes)
    }

    /// Synthetic events for `target`, with fresh ids
    pub fn events_for(&self, target: &Control) -> ControlResult<Vec<ControlEvent>> {
        Ok(self
            .changes_for(target.id())?
            .into_iter()
            .map(|change| target.new_event(EventKind::StateChange(StateChange::new(change))))
            .collect())
    }

    /// Feed the full sequence into `target` and drain
    pub fn replay_into(&self, target: &Control) -> ControlResult<()> {
        let events = self.events_for(target)?;
        debug!(origin = %self.snapshot.origin, target = %target.id(), events = events.len(), "replaying state");
        for event in events {
            target.source().enqueue(event);
        }
        target.scheduler().drain()
    }

    /// Build a fresh control of the snapshotted kind and replay into it
    pub fn instantiate(&self) -> ControlResult<Control> {
        self.instantiate_on(Arc::clone(&self.snapshot.scheduler))
    }

    fn instantiate_on(&self, scheduler: Arc<Scheduler<ControlEvent>>) -> ControlResult<Control> {
        let options = ControlOptions::new().scheduler(scheduler);
        let control = Control::allocate(self.snapshot.kind, Value::Null, &options);
        self.replay_into(&control)?;
        Ok(control)
    }
}

impl fmt::Debug for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayState")
            .field("origin", &self.snapshot.origin)
            .field("kind", &self.snapshot.kind)
            .field("children", &self.snapshot.children.as_ref().map(Vec::len))
            .finish()
    }
}

impl Control {
    pub fn replay_state(&self, options: ReplayOptions) -> ReplayState {
        ReplayState::capture(self, &options)
    }

    /// Structural copy: a fresh control of the same kind with this
    /// control's state replayed into it
    pub fn deep_clone(&self) -> ControlResult<Control> {
        self.replay_state(ReplayOptions::default()).instantiate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{FormArray, FormControl, FormGroup};
    use forma_core::{single_error, Validator};
    use serde_json::json;

    fn assert_same_state(a: &Control, b: &Control) {
        assert_eq!(a.value(), b.value());
        assert_eq!(a.enabled_value(), b.enabled_value());
        assert_eq!(a.disabled(), b.disabled());
        assert_eq!(a.touched(), b.touched());
        assert_eq!(a.dirty(), b.dirty());
        assert_eq!(a.readonly(), b.readonly());
        assert_eq!(a.submitted(), b.submitted());
        assert_eq!(a.pending(), b.pending());
        assert_eq!(a.errors(), b.errors());
        assert_eq!(a.status(), b.status());
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_leaf_round_trip() {
        let control = FormControl::new(json!(""));
        control.set_validators(vec![Validator::required()]).unwrap();
        control.mark_touched(true).unwrap();
        control.mark_pending(true).unwrap();
        control
            .set_errors_by(Some(single_error("remote", json!(1))), ControlId::named("svc"))
            .unwrap();
        control.set_data(json!({"hint": "x"})).unwrap();

        let copy = control.deep_clone().unwrap();
        assert_ne!(copy.id(), control.id());
        assert_same_state(&control, &copy);
        assert!(copy.errors_store().contains_key(copy.id()));
        assert!(copy.pending_store().contains(copy.id()));
    }

    #[test]
    fn test_replay_is_restartable() {
        let control = FormControl::new(json!(5));
        control.mark_dirty(true).unwrap();
        let replay = control.replay_state(ReplayOptions::default());

        let first = FormControl::new(json!(null));
        let second = FormControl::new(json!(null));
        replay.replay_into(&first).unwrap();
        replay.replay_into(&second).unwrap();

        assert_same_state(&control, &first);
        assert_same_state(&control, &second);
    }

    #[test]
    fn test_group_round_trip_clones_children() {
        let group = FormGroup::new([
            ("one", FormControl::new(json!("a"))),
            ("two", FormControl::new(json!(2))),
        ])
        .unwrap();
        group.get(["two"]).unwrap().mark_disabled(true).unwrap();

        let copy = group.deep_clone().unwrap();
        assert_same_state(&group, &copy);
        assert_eq!(copy.enabled_value(), json!({"one": "a"}));

        let original = group.get(["one"]).unwrap();
        let cloned = copy.get(["one"]).unwrap();
        assert!(!original.ptr_eq(&cloned));
        assert_eq!(cloned.parent().as_ref(), Some(copy.id()));
    }

    #[test]
    fn test_array_round_trip() {
        let array = FormArray::new([FormControl::new(json!(1)), FormControl::new(json!(2))]).unwrap();
        array.mark_submitted(true).unwrap();
        let copy = array.deep_clone().unwrap();
        assert_same_state(&array, &copy);
        assert_eq!(copy.size(), 2);
    }

    #[test]
    fn test_shallow_replay_pushes_value() {
        let source = FormGroup::new([("one", FormControl::new(json!("from")))]).unwrap();
        let target = FormGroup::new([("one", FormControl::new(json!("to")))]).unwrap();

        source.replay_state(ReplayOptions::shallow()).replay_into(&target).unwrap();
        assert_eq!(target.value(), json!({"one": "from"}));
    }
}
