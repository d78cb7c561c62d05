//! Container extension
//!
//! Containers own an ordered [`ControlsStore`] and derive their value,
//! enabled value, child errors and flag quantifiers from it.
//!
//! # Child bubbling
//!
//! Every registered child gets a forwarding subscription that wraps its
//! processed state events in a `ChildStateChange` and posts it to the
//! container. The container re-derives from its children, diffs, and
//! re-emits the envelope with its own side effects.
//!
//! # Value push-down
//!
//! A container `Value` change pushes each differing child value as a
//! `StateChange` sourced from the container, then re-queues itself with
//! `delay: 1`. Child values are not re-derived while the settle is
//! outstanding. When the settle comes back (and no descendant is still
//! settling) the container re-derives once and emits one value change.
//!
//! The whole nested shape is checked before anything is posted. A settle
//! queued in an earlier scheduler epoch was dropped by an aborted drain and
//! no longer counts as outstanding.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use forma_core::{
    merge_errors, ControlError, ControlId, ControlKey, ControlResult, EventId, Flag, Prop,
    Scheduler, Subscription, ValidationErrors,
};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::control::state::{quantify, ChildSummary, ControlState, Quantifiers};
use crate::control::{Applied, Control, ControlInner, ControlKind, Effects};
use crate::event::{Change, ChildStateChange, ControlEvent, EventKind, StateChange, Transform};

/// Ordered children of a container
#[derive(Clone, Default)]
pub struct ControlsStore {
    entries: Vec<(ControlKey, Control)>,
}

impl ControlsStore {
    pub fn new() -> Self {
        ControlsStore::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (ControlKey, Control)>) -> Self {
        let mut store = ControlsStore::new();
        for (key, control) in entries {
            store.insert(key, control);
        }
        store
    }

    /// Lookup by key. Index keys also match their string form.
    pub fn get(&self, key: &ControlKey) -> Option<&Control> {
        self.entries
            .iter()
            .find(|(k, _)| k == key || matches!(k, ControlKey::Index(i) if key.as_index() == Some(*i)))
            .map(|(_, control)| control)
    }

    pub fn contains_key(&self, key: &ControlKey) -> bool {
        self.get(key).is_some()
    }

    /// Replace the child under `key`, or append it
    pub fn insert(&mut self, key: ControlKey, control: Control) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = control,
            None => self.entries.push((key, control)),
        }
    }

    pub fn remove(&mut self, key: &ControlKey) -> Option<Control> {
        let position = self.entries.iter().position(|(k, _)| {
            k == key || matches!(k, ControlKey::Index(i) if key.as_index() == Some(*i))
        })?;
        Some(self.entries.remove(position).1)
    }

    /// Insert at a position, shifting later entries
    pub fn insert_at(&mut self, position: usize, key: ControlKey, control: Control) {
        let position = position.min(self.entries.len());
        self.entries.insert(position, (key, control));
    }

    /// Re-key every entry with its position
    pub fn reindexed(self) -> Self {
        ControlsStore {
            entries: self
                .entries
                .into_iter()
                .enumerate()
                .map(|(i, (_, control))| (ControlKey::Index(i), control))
                .collect(),
        }
    }

    pub fn key_of(&self, id: &ControlId) -> Option<ControlKey> {
        self.entries
            .iter()
            .find(|(_, control)| control.id() == id)
            .map(|(key, _)| key.clone())
    }

    pub fn keys(&self) -> Vec<ControlKey> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn controls(&self) -> impl Iterator<Item = &Control> {
        self.entries.iter().map(|(_, control)| control)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ControlKey, &Control)> {
        self.entries.iter().map(|(key, control)| (key, control))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn key_ids(&self) -> Vec<(ControlKey, ControlId)> {
        self.entries
            .iter()
            .map(|(key, control)| (key.clone(), control.id().clone()))
            .collect()
    }

    fn summaries(&self) -> Vec<ChildSummary> {
        self.controls().map(|c| c.inner.state.lock().summary()).collect()
    }
}

impl PartialEq for ControlsStore {
    fn eq(&self, other: &Self) -> bool {
        self.key_ids() == other.key_ids()
    }
}

impl fmt::Debug for ControlsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(key, control)| (key, control.id())))
            .finish()
    }
}

/// Container-only part of a control's state
pub(crate) struct ContainerState {
    pub(crate) store: ControlsStore,
    forwarders: HashMap<ControlId, Subscription>,
    pub(crate) children_errors: Option<ValidationErrors>,
    pub(crate) quantifiers: Quantifiers,
    /// Value events waiting for their push-down to settle, with the
    /// scheduler epoch they were queued in
    settles: BTreeMap<EventId, u64>,
}

impl ContainerState {
    pub(crate) fn new() -> Self {
        ContainerState {
            store: ControlsStore::new(),
            forwarders: HashMap::new(),
            children_errors: None,
            quantifiers: quantify(&[]),
            settles: BTreeMap::new(),
        }
    }

    fn has_settle(&self, epoch: u64) -> bool {
        self.settles.values().any(|queued| *queued == epoch)
    }

    fn is_settling(&self, epoch: u64) -> bool {
        self.has_settle(epoch) || self.store.controls().any(|c| c.inner.is_settling(epoch))
    }

    /// Drop settles whose delivery was lost to an aborted drain
    fn prune_settles(&mut self, epoch: u64) {
        self.settles.retain(|_, queued| *queued == epoch);
    }
}

impl ControlInner {
    /// Whether this control or any descendant has an outstanding push-down
    fn is_settling(&self, epoch: u64) -> bool {
        self.state.lock().container.as_ref().map_or(false, |c| c.is_settling(epoch))
    }
}

fn aggregate(kind: ControlKind, store: &ControlsStore, summaries: &[ChildSummary], enabled_only: bool) -> Value {
    let included = store
        .iter()
        .zip(summaries)
        .filter(|(_, summary)| !enabled_only || !summary.flag(Flag::Disabled));
    match kind {
        ControlKind::Array => Value::Array(included.map(|(_, s)| s.value.clone()).collect()),
        _ => Value::Object(
            included
                .map(|((key, _), s)| (key.as_name(), s.value.clone()))
                .collect::<Map<String, Value>>(),
        ),
    }
}

/// Re-derive aggregates from the children. With `values` false the value and
/// enabled value are left alone.
fn recompute(kind: ControlKind, state: &mut ControlState, values: bool) {
    let Some(container) = state.container.as_mut() else {
        return;
    };
    let summaries = container.store.summaries();
    container.quantifiers = quantify(&summaries);
    container.children_errors = merge_errors(
        summaries
            .iter()
            .filter(|s| !s.flag(Flag::Disabled))
            .filter_map(|s| s.errors.as_ref()),
    );
    if values {
        let value = aggregate(kind, &container.store, &summaries, false);
        let enabled_value = aggregate(kind, &container.store, &summaries, true);
        state.value = value;
        state.enabled_value = enabled_value;
    }
    state.refresh();
}

/// Re-run own validation when a recompute moved the value
fn revalidate_if_moved(
    inner: &ControlInner,
    state: &mut ControlState,
    before: (&Value, &Value),
    cause: &ControlEvent,
    effects: &mut Effects,
) -> bool {
    if (&state.value, &state.enabled_value) == before {
        return false;
    }
    state.rerun_validator(&inner.id);
    inner.start_validation(state, cause, effects);
    true
}

fn value_event(target: &Control, value: Value, source: &ControlId, cause: &ControlEvent) -> ControlEvent {
    let mut event = target
        .new_event(EventKind::StateChange(StateChange::new(Change::Value(Transform::to(value)))))
        .caused_by(cause)
        .with_meta(cause.meta.clone());
    event.source = source.clone();
    event
}

/// Pair every child with the value `next` assigns it, rejecting any
/// mismatch with the container's shape
fn shape_plan(id: &ControlId, kind: ControlKind, store: &ControlsStore, next: &Value) -> ControlResult<Vec<(Control, Value)>> {
    let invalid = |reason: &str| ControlError::InvalidValue {
        control: id.clone(),
        reason: reason.to_string(),
    };
    let mut plan = Vec::new();
    match (kind, next) {
        (ControlKind::Group, Value::Object(values)) => {
            if let Some(unknown) = values.keys().find(|k| !store.contains_key(&ControlKey::from(k.as_str()))) {
                return Err(ControlError::InvalidKey {
                    control: id.clone(),
                    key: ControlKey::from(unknown.as_str()),
                });
            }
            for (key, child) in store.iter() {
                let value = values
                    .get(&key.as_name())
                    .ok_or_else(|| invalid(&format!("missing value for key {}", key)))?;
                plan.push((child.clone(), value.clone()));
            }
        }
        (ControlKind::Array, Value::Array(values)) => {
            if values.len() > store.len() {
                return Err(ControlError::InvalidKey {
                    control: id.clone(),
                    key: ControlKey::Index(store.len()),
                });
            }
            if values.len() < store.len() {
                return Err(invalid(&format!("missing value for index {}", values.len())));
            }
            plan.extend(store.controls().cloned().zip(values.iter().cloned()));
        }
        (ControlKind::Group, _) => return Err(invalid("expected an object")),
        (ControlKind::Array, _) => return Err(invalid("expected an array")),
        (ControlKind::Leaf, _) => return Err(ControlError::NotAContainer(id.clone())),
    }
    Ok(plan)
}

/// Check `value` against the shape of `control` all the way down
fn check_shape(control: &Control, value: &Value) -> ControlResult<()> {
    if !control.is_container() {
        return Ok(());
    }
    let store = control.controls_store();
    for (child, value) in shape_plan(control.id(), control.kind(), &store, value)? {
        check_shape(&child, &value)?;
    }
    Ok(())
}

/// Child values a container value implies, for children whose value differs
fn plan_push(inner: &ControlInner, store: &ControlsStore, next: &Value) -> ControlResult<Vec<(Control, Value)>> {
    let mut plan = shape_plan(&inner.id, inner.kind, store, next)?;
    for (child, value) in &plan {
        check_shape(child, value)?;
    }
    plan.retain(|(child, value)| child.value() != *value);
    Ok(plan)
}

/// Container `Value` handler
pub(crate) fn apply_value(
    inner: &ControlInner,
    state: &mut ControlState,
    transform: &Transform<Value>,
    event: &ControlEvent,
    effects: &mut Effects,
) -> ControlResult<Applied> {
    let Some(container) = state.container.as_mut() else {
        return Err(ControlError::NotAContainer(inner.id.clone()));
    };

    let epoch = inner.source.scheduler().epoch();
    container.prune_settles(epoch);
    if container.settles.remove(&event.event_id).is_some() {
        if !container.settles.is_empty() {
            // superseded by a newer push; that one settles
            return Ok(Applied::Deferred);
        }
        if container.store.controls().any(|c| c.inner.is_settling(epoch)) {
            container.settles.insert(event.event_id, epoch);
            effects.post(&inner.source, event.clone().with_delay(1));
            return Ok(Applied::Deferred);
        }
        let before = (state.value.clone(), state.enabled_value.clone());
        recompute(inner.kind, state, true);
        if !revalidate_if_moved(inner, state, (&before.0, &before.1), event, effects) {
            return Ok(Applied::Unchanged);
        }
        trace!(control = %inner.id, event = %event.event_id, "container value settled");
        return Ok(Applied::Committed);
    }

    let next = transform.apply(&state.value);
    if next == state.value {
        return Ok(Applied::Unchanged);
    }
    let plan = plan_push(inner, &container.store, &next)?;
    if plan.is_empty() {
        return Ok(Applied::Unchanged);
    }
    trace!(control = %inner.id, event = %event.event_id, children = plan.len(), "pushing value to children");
    for (child, value) in plan {
        let push = value_event(&child, value, &inner.id, event);
        effects.post(child.source(), push);
    }
    container.settles.insert(event.event_id, epoch);
    effects.post(&inner.source, event.clone().with_delay(1));
    Ok(Applied::Deferred)
}

fn forward_child(inner: &ControlInner, child: &Control) -> Subscription {
    let parent = inner.me.clone();
    let child_id = child.id().clone();
    child.inner.links.subscribe(move |event: &ControlEvent| {
        if !event.is_state_event() {
            return;
        }
        let Some(parent) = parent.upgrade() else {
            return;
        };
        // key resolved now so list re-indexing is respected
        let key = {
            let state = parent.state.lock();
            state.container.as_ref().and_then(|c| c.store.key_of(&child_id))
        };
        let Some(key) = key else {
            return;
        };
        let mut envelope = parent
            .new_event(EventKind::ChildStateChange(ChildStateChange {
                key,
                child: child_id.clone(),
                event: Box::new(event.clone()),
                side_effects: Vec::new(),
            }))
            .caused_by(event)
            .with_meta(event.meta.clone());
        envelope.source = event.source.clone();
        parent.source.enqueue(envelope);
    })
}

fn parent_event(child: &Control, parent: Option<ControlId>, source: &ControlId, cause: &ControlEvent) -> ControlEvent {
    let mut event = child
        .new_event(EventKind::StateChange(StateChange::new(Change::Parent(Transform::to(parent)))))
        .caused_by(cause);
    event.source = source.clone();
    event
}

/// Container `ControlsStore` handler
pub(crate) fn apply_controls(
    inner: &ControlInner,
    state: &mut ControlState,
    transform: &Transform<ControlsStore>,
    event: &ControlEvent,
    effects: &mut Effects,
) -> ControlResult<Applied> {
    let Some(container) = state.container.as_mut() else {
        return Err(ControlError::NotAContainer(inner.id.clone()));
    };

    let mut next = transform.apply(&container.store);
    if inner.kind == ControlKind::Array {
        next = next.reindexed();
    }
    if next == container.store {
        return Ok(Applied::Unchanged);
    }
    check_children(&inner.id, inner.source.scheduler(), next.controls())?;

    let old_ids: HashSet<ControlId> = container.store.controls().map(|c| c.id().clone()).collect();
    let new_ids: HashSet<ControlId> = next.controls().map(|c| c.id().clone()).collect();
    let removed: Vec<Control> = container
        .store
        .controls()
        .filter(|c| !new_ids.contains(c.id()))
        .cloned()
        .collect();
    let added: Vec<Control> = next.controls().filter(|c| !old_ids.contains(c.id())).cloned().collect();

    for child in &removed {
        container.forwarders.remove(child.id());
        if child.parent().as_ref() == Some(&inner.id) {
            effects.post(child.source(), parent_event(child, None, &inner.id, event));
        }
    }
    for child in &added {
        container.forwarders.insert(child.id().clone(), forward_child(inner, child));
        effects.post(child.source(), parent_event(child, Some(inner.id.clone()), &inner.id, event));
    }
    container.store = next;
    debug!(control = %inner.id, added = added.len(), removed = removed.len(), "children updated");

    let before = (state.value.clone(), state.enabled_value.clone());
    recompute(inner.kind, state, true);
    revalidate_if_moved(inner, state, (&before.0, &before.1), event, effects);
    Ok(Applied::Committed)
}

/// Reject children that cannot be registered under `container`
pub(crate) fn check_children<'a>(
    container: &ControlId,
    scheduler: &Arc<Scheduler<ControlEvent>>,
    children: impl Iterator<Item = &'a Control>,
) -> ControlResult<()> {
    let mut seen = HashSet::new();
    for child in children {
        if child.id() == container {
            return Err(ControlError::InvalidValue {
                control: container.clone(),
                reason: "a container cannot contain itself".to_string(),
            });
        }
        if !seen.insert(child.id().clone()) {
            return Err(ControlError::AlreadyParented {
                child: child.id().clone(),
                parent: container.clone(),
            });
        }
        if let Some(parent) = child.parent().filter(|p| p != container) {
            return Err(ControlError::AlreadyParented {
                child: child.id().clone(),
                parent,
            });
        }
        if !Arc::ptr_eq(child.scheduler(), scheduler) {
            return Err(ControlError::InvalidValue {
                control: container.clone(),
                reason: format!("child {} runs on a different scheduler", child.id()),
            });
        }
    }
    Ok(())
}

/// `ChildStateChange` handler
pub(crate) fn process_child_change(inner: &ControlInner, mut event: ControlEvent) -> ControlResult<Option<ControlEvent>> {
    let Some(change) = event.child_state_change() else {
        return Ok(None);
    };
    let echo = change.event.source == inner.id;
    let child = change.child.clone();

    let mut effects = Effects::default();
    let props = {
        let mut state = inner.state.lock();
        let Some(container) = state.container.as_ref() else {
            return Ok(None);
        };
        if container.store.key_of(&child).is_none() {
            trace!(control = %inner.id, %child, "ignoring change from unregistered child");
            return Ok(None);
        }
        let skip_values = container.has_settle(inner.source.scheduler().epoch());

        let before = state.snapshot();
        let values = (state.value.clone(), state.enabled_value.clone());
        recompute(inner.kind, &mut state, !skip_values);
        revalidate_if_moved(inner, &mut state, (&values.0, &values.1), &event, &mut effects);
        before.diff(&state.snapshot())
    };
    effects.flush();

    if echo && props.is_empty() {
        trace!(control = %inner.id, %child, "suppressing echo of own push");
        return Ok(None);
    }
    if let EventKind::ChildStateChange(change) = &mut event.kind {
        change.side_effects = props;
    }
    Ok(Some(event))
}

// Structural and container-wide operations shared by the node types

impl Control {
    fn require_container(&self) -> ControlResult<()> {
        if self.is_container() {
            Ok(())
        } else {
            Err(ControlError::NotAContainer(self.id().clone()))
        }
    }

    /// Whether `id` names this control or one of its descendants
    pub fn contains_descendant(&self, id: &ControlId) -> bool {
        self.id() == id || self.controls_store().controls().any(|c| c.contains_descendant(id))
    }

    /// Replace the children with the result of `update`
    pub fn update_controls(
        &self,
        update: impl Fn(&ControlsStore) -> ControlsStore + Send + Sync + 'static,
    ) -> ControlResult<Vec<Prop>> {
        self.require_container()?;
        let next = update(&self.controls_store());
        check_children(self.id(), self.scheduler(), next.controls())?;
        for child in next.controls() {
            if child.contains_descendant(self.id()) {
                return Err(ControlError::InvalidValue {
                    control: self.id().clone(),
                    reason: format!("control {} would contain its own ancestor", child.id()),
                });
            }
        }
        self.emit(Change::ControlsStore(Transform::new(update)))
    }

    /// Replace every child
    pub fn set_controls(&self, store: ControlsStore) -> ControlResult<Vec<Prop>> {
        self.update_controls(move |_| store.clone())
    }

    /// Merge a partial value over the current one and set it
    pub fn patch_value(&self, partial: Value) -> ControlResult<Vec<Prop>> {
        self.require_container()?;
        let merged = merge_partial(self, partial)?;
        self.set_value(merged)
    }

    /// Push `false` for `flag` to every descendant, authored by this control
    pub(crate) fn push_flag_down(&self, flag: Flag, cause: &ControlEvent, out: &mut Vec<(Control, ControlEvent)>) {
        let change = match flag {
            Flag::Disabled => Change::Disabled(Transform::to(false)),
            Flag::Touched => Change::Touched(Transform::to(false)),
            Flag::Dirty => Change::Dirty(Transform::to(false)),
            Flag::Readonly => Change::Readonly(Transform::to(false)),
            Flag::Submitted => Change::Submitted(Transform::to(false)),
            Flag::Pending | Flag::Valid | Flag::Invalid => return,
        };
        for child in self.controls_store().controls() {
            let mut event = child
                .new_event(EventKind::StateChange(StateChange::new(change.clone())))
                .caused_by(cause)
                .with_meta(cause.meta.clone());
            event.source = self.id().clone();
            out.push((child.clone(), event));
            child.push_flag_down(flag, cause, out);
        }
    }
}

fn merge_partial(control: &Control, partial: Value) -> ControlResult<Value> {
    if !control.is_container() {
        return Ok(partial);
    }
    let invalid = |reason: &str| ControlError::InvalidValue {
        control: control.id().clone(),
        reason: reason.to_string(),
    };
    let mut merged = control.value();
    match (&mut merged, partial) {
        (Value::Object(current), Value::Object(patch)) => {
            for (name, value) in patch {
                let key = ControlKey::from(name.as_str());
                let child = control.child(&key).ok_or_else(|| ControlError::InvalidKey {
                    control: control.id().clone(),
                    key,
                })?;
                current.insert(name, merge_partial(&child, value)?);
            }
        }
        (Value::Array(current), Value::Array(patch)) => {
            if patch.len() > current.len() {
                return Err(ControlError::InvalidKey {
                    control: control.id().clone(),
                    key: ControlKey::Index(current.len()),
                });
            }
            for (index, value) in patch.into_iter().enumerate() {
                let child = control.child(&ControlKey::Index(index)).ok_or_else(|| ControlError::InvalidKey {
                    control: control.id().clone(),
                    key: ControlKey::Index(index),
                })?;
                current[index] = merge_partial(&child, value)?;
            }
        }
        (Value::Object(_), _) => return Err(invalid("expected an object")),
        (_, _) => return Err(invalid("expected an array")),
    }
    Ok(merged)
}
