//! Control core
//!
//! A [`Control`] is a cheap, clonable handle to one node of the form graph.
//! All mutation goes through events posted to the control's own
//! [`ControlSource`]; getters read the state committed by the last processed
//! event.

mod mutation;
mod observe;
mod options;
mod process;
mod replay;
pub(crate) mod state;
pub(crate) mod validation;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use forma_core::{
    ControlId, ControlKey, ControlResult, ControlSource, ControlStatus, ErrorsStore, EventBus,
    EventId, EventSink, Flag, PendingStore, Prop, Scheduler, ValidationErrors, Validator,
    ValidatorStore,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::container::ControlsStore;
use crate::event::{ControlEvent, EventKind};

pub use observe::{ControlObserver, PathSegment};
pub use options::ControlOptions;
pub(crate) use process::{Applied, Effects};
pub use replay::{ReplayOptions, ReplayState};
pub use state::Quantifier;
use state::ControlState;
pub use validation::{ValidationMode, ValidationPhase, ValidationService};

thread_local! {
    static SCHEDULER: Arc<Scheduler<ControlEvent>> = Arc::new(Scheduler::new());
}

/// Scheduler shared by every control created on this thread without an
/// explicit scheduler
pub fn current_scheduler() -> Arc<Scheduler<ControlEvent>> {
    SCHEDULER.with(Arc::clone)
}

/// Node kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// Scalar leaf
    Leaf,
    /// Ordered map of named children
    Group,
    /// Contiguously indexed children
    Array,
}

impl ControlKind {
    #[inline]
    pub fn is_container(self) -> bool {
        !matches!(self, ControlKind::Leaf)
    }
}

pub(crate) struct ControlInner {
    pub(crate) id: ControlId,
    pub(crate) kind: ControlKind,
    pub(crate) source: ControlSource<ControlEvent>,
    /// Public stream; `no_emit` events are withheld
    pub(crate) events: EventBus<ControlEvent>,
    /// Internal stream feeding parents and validation services
    pub(crate) links: EventBus<ControlEvent>,
    pub(crate) state: Mutex<ControlState>,
    /// Side effects of events whose public caller is waiting for them
    awaiting: Mutex<HashMap<EventId, Vec<Prop>>>,
    pub(crate) me: Weak<ControlInner>,
}

impl ControlInner {
    pub(crate) fn new_event(&self, kind: EventKind) -> ControlEvent {
        let id = self.source.scheduler().counter().next();
        ControlEvent::new(id, self.id.clone(), kind)
    }

    /// Post root-caused validation phase events and drain
    pub(crate) fn post_phase_events(&self, kinds: Vec<EventKind>) -> ControlResult<()> {
        if kinds.is_empty() {
            return Ok(());
        }
        for kind in kinds {
            let event = self.new_event(kind);
            self.source.enqueue(event);
        }
        self.source.scheduler().drain()
    }

    fn record_outcome(&self, event: &ControlEvent) {
        if let Some(slot) = self.awaiting.lock().get_mut(&event.event_id) {
            *slot = event.side_effects().to_vec();
        }
    }
}

impl EventSink<ControlEvent> for ControlInner {
    fn deliver(&self, event: ControlEvent) -> ControlResult<()> {
        let Some(processed) = self.process_event(event)? else {
            return Ok(());
        };
        self.record_outcome(&processed);
        self.links.emit(&processed);
        if !processed.no_emit {
            self.events.emit(&processed);
        }
        Ok(())
    }
}

/// Handle to a control of any kind
#[derive(Clone)]
pub struct Control {
    pub(crate) inner: Arc<ControlInner>,
}

/// Non-owning handle, for subscribers that must not keep a control alive
#[derive(Clone, Debug)]
pub struct WeakControl {
    inner: Weak<ControlInner>,
}

impl WeakControl {
    pub fn upgrade(&self) -> Option<Control> {
        self.inner.upgrade().map(|inner| Control { inner })
    }
}

impl Control {
    /// Allocate a control with default state. Options are not applied.
    pub(crate) fn allocate(kind: ControlKind, value: Value, options: &ControlOptions) -> Control {
        let scheduler = options.scheduler.clone().unwrap_or_else(current_scheduler);
        let id = options.id.clone().unwrap_or_else(ControlId::next);
        let inner = Arc::new_cyclic(|me: &Weak<ControlInner>| {
            let target: Weak<dyn EventSink<ControlEvent>> = me.clone();
            ControlInner {
                id,
                kind,
                source: ControlSource::new(scheduler, target),
                events: EventBus::new(),
                links: EventBus::new(),
                state: Mutex::new(ControlState::new(kind, value)),
                awaiting: Mutex::new(HashMap::new()),
                me: me.clone(),
            }
        });
        Control { inner }
    }

    /// Post a burst of changes authored by this control, then drain
    pub(crate) fn apply_burst(&self, changes: Vec<crate::event::Change>) -> ControlResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        for change in changes {
            let event = self.inner.new_event(EventKind::StateChange(
                crate::event::StateChange::new(change),
            ));
            self.inner.source.enqueue(event);
        }
        self.scheduler().drain()
    }

    /// Post `event` and drain. Returns the side effects reported for it, or
    /// an empty list when it was discarded or is still queued behind a
    /// running drain.
    pub fn dispatch(&self, event: ControlEvent) -> ControlResult<Vec<Prop>> {
        self.dispatch_with(event, Vec::new())
    }

    /// Post `event` followed by `extra` deliveries, then drain
    pub(crate) fn dispatch_with(
        &self,
        event: ControlEvent,
        extra: Vec<(Control, ControlEvent)>,
    ) -> ControlResult<Vec<Prop>> {
        let id = event.event_id;
        self.inner.awaiting.lock().insert(id, Vec::new());
        self.inner.source.enqueue(event);
        for (target, event) in extra {
            target.inner.source.enqueue(event);
        }
        let result = self.scheduler().drain();
        let props = self.inner.awaiting.lock().remove(&id).unwrap_or_default();
        result.map(|_| props)
    }

    /// Build an event authored by this control with a fresh id
    pub fn new_event(&self, kind: EventKind) -> ControlEvent {
        self.inner.new_event(kind)
    }

    pub fn id(&self) -> &ControlId {
        &self.inner.id
    }

    pub fn kind(&self) -> ControlKind {
        self.inner.kind
    }

    pub fn is_container(&self) -> bool {
        self.inner.kind.is_container()
    }

    /// Input channel of this control
    pub fn source(&self) -> &ControlSource<ControlEvent> {
        &self.inner.source
    }

    /// Processed events, in delivery order
    pub fn events(&self) -> &EventBus<ControlEvent> {
        &self.inner.events
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<ControlEvent>> {
        self.inner.source.scheduler()
    }

    pub fn ptr_eq(&self, other: &Control) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakControl {
        WeakControl {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // Reads

    pub fn value(&self) -> Value {
        self.inner.state.lock().value.clone()
    }

    /// Same as [`value`](Self::value) for every node kind
    pub fn raw_value(&self) -> Value {
        self.value()
    }

    /// Value restricted to children that are not disabled
    pub fn enabled_value(&self) -> Value {
        self.inner.state.lock().enabled_value.clone()
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.inner.state.lock().flag(flag)
    }

    pub fn disabled(&self) -> bool {
        self.flag(Flag::Disabled)
    }

    pub fn enabled(&self) -> bool {
        !self.disabled()
    }

    pub fn touched(&self) -> bool {
        self.flag(Flag::Touched)
    }

    pub fn dirty(&self) -> bool {
        self.flag(Flag::Dirty)
    }

    pub fn readonly(&self) -> bool {
        self.flag(Flag::Readonly)
    }

    pub fn submitted(&self) -> bool {
        self.flag(Flag::Submitted)
    }

    pub fn pending(&self) -> bool {
        self.flag(Flag::Pending)
    }

    pub fn pending_store(&self) -> PendingStore {
        self.inner.state.lock().pending_store.clone()
    }

    /// Combined errors: child errors overlaid by this control's own slices
    pub fn errors(&self) -> Option<ValidationErrors> {
        self.inner.state.lock().errors.clone()
    }

    pub fn errors_store(&self) -> ErrorsStore {
        self.inner.state.lock().errors_store.clone()
    }

    pub fn validator(&self) -> Option<Validator> {
        self.inner.state.lock().validator.clone()
    }

    pub fn validator_store(&self) -> ValidatorStore {
        self.inner.state.lock().validator_store.clone()
    }

    pub fn status(&self) -> ControlStatus {
        self.inner.state.lock().status
    }

    pub fn valid(&self) -> bool {
        self.status() == ControlStatus::Valid
    }

    pub fn invalid(&self) -> bool {
        self.status() == ControlStatus::Invalid
    }

    pub fn parent(&self) -> Option<ControlId> {
        self.inner.state.lock().parent.clone()
    }

    pub fn data(&self) -> Value {
        self.inner.state.lock().data.clone()
    }

    // Container reads. Leaves report no children.

    pub fn controls_store(&self) -> ControlsStore {
        self.inner
            .state
            .lock()
            .container
            .as_ref()
            .map(|c| c.store.clone())
            .unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.inner.state.lock().container.as_ref().map_or(0, |c| c.store.len())
    }

    pub fn child(&self, key: &ControlKey) -> Option<Control> {
        let state = self.inner.state.lock();
        let store = &state.container.as_ref()?.store;
        store.get(key).cloned()
    }

    pub fn children_errors(&self) -> Option<ValidationErrors> {
        self.inner.state.lock().children_errors().cloned()
    }

    /// Quantified flag over the children; default for leaves
    pub fn quantifier(&self, flag: Flag) -> Quantifier {
        self.inner
            .state
            .lock()
            .container
            .as_ref()
            .and_then(|c| c.quantifiers.get(&flag).copied())
            .unwrap_or_default()
    }

    /// Walk nested containers one key per step
    pub fn get<K: Into<ControlKey>>(&self, path: impl IntoIterator<Item = K>) -> Option<Control> {
        let mut current = self.clone();
        for key in path {
            let key = key.into();
            current = current.child(&key)?;
        }
        Some(current)
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

impl PartialEq for Control {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Control {}
