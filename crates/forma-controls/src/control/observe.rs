//! Path observation
//!
//! `observe(path)` watches one property of a control, or a location inside
//! its JSON view. The first segment names the property; `controls` descends
//! into a child by key and continues from that child.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use forma_core::{ControlKey, ControlResult, EventBus, Flag, Prop, Subscription};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::control::Control;
use crate::event::{ControlEvent, EventKind};

/// One step of an observation path
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    fn as_key(&self) -> String {
        match self {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(i) => i.to_string(),
        }
    }

    fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Key(key) => key.parse().ok(),
            PathSegment::Index(i) => Some(*i),
        }
    }

    fn to_control_key(&self) -> ControlKey {
        match self {
            PathSegment::Key(key) => ControlKey::Name(key.clone()),
            PathSegment::Index(i) => ControlKey::Index(*i),
        }
    }
}

impl fmt::Debug for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{:?}", key),
            PathSegment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl From<Prop> for PathSegment {
    fn from(prop: Prop) -> Self {
        PathSegment::Key(prop.name())
    }
}

struct ObserverShared {
    last: Mutex<Value>,
    /// Whether `last` has moved since the observer was created
    changed: AtomicBool,
    replay_initial: bool,
    updates: EventBus<Value>,
}

/// Deduplicated, replay-last view of one path
pub struct ControlObserver {
    shared: Arc<ObserverShared>,
    path: Vec<PathSegment>,
    _trigger: Subscription,
}

impl ControlObserver {
    /// Last value seen at the path
    pub fn get(&self) -> Value {
        self.shared.last.lock().clone()
    }

    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    /// Receive updates. The last value is replayed immediately when there
    /// is one to replay.
    pub fn subscribe(&self, callback: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        let replay = self.shared.replay_initial || self.shared.changed.load(Ordering::Acquire);
        if replay {
            let last = self.get();
            callback(&last);
        }
        self.shared.updates.subscribe(callback)
    }
}

impl fmt::Debug for ControlObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlObserver")
            .field("path", &self.path)
            .field("last", &*self.shared.last.lock())
            .finish()
    }
}

/// Events that can move the value under a path rooted at `root`
fn triggers(root: Prop, event: &ControlEvent) -> bool {
    match root {
        Prop::Controls | Prop::ControlsStore => {
            event.is_state_event() || matches!(event.kind, EventKind::AsyncValidationStart)
        }
        // value observers wait for the post-validation barrier
        root if root.is_value_like() => matches!(event.kind, EventKind::AsyncValidationStart),
        root => event.touches(root),
    }
}

fn walk(mut value: Value, path: &[PathSegment]) -> Value {
    for segment in path {
        value = match value {
            Value::Object(mut map) => map.remove(&segment.as_key()).unwrap_or(Value::Null),
            Value::Array(mut items) => match segment.as_index() {
                Some(i) if i < items.len() => items.swap_remove(i),
                _ => Value::Null,
            },
            _ => Value::Null,
        };
    }
    value
}

fn resolve(control: &Control, root: Prop, rest: &[PathSegment]) -> Value {
    if matches!(root, Prop::Controls | Prop::ControlsStore) {
        if let Some((key, rest)) = rest.split_first() {
            let Some(child) = control.child(&key.to_control_key()) else {
                return Value::Null;
            };
            return match rest.split_first() {
                Some((next, rest)) => match next.as_key().parse::<Prop>() {
                    Ok(prop) => resolve(&child, prop, rest),
                    Err(_) => Value::Null,
                },
                None => child.value(),
            };
        }
    }
    walk(control.prop_value(root), rest)
}

impl Control {
    /// JSON view of one property
    pub fn prop_value(&self, prop: Prop) -> Value {
        let ids = |ids: Vec<String>| Value::Array(ids.into_iter().map(Value::String).collect());
        let errors = |errors: Option<Map<String, Value>>| errors.map_or(Value::Null, Value::Object);
        match prop {
            Prop::Value | Prop::RawValue => self.value(),
            Prop::EnabledValue => self.enabled_value(),
            Prop::Enabled => Value::Bool(self.enabled()),
            Prop::Disabled => Value::Bool(self.flag(Flag::Disabled)),
            Prop::Touched => Value::Bool(self.flag(Flag::Touched)),
            Prop::Dirty => Value::Bool(self.flag(Flag::Dirty)),
            Prop::Readonly => Value::Bool(self.flag(Flag::Readonly)),
            Prop::Submitted => Value::Bool(self.flag(Flag::Submitted)),
            Prop::Pending => Value::Bool(self.flag(Flag::Pending)),
            Prop::Valid => Value::Bool(self.valid()),
            Prop::Invalid => Value::Bool(self.invalid()),
            Prop::PendingStore => ids(self.pending_store().iter().map(ToString::to_string).collect()),
            Prop::Errors => errors(self.errors()),
            Prop::ErrorsStore => Value::Object(
                self.errors_store()
                    .into_iter()
                    .map(|(source, slice)| (source.to_string(), Value::Object(slice)))
                    .collect(),
            ),
            Prop::Validator => Value::Bool(self.validator().is_some()),
            Prop::ValidatorStore => ids(self.validator_store().keys().map(ToString::to_string).collect()),
            Prop::Status => Value::String(self.status().as_str().to_string()),
            Prop::Parent => self.parent().map_or(Value::Null, |p| Value::String(p.to_string())),
            Prop::Data => self.data(),
            Prop::Controls | Prop::ControlsStore => Value::Object(
                self.controls_store()
                    .iter()
                    .map(|(key, child)| (key.as_name(), child.value()))
                    .collect(),
            ),
            Prop::Size => Value::from(self.size()),
            Prop::ChildrenErrors => errors(self.children_errors()),
            Prop::Child(flag) => Value::Bool(self.quantifier(flag).child),
            Prop::Children(flag) => Value::Bool(self.quantifier(flag).children),
        }
    }

    /// Observe a path, starting with its current value
    pub fn observe<P: Into<PathSegment>>(&self, path: impl IntoIterator<Item = P>) -> ControlResult<ControlObserver> {
        self.observer(path.into_iter().map(Into::into).collect(), true)
    }

    /// Observe a path, skipping its current value
    pub fn observe_changes<P: Into<PathSegment>>(
        &self,
        path: impl IntoIterator<Item = P>,
    ) -> ControlResult<ControlObserver> {
        self.observer(path.into_iter().map(Into::into).collect(), false)
    }

    fn observer(&self, path: Vec<PathSegment>, replay_initial: bool) -> ControlResult<ControlObserver> {
        let (root, rest) = match path.split_first() {
            Some((root, rest)) => (root.as_key().parse::<Prop>()?, rest.to_vec()),
            None => (Prop::Value, Vec::new()),
        };

        let shared = Arc::new(ObserverShared {
            last: Mutex::new(resolve(self, root, &rest)),
            changed: AtomicBool::new(false),
            replay_initial,
            updates: EventBus::new(),
        });

        let weak = self.downgrade();
        let sink = Arc::clone(&shared);
        let trigger = self.events().subscribe(move |event: &ControlEvent| {
            if event.no_emit || !triggers(root, event) {
                return;
            }
            let Some(control) = weak.upgrade() else {
                return;
            };
            let next = resolve(&control, root, &rest);
            {
                let mut last = sink.last.lock();
                if *last == next {
                    return;
                }
                *last = next.clone();
            }
            sink.changed.store(true, Ordering::Release);
            sink.updates.emit(&next);
        });

        Ok(ControlObserver {
            shared,
            path,
            _trigger: trigger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{FormControl, FormGroup};
    use serde_json::json;

    fn collect(observer: &ControlObserver) -> (Arc<Mutex<Vec<Value>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = observer.subscribe(move |v| sink.lock().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn test_observe_emits_current_then_changes() {
        let control = FormControl::new(json!("a"));
        let observer = control.observe(["value"]).unwrap();
        let (seen, _sub) = collect(&observer);

        control.set_value(json!("b")).unwrap();
        control.set_value(json!("b")).unwrap();
        control.mark_touched(true).unwrap();

        assert_eq!(*seen.lock(), vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_observe_changes_skips_initial() {
        let control = FormControl::new(json!(1));
        let observer = control.observe_changes(["touched"]).unwrap();
        let (seen, _sub) = collect(&observer);
        assert!(seen.lock().is_empty());

        control.mark_touched(true).unwrap();
        assert_eq!(*seen.lock(), vec![json!(true)]);

        // late subscribers get the last change
        let (late, _late_sub) = collect(&observer);
        assert_eq!(*late.lock(), vec![json!(true)]);
    }

    #[test]
    fn test_observe_nested_child_value() {
        let group = FormGroup::new([("one", FormControl::new(json!("a")))]).unwrap();
        let observer = group.observe(["controls", "one", "value"]).unwrap();
        assert_eq!(observer.get(), json!("a"));

        group.get(["one"]).unwrap().set_value(json!("z")).unwrap();
        assert_eq!(observer.get(), json!("z"));
    }

    #[test]
    fn test_observe_into_value() {
        let group = FormGroup::new([
            ("name", FormControl::new(json!("x"))),
            ("age", FormControl::new(json!(3))),
        ])
        .unwrap();
        let observer = group.observe(["value", "age"]).unwrap();
        group.patch_value(json!({"age": 4})).unwrap();
        assert_eq!(observer.get(), json!(4));
    }

    #[test]
    fn test_unknown_root_is_rejected() {
        let control = FormControl::new(json!(1));
        assert!(control.observe(["colour"]).is_err());
    }

    #[test]
    fn test_observed_value_waits_for_sync_validation() {
        let control = FormControl::new(json!(1));
        let source = forma_core::ControlId::named("slow");
        let _service = control.validation_service(source.clone(), |_, _| {});
        let observer = control.observe(["value"]).unwrap();

        control.set_value(json!(2)).unwrap();
        assert_eq!(control.value(), json!(2));
        assert_eq!(observer.get(), json!(1));

        control.mark_validation_complete(&source).unwrap();
        assert_eq!(observer.get(), json!(2));
    }
}
