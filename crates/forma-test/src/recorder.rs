//! Event recorder

use std::sync::Arc;

use forma_controls::{Control, ControlEvent, EventKind};
use forma_core::{Prop, Subscription};
use parking_lot::Mutex;

/// Records every event a control emits while it is alive
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ControlEvent>>>,
    _subscription: Subscription,
}

impl EventRecorder {
    pub fn attach(control: &Control) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = control
            .events()
            .subscribe(move |event: &ControlEvent| sink.lock().push(event.clone()));
        EventRecorder {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<ControlEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Event kind names in emission order
    pub fn kinds(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.kind.name().to_string()).collect()
    }

    /// State events that changed `prop`, directly or as a side effect
    pub fn touching(&self, prop: Prop) -> Vec<ControlEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.is_state_event() && e.touches(prop))
            .cloned()
            .collect()
    }

    /// Number of events of one kind
    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind.name() == kind).count()
    }

    /// Validation phase events only
    pub fn validation_kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    EventKind::ValidationStart | EventKind::AsyncValidationStart | EventKind::ValidationComplete
                )
            })
            .map(|e| e.kind.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forma_controls::FormControl;
    use serde_json::json;

    #[test]
    fn test_recorder_collects_in_order() {
        let control = FormControl::new(json!(1));
        let recorder = EventRecorder::attach(&control);

        control.set_value(json!(2)).unwrap();
        assert_eq!(recorder.kinds(), vec!["StateChange", "AsyncValidationStart", "ValidationComplete"]);
        assert_eq!(recorder.touching(Prop::Value).len(), 1);
        assert_eq!(recorder.validation_kinds().len(), 2);

        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_recorder_stops_when_dropped() {
        let control = FormControl::new(json!(1));
        let recorder = EventRecorder::attach(&control);
        drop(recorder);
        assert_eq!(control.events().subscriber_count(), 0);
    }
}
