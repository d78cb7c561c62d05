//! Validation protocol
//!
//! After every value change a control runs one validation round:
//!
//! ```text
//! value change ──► ValidationStart ──(all sync services complete)──┐
//!        │                                                         ▼
//!        └──(no sync services)──────────────────────────► AsyncValidationStart
//!                                                                  │
//!                     (all async services complete, or none) ──────┘──► ValidationComplete
//! ```
//!
//! External services register under their own [`ControlId`], write errors
//! into their own slice, then report completion. A new value change restarts
//! the round.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};

use forma_core::{ControlId, ControlResult, Subscription};
use tracing::{debug, warn};

use crate::control::{Control, ControlInner};
use crate::event::{ControlEvent, EventKind};

/// Where a control is in its current validation round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationPhase {
    Idle,
    AwaitingSync,
    AwaitingAsync,
}

/// Service registration kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidationMode {
    /// Must complete before `AsyncValidationStart`
    Sync,
    /// Must complete before `ValidationComplete`
    Async,
}

#[derive(Debug, Default)]
pub(crate) struct ValidationRound {
    sync_services: BTreeMap<ControlId, usize>,
    async_services: BTreeMap<ControlId, usize>,
    running_sync: BTreeSet<ControlId>,
    running_async: BTreeSet<ControlId>,
}

impl ValidationRound {
    pub(crate) fn phase(&self) -> ValidationPhase {
        if !self.running_sync.is_empty() {
            ValidationPhase::AwaitingSync
        } else if !self.running_async.is_empty() {
            ValidationPhase::AwaitingAsync
        } else {
            ValidationPhase::Idle
        }
    }

    /// Begin a round, discarding any round still in flight
    pub(crate) fn start(&mut self) -> Vec<EventKind> {
        self.running_async.clear();
        self.running_sync = self.sync_services.keys().cloned().collect();
        if self.running_sync.is_empty() {
            self.begin_async()
        } else {
            vec![EventKind::ValidationStart]
        }
    }

    fn begin_async(&mut self) -> Vec<EventKind> {
        self.running_async = self.async_services.keys().cloned().collect();
        if self.running_async.is_empty() {
            vec![EventKind::AsyncValidationStart, EventKind::ValidationComplete]
        } else {
            vec![EventKind::AsyncValidationStart]
        }
    }

    pub(crate) fn complete(&mut self, mode: ValidationMode, source: &ControlId) -> Vec<EventKind> {
        match mode {
            ValidationMode::Sync => {
                if self.running_sync.remove(source) && self.running_sync.is_empty() {
                    return self.begin_async();
                }
            }
            ValidationMode::Async => {
                if self.running_async.remove(source) && self.running_async.is_empty() {
                    return vec![EventKind::ValidationComplete];
                }
            }
        }
        Vec::new()
    }

    pub(crate) fn register(&mut self, mode: ValidationMode, source: ControlId) {
        *self.services_mut(mode).entry(source).or_insert(0) += 1;
    }

    /// Drop one registration. The last registration for a source also
    /// releases the source from a running round.
    pub(crate) fn deregister(&mut self, mode: ValidationMode, source: &ControlId) -> Vec<EventKind> {
        let services = self.services_mut(mode);
        match services.get_mut(source) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Vec::new()
            }
            Some(_) => {
                services.remove(source);
                self.complete(mode, source)
            }
            None => Vec::new(),
        }
    }

    fn services_mut(&mut self, mode: ValidationMode) -> &mut BTreeMap<ControlId, usize> {
        match mode {
            ValidationMode::Sync => &mut self.sync_services,
            ValidationMode::Async => &mut self.async_services,
        }
    }
}

type ServiceCallback = Arc<dyn Fn(&Control, &ControlEvent) + Send + Sync>;

/// Live registration of an external validator.
///
/// The callback runs on every `ValidationStart` (sync) or
/// `AsyncValidationStart` (async) of the control. It should write its
/// errors under its own source and then report completion. Dropping the
/// guard deregisters the service.
#[must_use = "dropping a ValidationService deregisters it"]
pub struct ValidationService {
    control: Weak<ControlInner>,
    source: ControlId,
    mode: ValidationMode,
    _subscription: Subscription,
}

impl ValidationService {
    pub(crate) fn register(
        control: &Control,
        source: ControlId,
        mode: ValidationMode,
        callback: ServiceCallback,
    ) -> Self {
        control.inner.state.lock().round.register(mode, source.clone());
        debug!(control = %control.id(), %source, ?mode, "validation service registered");

        let weak = Arc::downgrade(&control.inner);
        let trigger = weak.clone();
        let subscription = control.inner.links.subscribe(move |event: &ControlEvent| {
            let fires = matches!(
                (mode, &event.kind),
                (ValidationMode::Sync, EventKind::ValidationStart)
                    | (ValidationMode::Async, EventKind::AsyncValidationStart)
            );
            if !fires {
                return;
            }
            if let Some(inner) = trigger.upgrade() {
                callback(&Control { inner }, event);
            }
        });

        ValidationService {
            control: weak,
            source,
            mode,
            _subscription: subscription,
        }
    }

    pub fn source(&self) -> &ControlId {
        &self.source
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }
}

impl Drop for ValidationService {
    fn drop(&mut self) {
        let Some(inner) = self.control.upgrade() else {
            return;
        };
        let kinds = inner.state.lock().round.deregister(self.mode, &self.source);
        debug!(control = %inner.id, source = %self.source, "validation service deregistered");
        if let Err(err) = inner.post_phase_events(kinds) {
            warn!(control = %inner.id, %err, "validation events failed after deregistration");
        }
    }
}

impl fmt::Debug for ValidationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationService")
            .field("source", &self.source)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Control {
    /// Register a synchronous validation service under `source`
    pub fn validation_service(
        &self,
        source: ControlId,
        callback: impl Fn(&Control, &ControlEvent) + Send + Sync + 'static,
    ) -> ValidationService {
        ValidationService::register(self, source, ValidationMode::Sync, Arc::new(callback))
    }

    /// Register an asynchronous validation service under `source`
    pub fn async_validation_service(
        &self,
        source: ControlId,
        callback: impl Fn(&Control, &ControlEvent) + Send + Sync + 'static,
    ) -> ValidationService {
        ValidationService::register(self, source, ValidationMode::Async, Arc::new(callback))
    }

    /// Report that the sync service `source` finished this round
    pub fn mark_validation_complete(&self, source: &ControlId) -> ControlResult<()> {
        self.complete_validation(ValidationMode::Sync, source)
    }

    /// Report that the async service `source` finished this round
    pub fn mark_async_validation_complete(&self, source: &ControlId) -> ControlResult<()> {
        self.complete_validation(ValidationMode::Async, source)
    }

    fn complete_validation(&self, mode: ValidationMode, source: &ControlId) -> ControlResult<()> {
        let kinds = self.inner.state.lock().round.complete(mode, source);
        self.inner.post_phase_events(kinds)
    }

    pub fn validation_phase(&self) -> ValidationPhase {
        self.inner.state.lock().round.phase()
    }
}
