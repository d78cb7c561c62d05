//! FORMA Controls - Reactive form controls
//!
//! Every control is driven by the same loop:
//! 1. A mutator builds a `StateChange` event and posts it to the control
//! 2. The shared scheduler delivers events in FIFO order
//! 3. The control applies the change and computes its side effects
//! 4. Processed events are emitted; containers receive their children's
//!    events as `ChildStateChange` envelopes and re-derive
//! 5. Value changes start a validation round that ends in
//!    `ValidationComplete`
//!
//! Node types: [`FormControl`] (leaf), [`FormGroup`] (named children) and
//! [`FormArray`] (indexed children). All three deref to the untyped
//! [`Control`] handle.

pub mod container;
pub mod control;
pub mod event;
pub mod nodes;

pub use container::ControlsStore;
pub use control::{
    current_scheduler, Control, ControlKind, ControlObserver, ControlOptions, PathSegment,
    Quantifier, ReplayOptions, ReplayState, ValidationMode, ValidationPhase, ValidationService,
    WeakControl,
};
pub use event::*;
pub use nodes::{is_container, is_control, AbstractControl, ControlContainer, FormArray, FormControl, FormGroup};
