//! Error types for FORMA
//!
//! These are programmer errors (bad wiring). Invalid user input is never an
//! error here; it travels as `ValidationErrors` data.

use thiserror::Error;

use crate::{ControlId, ControlKey, EventId};

/// Core FORMA errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    // Structural errors
    #[error("Invalid key {key} for control {control}")]
    InvalidKey { control: ControlId, key: ControlKey },

    #[error("Invalid value for control {control}: {reason}")]
    InvalidValue { control: ControlId, reason: String },

    #[error("Control {child} already belongs to {parent}")]
    AlreadyParented { child: ControlId, parent: ControlId },

    #[error("Control {0} is not a container")]
    NotAContainer(ControlId),

    // Event model errors
    #[error("State change must carry exactly one property, got {0}")]
    MultipleChangeKeys(usize),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Possible infinite loop: event {event} is {hops} causal hops past its origin {origin}")]
    InfiniteLoop {
        event: EventId,
        origin: EventId,
        hops: u64,
    },
}

/// Result type for FORMA operations
pub type ControlResult<T> = Result<T, ControlError>;
