//! FORMA Core - Fundamental types and primitives
//!
//! This crate defines the pieces every control layer builds on:
//! - Identifiers (ControlId, EventId, ControlKey)
//! - Property names and derived status
//! - Validation data (error slices, validators, pending markers)
//! - The FIFO scheduler, control sources and the event bus

pub mod id;
pub mod prop;
pub mod validation;
pub mod scheduler;
pub mod bus;
pub mod error;

pub use id::*;
pub use prop::*;
pub use validation::*;
pub use scheduler::*;
pub use bus::*;
pub use error::*;
