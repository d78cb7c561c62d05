//! FORMA Test Harness - Control-graph fuzzing and scenario testing
//!
//! This crate provides:
//! - Event recording for assertions on emitted streams
//! - Randomized control-tree fuzzing with aggregation invariant checks
//! - End-to-end form scenarios
//! - Test logging setup

pub mod logging;
pub mod recorder;
pub mod tree_fuzzer;
pub mod scenarios;

pub use logging::*;
pub use recorder::*;
pub use tree_fuzzer::*;
pub use scenarios::*;
