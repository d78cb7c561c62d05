//! Identity types for FORMA
//!
//! Control identities are process-unique and double as event sources and as
//! keys into the per-source error, validator and pending stores.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONTROL_ID: AtomicU64 = AtomicU64::new(1);

/// Control identity - opaque, immutable for the life of a control
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControlId {
    /// Drawn from the process-wide sequence
    Auto(u64),
    /// Supplied by the caller (e.g. an external validation service)
    Named(Arc<str>),
}

impl ControlId {
    /// Allocate a fresh, process-unique id
    pub fn next() -> Self {
        ControlId::Auto(NEXT_CONTROL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a caller-named id
    pub fn named(name: impl AsRef<str>) -> Self {
        ControlId::Named(Arc::from(name.as_ref()))
    }

    #[inline]
    pub fn is_named(&self) -> bool {
        matches!(self, ControlId::Named(_))
    }
}

impl fmt::Debug for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlId::Auto(n) => write!(f, "Control({})", n),
            ControlId::Named(name) => write!(f, "Control({:?})", name),
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlId::Auto(n) => write!(f, "control-{}", n),
            ControlId::Named(name) => f.write_str(name),
        }
    }
}

impl From<&str> for ControlId {
    fn from(name: &str) -> Self {
        ControlId::named(name)
    }
}

/// Event identity - monotonically increasing per scheduler
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventId(pub u64);

impl EventId {
    pub const ZERO: EventId = EventId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        EventId(id)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence generator for event ids.
///
/// Owned by a [`Scheduler`](crate::Scheduler) instead of living in a global so
/// tests can reset it for deterministic ids.
#[derive(Debug, Default)]
pub struct EventIdCounter {
    last: AtomicU64,
}

impl EventIdCounter {
    pub fn new() -> Self {
        EventIdCounter::default()
    }

    /// Allocate the next event id
    #[inline]
    pub fn next(&self) -> EventId {
        EventId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Last allocated id
    #[inline]
    pub fn current(&self) -> EventId {
        EventId(self.last.load(Ordering::Relaxed))
    }

    /// Restart the sequence so that the next id is `n + 1`
    pub fn reset(&self, n: u64) {
        self.last.store(n, Ordering::Relaxed);
    }
}

/// Key of a child inside a container
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControlKey {
    /// Ordered-map container key
    Name(String),
    /// Indexed-list container position
    Index(usize),
}

impl ControlKey {
    /// Position of this key when used against a list container
    pub fn as_index(&self) -> Option<usize> {
        match self {
            ControlKey::Index(i) => Some(*i),
            ControlKey::Name(name) => name.parse().ok(),
        }
    }

    /// Name of this key when used against a map container
    pub fn as_name(&self) -> String {
        match self {
            ControlKey::Name(name) => name.clone(),
            ControlKey::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Debug for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKey::Name(name) => write!(f, "{:?}", name),
            ControlKey::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKey::Name(name) => f.write_str(name),
            ControlKey::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for ControlKey {
    fn from(name: &str) -> Self {
        ControlKey::Name(name.to_string())
    }
}

impl From<String> for ControlKey {
    fn from(name: String) -> Self {
        ControlKey::Name(name)
    }
}

impl From<usize> for ControlKey {
    fn from(index: usize) -> Self {
        ControlKey::Index(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_ids_are_unique() {
        let a = ControlId::next();
        let b = ControlId::next();
        assert_ne!(a, b);
        assert!(!a.is_named());
    }

    #[test]
    fn test_named_ids_compare_by_name() {
        assert_eq!(ControlId::named("svc"), ControlId::from("svc"));
        assert_eq!(ControlId::named("svc").to_string(), "svc");
    }

    #[test]
    fn test_counter_reset() {
        let counter = EventIdCounter::new();
        assert_eq!(counter.next(), EventId(1));
        assert_eq!(counter.next(), EventId(2));
        assert_eq!(counter.current(), EventId(2));

        counter.reset(100);
        assert_eq!(counter.next(), EventId(101));
    }

    #[test]
    fn test_control_key_conversions() {
        assert_eq!(ControlKey::from("2").as_index(), Some(2));
        assert_eq!(ControlKey::from("name").as_index(), None);
        assert_eq!(ControlKey::from(4usize).as_name(), "4");
    }
}
