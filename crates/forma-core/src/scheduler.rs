//! FIFO event scheduler
//!
//! Every control posts into its [`ControlSource`], which enqueues on the
//! shared [`Scheduler`]. Delivery is never synchronous inside `enqueue`: the
//! outermost `next` call drains the queue to quiescence, and calls made while
//! a drain is running only enqueue.
//!
//! # Ordering
//!
//! 1. Deliveries run in post order across all controls of a scheduler.
//! 2. A delivery with `delay > 0` is decremented and moved to the back of
//!    the queue instead of running.
//! 3. A delivery whose event is more than `loop_threshold` causal hops past
//!    its originating event aborts the drain with [`ControlError::InfiniteLoop`].
//!    Hops grow along a chain of causes, not with fan-out, so a wide tree
//!    never trips the guard while a feedback cycle always does.
//!
//! # Aborted drains
//!
//! A failed drain drops every queued delivery and bumps the scheduler's
//! [`epoch`](Scheduler::epoch). Bookkeeping that waits for a queued delivery
//! records the epoch it was queued in and treats older epochs as gone.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::{ControlError, ControlResult, EventId, EventIdCounter};

/// Scheduling metadata every queued event exposes
pub trait QueuedEvent: Send + Sync + 'static {
    fn event_id(&self) -> EventId;
    fn originating_event_id(&self) -> EventId;
    /// Causal distance from the originating event (0 for root-caused events)
    fn hops(&self) -> u64;
    fn delay(&self) -> u32;
    fn set_delay(&mut self, delay: u32);
}

/// Receiver of queued events (a control's processing pipeline)
pub trait EventSink<E>: Send + Sync {
    fn deliver(&self, event: E) -> ControlResult<()>;
}

/// Scheduler configuration
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Maximum causal hops from the originating event before a delivery is
    /// treated as an unbounded feedback cycle
    pub loop_threshold: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { loop_threshold: 500 }
    }
}

impl SchedulerConfig {
    /// Tight threshold for tests that want the guard to trip early
    pub fn strict() -> Self {
        SchedulerConfig { loop_threshold: 100 }
    }

    /// Generous threshold for very deep control trees
    pub fn relaxed() -> Self {
        SchedulerConfig { loop_threshold: 5_000 }
    }
}

struct Delivery<E> {
    target: Weak<dyn EventSink<E>>,
    event: E,
}

/// Shared FIFO queue plus the event id sequence
pub struct Scheduler<E> {
    queue: Mutex<VecDeque<Delivery<E>>>,
    draining: AtomicBool,
    epoch: AtomicU64,
    counter: EventIdCounter,
    config: SchedulerConfig,
}

impl<E: QueuedEvent> Scheduler<E> {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Scheduler {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            counter: EventIdCounter::new(),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Event id sequence used by every control on this scheduler
    pub fn counter(&self) -> &EventIdCounter {
        &self.counter
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Number of drains that aborted and dropped their queue
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Number of deliveries waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Append a delivery to the back of the queue without running anything
    pub fn enqueue(&self, target: Weak<dyn EventSink<E>>, event: E) {
        self.queue.lock().push_back(Delivery { target, event });
    }

    /// Run queued deliveries until the queue is empty.
    ///
    /// Returns immediately when a drain is already running further up the
    /// stack. On error the queue is cleared and the error returned.
    pub fn drain(&self) -> ControlResult<()> {
        if self.draining.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _guard = DrainGuard(&self.draining);

        let result = self.run_queue();
        if result.is_err() {
            let dropped = {
                let mut queue = self.queue.lock();
                let dropped = queue.len();
                queue.clear();
                dropped
            };
            let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(dropped, epoch, "drain aborted, queue cleared");
        }
        result
    }

    fn run_queue(&self) -> ControlResult<()> {
        loop {
            let next = self.queue.lock().pop_front();
            let Some(mut delivery) = next else {
                return Ok(());
            };

            // Stage 1: delayed deliveries go to the back
            let delay = delivery.event.delay();
            if delay > 0 {
                delivery.event.set_delay(delay - 1);
                self.queue.lock().push_back(delivery);
                continue;
            }

            // Stage 2: loop guard
            self.check_loop(&delivery.event)?;

            // Stage 3: deliver to a live target
            let Some(target) = delivery.target.upgrade() else {
                trace!(event = %delivery.event.event_id(), "dropping delivery for released control");
                continue;
            };
            target.deliver(delivery.event)?;
        }
    }

    fn check_loop(&self, event: &E) -> ControlResult<()> {
        let hops = event.hops();
        if hops > self.config.loop_threshold {
            error!(
                event = %event.event_id(),
                origin = %event.originating_event_id(),
                hops,
                "possible infinite loop between linked controls"
            );
            return Err(ControlError::InfiniteLoop {
                event: event.event_id(),
                origin: event.originating_event_id(),
                hops,
            });
        }
        Ok(())
    }
}

impl<E: QueuedEvent> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("queued", &self.queue.lock().len())
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .field("last_event", &self.counter.current())
            .field("config", &self.config)
            .finish()
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-writer input channel of one control
pub struct ControlSource<E> {
    scheduler: Arc<Scheduler<E>>,
    target: Weak<dyn EventSink<E>>,
}

impl<E: QueuedEvent> ControlSource<E> {
    pub fn new(scheduler: Arc<Scheduler<E>>, target: Weak<dyn EventSink<E>>) -> Self {
        ControlSource { scheduler, target }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<E>> {
        &self.scheduler
    }

    /// Queue an event without draining
    pub fn enqueue(&self, event: E) {
        self.scheduler.enqueue(self.target.clone(), event);
    }

    /// Queue an event, then drain the scheduler to quiescence
    pub fn next(&self, event: E) -> ControlResult<()> {
        self.enqueue(event);
        self.scheduler.drain()
    }
}

impl<E> Clone for ControlSource<E> {
    fn clone(&self) -> Self {
        ControlSource {
            scheduler: Arc::clone(&self.scheduler),
            target: self.target.clone(),
        }
    }
}

impl<E> fmt::Debug for ControlSource<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSource")
            .field("live", &(self.target.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct TestEvent {
        id: EventId,
        origin: EventId,
        hops: u64,
        delay: u32,
        label: &'static str,
    }

    impl QueuedEvent for TestEvent {
        fn event_id(&self) -> EventId {
            self.id
        }
        fn originating_event_id(&self) -> EventId {
            self.origin
        }
        fn hops(&self) -> u64 {
            self.hops
        }
        fn delay(&self) -> u32 {
            self.delay
        }
        fn set_delay(&mut self, delay: u32) {
            self.delay = delay;
        }
    }

    /// Records deliveries and optionally re-posts follow-ups while draining
    struct Recorder {
        scheduler: Arc<Scheduler<TestEvent>>,
        me: Weak<Recorder>,
        seen: Mutex<Vec<&'static str>>,
        follow_up: Option<&'static str>,
    }

    impl EventSink<TestEvent> for Recorder {
        fn deliver(&self, event: TestEvent) -> ControlResult<()> {
            self.seen.lock().push(event.label);
            if let (Some(label), "root") = (self.follow_up, event.label) {
                let id = self.scheduler.counter().next();
                let target: Weak<dyn EventSink<TestEvent>> = self.me.clone();
                let source = ControlSource::new(self.scheduler.clone(), target);
                // Re-entrant post: must only enqueue
                source.next(TestEvent { id, origin: id, hops: 0, delay: 0, label })?;
                assert_eq!(self.seen.lock().last(), Some(&"root"));
            }
            Ok(())
        }
    }

    fn recorder(scheduler: &Arc<Scheduler<TestEvent>>, follow_up: Option<&'static str>) -> Arc<Recorder> {
        Arc::new_cyclic(|me| Recorder {
            scheduler: scheduler.clone(),
            me: me.clone(),
            seen: Mutex::new(Vec::new()),
            follow_up,
        })
    }

    fn event(scheduler: &Scheduler<TestEvent>, delay: u32, label: &'static str) -> TestEvent {
        let id = scheduler.counter().next();
        TestEvent { id, origin: id, hops: 0, delay, label }
    }

    fn source_for(scheduler: &Arc<Scheduler<TestEvent>>, rec: &Arc<Recorder>) -> ControlSource<TestEvent> {
        let weak: Weak<dyn EventSink<TestEvent>> = Arc::<Recorder>::downgrade(rec);
        ControlSource::new(scheduler.clone(), weak)
    }

    #[test]
    fn test_reentrant_next_is_deferred() {
        let scheduler = Arc::new(Scheduler::new());
        let rec = recorder(&scheduler, Some("follow-up"));
        let source = source_for(&scheduler, &rec);

        source.next(event(&scheduler, 0, "root")).unwrap();

        assert_eq!(*rec.seen.lock(), vec!["root", "follow-up"]);
        assert!(!scheduler.is_draining());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_delay_requeues_behind_burst() {
        let scheduler = Arc::new(Scheduler::new());
        let rec = recorder(&scheduler, None);
        let source = source_for(&scheduler, &rec);

        source.enqueue(event(&scheduler, 1, "delayed"));
        source.enqueue(event(&scheduler, 0, "a"));
        source.enqueue(event(&scheduler, 0, "b"));
        scheduler.drain().unwrap();

        assert_eq!(*rec.seen.lock(), vec!["a", "b", "delayed"]);
    }

    #[test]
    fn test_loop_guard_clears_queue() {
        let scheduler = Arc::new(Scheduler::with_config(SchedulerConfig::strict()));
        let rec = recorder(&scheduler, None);
        let source = source_for(&scheduler, &rec);

        let origin = scheduler.counter().next();
        let late = TestEvent {
            id: scheduler.counter().next(),
            origin,
            hops: 101,
            delay: 0,
            label: "late",
        };
        source.enqueue(event(&scheduler, 0, "queued"));
        source.enqueue(late);
        source.enqueue(event(&scheduler, 0, "dropped"));
        let err = scheduler.drain().unwrap_err();

        assert!(matches!(err, ControlError::InfiniteLoop { hops: 101, .. }));
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.epoch(), 1);
        assert!(!scheduler.is_draining());
        assert_eq!(*rec.seen.lock(), vec!["queued"]);
    }

    #[test]
    fn test_fan_out_does_not_trip_loop_guard() {
        let scheduler = Arc::new(Scheduler::with_config(SchedulerConfig::strict()));
        let rec = recorder(&scheduler, None);
        let source = source_for(&scheduler, &rec);

        let origin = scheduler.counter().next();
        for _ in 0..1_000 {
            let id = scheduler.counter().next();
            source.enqueue(TestEvent { id, origin, hops: 1, delay: 0, label: "sibling" });
        }
        scheduler.drain().unwrap();

        assert_eq!(rec.seen.lock().len(), 1_000);
        assert_eq!(scheduler.epoch(), 0);
    }

    #[test]
    fn test_released_target_is_skipped() {
        let scheduler = Arc::new(Scheduler::new());
        let rec = recorder(&scheduler, None);
        let source = source_for(&scheduler, &rec);
        drop(rec);

        source.next(event(&scheduler, 0, "orphan")).unwrap();
        assert_eq!(scheduler.pending(), 0);
    }
}
