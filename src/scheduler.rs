//! Deterministic event scheduler and simulated clock.
//!
//! A `BinaryHeap` with reversed ordering on [`Event`] acts as a min-heap keyed
//! by `(time, id)`. Event ids are handed out in insertion order, so events
//! sharing a fire time pop first-in first-out, and two schedulers fed the same
//! sequence of calls pop the same sequence of events.
//!
//! Cancellation is lazy: a cancelled id is remembered and skipped when it
//! reaches the top of the heap.

use std::collections::{BinaryHeap, HashSet};

use crate::error::{SimError, SimResult};
use crate::event::{Event, EventId, EventKind};
use crate::types::SimTime;

/// The global simulated clock. Only moves forward.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SimClock {
    now: SimTime,
}

impl SimClock {
    /// Current simulated time.
    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Moves the clock to `time`; earlier times are ignored.
    pub(crate) fn advance_to(&mut self, time: SimTime) {
        if time > self.now {
            self.now = time;
        }
    }
}

/// The event priority queue.
#[derive(Debug, Default)]
pub struct EventScheduler {
    queue: BinaryHeap<Event>,
    cancelled: HashSet<EventId>,
    next_id: u64,
    clock: SimClock,
    processed: u64,
}

impl EventScheduler {
    /// Creates an empty scheduler with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time.
    #[inline]
    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    /// Schedules `kind` to fire at absolute time `time`.
    ///
    /// Fails fast with [`SimError::NonCausalEvent`] when `time` lies before
    /// the current clock or is NaN.
    pub fn schedule(&mut self, time: SimTime, kind: EventKind) -> SimResult<EventId> {
        if time.is_nan() || time < self.clock.now() {
            return Err(SimError::NonCausalEvent {
                requested: time,
                current: self.clock.now(),
            });
        }
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.queue.push(Event::new(id, time, kind));
        Ok(id)
    }

    /// Schedules `kind` to fire `delay` seconds from now.
    pub fn schedule_in(&mut self, delay: SimTime, kind: EventKind) -> SimResult<EventId> {
        self.schedule(self.clock.now() + delay, kind)
    }

    /// Cancels a pending event. Cancelling an event that already fired is a no-op.
    pub fn cancel(&mut self, id: EventId) {
        if id.0 < self.next_id {
            self.cancelled.insert(id);
        }
    }

    /// Pops the earliest pending event and advances the clock to its time.
    pub fn run_next(&mut self) -> Option<Event> {
        self.discard_cancelled();
        let event = self.queue.pop()?;
        self.clock.advance_to(event.time);
        self.processed += 1;
        Some(event)
    }

    /// Fire time of the next pending event, if any.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.queue.peek().map(|e| e.time)
    }

    /// Moves the clock forward without firing anything.
    ///
    /// Used when a run stops at a deadline that lies before the next event.
    pub fn advance_to(&mut self, time: SimTime) {
        self.clock.advance_to(time);
    }

    /// Number of pending events, cancelled ones included until they are discarded.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true when no event is pending.
    pub fn is_empty(&mut self) -> bool {
        self.peek_time().is_none()
    }

    /// Number of events fired so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn discard_cancelled(&mut self) {
        while let Some(top) = self.queue.peek() {
            if !self.cancelled.remove(&top.id) {
                break;
            }
            self.queue.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActorId;

    fn tag(n: u64) -> EventKind {
        EventKind::Timeout { actor: ActorId(n) }
    }

    #[test]
    fn test_fifo_at_same_time() {
        let mut sched = EventScheduler::new();
        sched.schedule(1.0, tag(1)).unwrap();
        sched.schedule(1.0, tag(2)).unwrap();
        sched.schedule(1.0, tag(3)).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| sched.run_next())
            .map(|e| e.kind)
            .collect();
        assert_eq!(order, vec![tag(1), tag(2), tag(3)]);
    }

    #[test]
    fn test_time_ordering_advances_clock() {
        let mut sched = EventScheduler::new();
        sched.schedule(3.0, tag(0)).unwrap();
        sched.schedule(1.0, tag(0)).unwrap();
        sched.schedule(2.0, tag(0)).unwrap();

        let mut times = Vec::new();
        while let Some(e) = sched.run_next() {
            assert_eq!(sched.now(), e.time);
            times.push(e.time);
        }
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
        assert_eq!(sched.processed(), 3);
    }

    #[test]
    fn test_reject_past_event() {
        let mut sched = EventScheduler::new();
        sched.schedule(5.0, tag(0)).unwrap();
        sched.run_next();

        let err = sched.schedule(4.0, tag(1)).unwrap_err();
        assert!(matches!(err, SimError::NonCausalEvent { .. }));
        assert!(sched.schedule(5.0, tag(1)).is_ok());
    }

    #[test]
    fn test_reject_nan() {
        let mut sched = EventScheduler::new();
        assert!(sched.schedule(f64::NAN, tag(0)).is_err());
    }

    #[test]
    fn test_cancel() {
        let mut sched = EventScheduler::new();
        let a = sched.schedule(1.0, tag(1)).unwrap();
        sched.schedule(2.0, tag(2)).unwrap();
        sched.cancel(a);

        assert_eq!(sched.peek_time(), Some(2.0));
        assert_eq!(sched.run_next().map(|e| e.kind), Some(tag(2)));
        assert!(sched.is_empty());
    }

    #[test]
    fn test_schedule_in_is_relative() {
        let mut sched = EventScheduler::new();
        sched.schedule(2.0, tag(0)).unwrap();
        sched.run_next();
        sched.schedule_in(0.5, tag(1)).unwrap();
        assert_eq!(sched.peek_time(), Some(2.5));
    }

    #[test]
    fn test_determinism_across_runs() {
        fn build() -> Vec<(u64, SimTime)> {
            let mut sched = EventScheduler::new();
            for (i, t) in [5.0, 3.0, 5.0, 1.0, 3.0, 0.0].into_iter().enumerate() {
                sched.schedule(t, tag(i as u64)).unwrap();
            }
            std::iter::from_fn(|| sched.run_next())
                .map(|e| (e.id.raw(), e.time))
                .collect()
        }

        let run1 = build();
        assert_eq!(run1, build());
        for w in run1.windows(2) {
            assert!((w[0].1, w[0].0) <= (w[1].1, w[1].0));
        }
    }
}
