//! Event definitions for the simulation kernel.
//!
//! Events are the only thing that moves simulated time forward. Each one
//! targets an actor, either directly (`Timeout`) or through the activity the
//! actor is blocked on.

use std::cmp::Ordering;
use std::fmt;

use crate::types::{ActivityId, ActorId, SimTime};

/// A strictly increasing event identifier.
///
/// Identifiers double as the insertion sequence: two events scheduled for
/// the same time fire in identifier order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub(crate) u64);

impl EventId {
    /// Returns the raw sequence number.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

/// What happens when an event fires.
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    /// A transfer finished crossing its route and reaches its mailbox.
    TaskArrival { activity: ActivityId },
    /// The bandwidth phase of a transfer (or VM migration) is over; the route
    /// latency still has to elapse before arrival.
    TransferComplete { activity: ActivityId },
    /// A computation consumed all of its flops.
    ComputeComplete { activity: ActivityId },
    /// A disk read or write moved all of its bytes.
    IoComplete { activity: ActivityId },
    /// A sleep or a bounded receive of `actor` expired.
    Timeout { actor: ActorId },
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::TaskArrival { activity } => write!(f, "TaskArrival({})", activity),
            EventKind::TransferComplete { activity } => {
                write!(f, "TransferComplete({})", activity)
            }
            EventKind::ComputeComplete { activity } => write!(f, "ComputeComplete({})", activity),
            EventKind::IoComplete { activity } => write!(f, "IoComplete({})", activity),
            EventKind::Timeout { actor } => write!(f, "Timeout({})", actor),
        }
    }
}

/// A scheduled event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Insertion sequence, used to break ties.
    pub id: EventId,
    /// Simulated time at which the event fires.
    pub time: SimTime,
    /// The event payload.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event.
    pub fn new(id: EventId, time: SimTime, kind: EventKind) -> Self {
        Self { id, time, kind }
    }
}

impl Eq for Event {}

/// Smallest `(time, id)` first.
///
/// `BinaryHeap` is a max-heap, so the natural ordering is reversed here.
/// NaN never reaches the heap: the scheduler rejects it.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
