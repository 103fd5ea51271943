//! Named rendez-vous points between actors.
//!
//! A mailbox keeps three things:
//!
//! - tasks that reached it and wait for a receiver (`delivered`);
//! - tasks that reached it ahead of an earlier task from the same sender and
//!   wait in a reorder buffer (`held`);
//! - sends issued while nobody was listening, whose destination host is not
//!   known yet (`pending`).
//!
//! Every send is stamped with a per-sender sequence number. A task becomes
//! visible to receivers only once all earlier tasks from the same sender were
//! delivered or abandoned, so tasks from one sender are received in send
//! order even when their transfers finish out of order. Tasks from different
//! senders are visible in arrival order.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::task::Task;
use crate::types::{ActorId, HostId};

/// A task in transit, stamped with its sender's sequence number.
#[derive(Clone, Debug)]
pub(crate) struct Envelope {
    pub task: Task,
    pub sender: ActorId,
    pub seq: u64,
}

/// A send waiting for a receiver to show up.
#[derive(Clone, Debug)]
pub(crate) struct PendingSend {
    pub envelope: Envelope,
    pub src: HostId,
}

/// A named mailbox.
#[derive(Debug)]
pub(crate) struct Mailbox {
    name: String,
    delivered: VecDeque<Envelope>,
    held: BTreeMap<(ActorId, u64), Envelope>,
    abandoned: BTreeSet<(ActorId, u64)>,
    next_send: HashMap<ActorId, u64>,
    next_delivery: HashMap<ActorId, u64>,
    pending: VecDeque<PendingSend>,
    receiver: Option<ActorId>,
}

impl Mailbox {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delivered: VecDeque::new(),
            held: BTreeMap::new(),
            abandoned: BTreeSet::new(),
            next_send: HashMap::new(),
            next_delivery: HashMap::new(),
            pending: VecDeque::new(),
            receiver: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wraps a task into an envelope carrying the sender's next sequence number.
    pub fn stamp(&mut self, sender: ActorId, task: Task) -> Envelope {
        let seq = self.next_send.entry(sender).or_insert(0);
        let envelope = Envelope {
            task,
            sender,
            seq: *seq,
        };
        *seq += 1;
        envelope
    }

    /// Records the arrival of a transfer. Returns the number of tasks that
    /// became visible as a result.
    pub fn arrive(&mut self, envelope: Envelope) -> usize {
        let sender = envelope.sender;
        self.held.insert((sender, envelope.seq), envelope);
        self.release(sender)
    }

    /// Gives up on a sequence number whose transfer will never arrive.
    pub fn abandon(&mut self, sender: ActorId, seq: u64) -> usize {
        self.abandoned.insert((sender, seq));
        self.release(sender)
    }

    fn release(&mut self, sender: ActorId) -> usize {
        let expected = self.next_delivery.entry(sender).or_insert(0);
        let mut released = 0;
        loop {
            if let Some(envelope) = self.held.remove(&(sender, *expected)) {
                self.delivered.push_back(envelope);
                released += 1;
            } else if !self.abandoned.remove(&(sender, *expected)) {
                break;
            }
            *expected += 1;
        }
        released
    }

    /// Takes the oldest visible task.
    pub fn pop(&mut self) -> Option<Envelope> {
        self.delivered.pop_front()
    }

    /// Number of visible tasks.
    pub fn len(&self) -> usize {
        self.delivered.len()
    }

    /// Number of tasks that arrived but wait for an earlier one.
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    pub fn receiver(&self) -> Option<ActorId> {
        self.receiver
    }

    pub fn set_receiver(&mut self, actor: ActorId) {
        self.receiver = Some(actor);
    }

    /// Clears the blocked receiver if it is `actor`.
    pub fn clear_receiver(&mut self, actor: ActorId) {
        if self.receiver == Some(actor) {
            self.receiver = None;
        }
    }

    pub fn defer(&mut self, send: PendingSend) {
        self.pending.push_back(send);
    }

    pub fn take_pending(&mut self) -> Vec<PendingSend> {
        self.pending.drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops every deferred send issued from `host`, abandoning their
    /// sequence numbers. Returns the number of tasks that became visible.
    pub fn drop_pending_from(&mut self, host: HostId) -> usize {
        let (dropped, kept): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.src == host);
        self.pending = kept.into();
        dropped
            .into_iter()
            .map(|p| self.abandon(p.envelope.sender, p.envelope.seq))
            .sum()
    }
}
