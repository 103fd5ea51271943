//! Resource contention model.
//!
//! Every piece of in-flight work is an [`Activity`]: an amount of flops or
//! bytes drained through a set of constraints (host CPUs, VM CPUs, network
//! links, disks), optionally capped by a per-activity rate bound (one core's speed,
//! a fat-pipe link's bandwidth).
//!
//! Rates follow max-min fairness, computed by progressive filling:
//!
//! 1. For every constraint, the fair share is `residual / unfixed users`.
//! 2. The smallest share (or smallest activity bound) is the next level.
//! 3. Every activity limited by that level is fixed at it, and its rate is
//!    subtracted from the residual of each constraint it crosses.
//! 4. Repeat until every activity is fixed.
//!
//! Progress is lazy. The model remembers when rates were last valid and, on
//! every mutation, first drains `rate × elapsed` from each running activity.
//! Completion dates are therefore recomputed whenever the set of co-resident
//! activities changes.

use std::collections::BTreeMap;

use crate::event::EventId;
use crate::types::{ActivityId, ActorId, SimTime};

/// Relative tolerance used to group constraints saturating at the same level.
const SHARE_EPSILON: f64 = 1e-12;

/// Identifier of a capacity constraint (a CPU, a link or a disk).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub(crate) usize);

/// What an activity is draining.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    /// Flops on a host or VM CPU.
    Exec,
    /// Bytes of a task crossing a route.
    Transfer,
    /// Bytes read from or written to a storage.
    Io,
    /// Bytes of a VM memory image crossing a route.
    Migration,
}

#[derive(Clone, Debug)]
struct Constraint {
    name: String,
    capacity: f64,
}

/// A unit of in-flight work.
#[derive(Clone, Debug)]
pub struct Activity {
    /// Activity identifier.
    pub id: ActivityId,
    /// What is being drained.
    pub kind: ActivityKind,
    /// Actor on whose behalf the work runs.
    pub owner: Option<ActorId>,
    /// Initial amount of work.
    pub amount: f64,
    remaining: f64,
    resources: Vec<ResourceId>,
    bound: Option<f64>,
    rate: f64,
    suspended: bool,
    completion: Option<(EventId, SimTime)>,
}

impl Activity {
    /// Remaining amount as of the model's last update.
    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    /// Current rate (amount per second).
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Returns true while the activity is frozen.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Constraints this activity consumes.
    pub fn resources(&self) -> &[ResourceId] {
        &self.resources
    }

    pub(crate) fn completion(&self) -> Option<(EventId, SimTime)> {
        self.completion
    }
}

/// The max-min fair-sharing model.
#[derive(Debug, Default)]
pub struct ResourceModel {
    constraints: Vec<Constraint>,
    activities: BTreeMap<ActivityId, Activity>,
    next_id: u64,
    last_update: SimTime,
    dirty: bool,
}

impl ResourceModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constraint of the given capacity.
    pub fn add_constraint(&mut self, name: impl Into<String>, capacity: f64) -> ResourceId {
        let id = ResourceId(self.constraints.len());
        self.constraints.push(Constraint {
            name: name.into(),
            capacity: capacity.max(0.0),
        });
        id
    }

    /// Capacity of a constraint.
    pub fn capacity(&self, resource: ResourceId) -> f64 {
        self.constraints
            .get(resource.0)
            .map(|c| c.capacity)
            .unwrap_or(0.0)
    }

    /// Name of a constraint.
    pub fn constraint_name(&self, resource: ResourceId) -> &str {
        self.constraints
            .get(resource.0)
            .map(|c| c.name.as_str())
            .unwrap_or("")
    }

    /// Changes the capacity of a constraint at time `now`.
    pub fn set_capacity(&mut self, now: SimTime, resource: ResourceId, capacity: f64) {
        self.advance(now);
        if let Some(c) = self.constraints.get_mut(resource.0) {
            c.capacity = capacity.max(0.0);
            self.dirty = true;
        }
    }

    /// Starts a new activity at time `now`.
    ///
    /// # Arguments
    /// * `owner` - Actor the work belongs to
    /// * `amount` - Flops or bytes to drain
    /// * `resources` - Constraints the activity crosses (duplicates are ignored)
    /// * `bound` - Optional cap on the activity's own rate
    pub fn start(
        &mut self,
        now: SimTime,
        kind: ActivityKind,
        owner: Option<ActorId>,
        amount: f64,
        mut resources: Vec<ResourceId>,
        bound: Option<f64>,
    ) -> ActivityId {
        self.advance(now);
        resources.sort();
        resources.dedup();

        let id = ActivityId(self.next_id);
        self.next_id += 1;
        self.activities.insert(
            id,
            Activity {
                id,
                kind,
                owner,
                amount,
                remaining: amount.max(0.0),
                resources,
                bound,
                rate: 0.0,
                suspended: false,
                completion: None,
            },
        );
        self.dirty = true;
        id
    }

    /// Removes an activity at time `now`, returning it with its remaining amount.
    pub fn remove(&mut self, now: SimTime, id: ActivityId) -> Option<Activity> {
        self.advance(now);
        let activity = self.activities.remove(&id)?;
        self.dirty = true;
        Some(activity)
    }

    /// Freezes an activity; its remaining amount is kept as is.
    pub fn suspend(&mut self, now: SimTime, id: ActivityId) -> bool {
        self.advance(now);
        match self.activities.get_mut(&id) {
            Some(a) if !a.suspended => {
                a.suspended = true;
                a.rate = 0.0;
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    /// Unfreezes an activity.
    pub fn resume(&mut self, now: SimTime, id: ActivityId) -> bool {
        self.advance(now);
        match self.activities.get_mut(&id) {
            Some(a) if a.suspended => {
                a.suspended = false;
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    /// Replaces constraint `from` by `to` in an activity and resets its bound.
    pub fn rebind(
        &mut self,
        now: SimTime,
        id: ActivityId,
        from: ResourceId,
        to: ResourceId,
        bound: Option<f64>,
    ) -> bool {
        self.advance(now);
        let Some(a) = self.activities.get_mut(&id) else {
            return false;
        };
        for r in a.resources.iter_mut() {
            if *r == from {
                *r = to;
            }
        }
        a.resources.sort();
        a.resources.dedup();
        a.bound = bound;
        self.dirty = true;
        true
    }

    /// Returns an activity.
    pub fn get(&self, id: ActivityId) -> Option<&Activity> {
        self.activities.get(&id)
    }

    /// Iterates over all activities in identifier order.
    pub fn activities(&self) -> impl Iterator<Item = &Activity> {
        self.activities.values()
    }

    /// Identifiers of the activities crossing a constraint, in identifier order.
    pub fn users_of(&self, resource: ResourceId) -> Vec<ActivityId> {
        self.activities
            .values()
            .filter(|a| a.resources.contains(&resource))
            .map(|a| a.id)
            .collect()
    }

    /// Number of running (not suspended) activities crossing a constraint.
    pub fn load(&self, resource: ResourceId) -> usize {
        self.activities
            .values()
            .filter(|a| !a.suspended && a.resources.contains(&resource))
            .count()
    }

    /// Number of activities in the model.
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    /// Returns true when no activity is in flight.
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Drains every running activity up to `now`.
    ///
    /// Rates are recomputed first if a mutation happened since the last solve,
    /// because that mutation took effect at the previous update instant.
    pub fn advance(&mut self, now: SimTime) {
        let elapsed = now - self.last_update;
        if elapsed > 0.0 {
            if self.dirty {
                self.solve();
            }
            for a in self.activities.values_mut() {
                if a.suspended {
                    continue;
                }
                if a.rate.is_infinite() {
                    a.remaining = 0.0;
                } else {
                    a.remaining = (a.remaining - a.rate * elapsed).max(0.0);
                }
            }
        }
        if now > self.last_update {
            self.last_update = now;
        }
    }

    /// Advances to `now` and recomputes rates if needed.
    pub fn update(&mut self, now: SimTime) {
        self.advance(now);
        if self.dirty {
            self.solve();
        }
    }

    /// Remaining amount of an activity at `now`, extrapolated from the current rate.
    pub fn remaining_at(&self, id: ActivityId, now: SimTime) -> Option<f64> {
        let a = self.activities.get(&id)?;
        if a.suspended || now <= self.last_update {
            return Some(a.remaining);
        }
        if a.rate.is_infinite() {
            return Some(0.0);
        }
        Some((a.remaining - a.rate * (now - self.last_update)).max(0.0))
    }

    /// Date at which an activity completes at its current rate.
    ///
    /// `None` when the activity is suspended or starved.
    pub fn eta(&self, id: ActivityId) -> Option<SimTime> {
        let a = self.activities.get(&id)?;
        if a.suspended {
            return None;
        }
        if a.remaining <= 0.0 || a.rate.is_infinite() {
            return Some(self.last_update);
        }
        if a.rate <= 0.0 {
            return None;
        }
        Some(self.last_update + a.remaining / a.rate)
    }

    pub(crate) fn set_completion(&mut self, id: ActivityId, completion: Option<(EventId, SimTime)>) {
        if let Some(a) = self.activities.get_mut(&id) {
            a.completion = completion;
        }
    }

    /// Recomputes every rate by progressive filling.
    pub fn solve(&mut self) {
        self.dirty = false;
        let mut residual: Vec<f64> = self.constraints.iter().map(|c| c.capacity).collect();
        let mut users = vec![0usize; self.constraints.len()];

        let mut unfixed: Vec<ActivityId> = Vec::new();
        for a in self.activities.values_mut() {
            a.rate = 0.0;
            if !a.suspended {
                unfixed.push(a.id);
            }
        }

        while !unfixed.is_empty() {
            users.iter_mut().for_each(|u| *u = 0);
            for id in &unfixed {
                for r in &self.activities[id].resources {
                    users[r.0] += 1;
                }
            }

            let mut level = f64::INFINITY;
            for (c, &n) in users.iter().enumerate() {
                if n > 0 {
                    level = level.min(residual[c].max(0.0) / n as f64);
                }
            }
            for id in &unfixed {
                if let Some(bound) = self.activities[id].bound {
                    level = level.min(bound);
                }
            }

            if level.is_infinite() {
                // Nothing limits the remaining activities.
                for id in &unfixed {
                    if let Some(a) = self.activities.get_mut(id) {
                        a.rate = f64::INFINITY;
                    }
                }
                break;
            }

            let threshold = level + level.abs() * SHARE_EPSILON;
            let saturated: Vec<bool> = users
                .iter()
                .enumerate()
                .map(|(c, &n)| n > 0 && residual[c].max(0.0) / n as f64 <= threshold)
                .collect();

            let mut still_unfixed = Vec::with_capacity(unfixed.len());
            for id in unfixed {
                let Some(a) = self.activities.get_mut(&id) else {
                    continue;
                };
                let bounded = a.bound.is_some_and(|b| b <= threshold);
                let limited = a.resources.iter().any(|r| saturated[r.0]);
                if bounded || limited {
                    a.rate = level;
                    for r in &a.resources {
                        residual[r.0] -= level;
                    }
                } else {
                    still_unfixed.push(id);
                }
            }
            unfixed = still_unfixed;
        }
    }
}
