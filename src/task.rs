//! Tasks: the payloads actors exchange through mailboxes.
//!
//! A task carries a computation cost and a communication cost, plus an
//! application-level discriminant. The kernel moves tasks around and charges
//! their byte size to the network; it never looks at [`TaskKind`].

use serde::{Deserialize, Serialize};

use crate::types::{Bytes, Flops, SimTime};

/// Application-level discriminant of a task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaskKind {
    /// A plain unit of work.
    Work,
    /// Asks for a grant; the grant goes to `reply_to`.
    Request { reply_to: String },
    /// Grants a previously requested right.
    Grant,
    /// Gives a granted right back.
    Release,
    /// Carries the sender's clock at send time.
    Timestamped { sent_at: SimTime },
    /// Anything else, tagged by name.
    Custom {
        tag: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

/// A unit of work sent between actors.
///
/// # Example
///
/// ```
/// use gridlet::task::{Task, TaskKind};
///
/// let task = Task::new("Task00", 1e9, 1e6);
/// assert_eq!(task.kind, TaskKind::Work);
///
/// let grant = Task::signal(TaskKind::Grant);
/// assert_eq!(grant.bytes, 0.0);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Human-readable name.
    pub name: String,
    /// Computation cost, to be spent by the receiver with `execute`.
    pub flops: Flops,
    /// Communication cost, charged to the route when the task is sent.
    pub bytes: Bytes,
    /// Application discriminant.
    pub kind: TaskKind,
}

impl Task {
    /// Creates a plain work task.
    pub fn new(name: impl Into<String>, flops: Flops, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            flops,
            bytes,
            kind: TaskKind::Work,
        }
    }

    /// Creates a zero-cost task carrying only a discriminant.
    pub fn signal(kind: TaskKind) -> Self {
        let name = match &kind {
            TaskKind::Work => "work".to_string(),
            TaskKind::Request { .. } => "request".to_string(),
            TaskKind::Grant => "grant".to_string(),
            TaskKind::Release => "release".to_string(),
            TaskKind::Timestamped { .. } => "timestamped".to_string(),
            TaskKind::Custom { tag, .. } => tag.clone(),
        };
        Self {
            name,
            flops: 0.0,
            bytes: 0.0,
            kind,
        }
    }

    /// Replaces the discriminant.
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Timestamp carried by a [`TaskKind::Timestamped`] task.
    pub fn sent_at(&self) -> Option<SimTime> {
        match self.kind {
            TaskKind::Timestamped { sent_at } => Some(sent_at),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(Task::signal(TaskKind::Release).name, "release");
        let custom = Task::signal(TaskKind::Custom {
            tag: "ping".into(),
            data: serde_json::json!({"n": 1}),
        });
        assert_eq!(custom.name, "ping");
    }

    #[test]
    fn test_timestamp() {
        let t = Task::new("pp", 0.0, 1e6).with_kind(TaskKind::Timestamped { sent_at: 1.5 });
        assert_eq!(t.sent_at(), Some(1.5));
        assert_eq!(Task::new("w", 1.0, 1.0).sent_at(), None);
    }

    #[test]
    fn test_kind_matching() {
        let t = Task::signal(TaskKind::Request {
            reply_to: "client-1".into(),
        });
        match t.kind {
            TaskKind::Request { reply_to } => assert_eq!(reply_to, "client-1"),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_serde_json() {
        let t = Task::new("x", 2.0, 3.0);
        let json = serde_json::to_string(&t).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.flops, 2.0);
    }
}
