//! Lamport clock tagged with a writer id.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Logical clock of an entry.
///
/// `time` is a Lamport counter. `id` names the writer (its public key) and
/// breaks ties between concurrent writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clock {
    /// Writer id that produced the tick.
    pub id: String,
    /// Lamport time.
    pub time: u64,
}

impl Clock {
    /// Create a clock for `id` at `time`.
    pub fn new(id: impl Into<String>, time: u64) -> Self {
        Self {
            id: id.into(),
            time,
        }
    }

    /// Return a new clock one tick ahead, same writer. `None` once the
    /// counter is exhausted.
    pub fn tick(&self) -> Option<Self> {
        Some(Self {
            id: self.id.clone(),
            time: self.time.checked_add(1)?,
        })
    }
}

/// Total order over clocks: time first, then writer id lexicographically.
///
/// Only returns [`Ordering::Equal`] when both the time and the writer id are
/// equal.
pub fn compare_clocks(a: &Clock, b: &Clock) -> Ordering {
    a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id))
}

impl PartialOrd for Clock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Clock {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_clocks(self, other)
    }
}
