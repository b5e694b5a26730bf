//! Deterministic total order over entries.

use std::cmp::Ordering;
use std::sync::Arc;

use weft_types::compare_clocks;

use crate::entry::Entry;
use crate::error::OplogError;

/// A comparison used to order entries oldest first.
pub type Tiebreaker<T> = Arc<dyn Fn(&Entry<T>, &Entry<T>) -> Ordering + Send + Sync>;

/// Order by clock; fall back to `resolve` when clocks are equal.
pub fn sort_by_clocks<T>(
    a: &Entry<T>,
    b: &Entry<T>,
    resolve: impl Fn(&Entry<T>, &Entry<T>) -> Ordering,
) -> Ordering {
    match compare_clocks(&a.clock, &b.clock) {
        Ordering::Equal => resolve(a, b),
        other => other,
    }
}

/// Order by writer id; fall back to `resolve` when both have the same writer.
pub fn sort_by_clock_id<T>(
    a: &Entry<T>,
    b: &Entry<T>,
    resolve: impl Fn(&Entry<T>, &Entry<T>) -> Ordering,
) -> Ordering {
    match a.clock.id.cmp(&b.clock.id) {
        Ordering::Equal => resolve(a, b),
        other => other,
    }
}

/// Default order: `(time, writer id)`, then hash.
///
/// The newest entry sorts last. Two entries compare equal only if they have
/// the same hash.
pub fn last_write_wins<T>(a: &Entry<T>, b: &Entry<T>) -> Ordering {
    sort_by_clocks(a, b, |a, b| sort_by_clock_id(a, b, |a, b| a.hash.cmp(&b.hash)))
}

/// Wraps a tie-breaker and rejects `Equal` for distinct entries.
pub struct NoZeroes<T> {
    inner: Tiebreaker<T>,
}

impl<T> Clone for NoZeroes<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for NoZeroes<T> {
    fn default() -> Self {
        Self::new(Arc::new(last_write_wins::<T>))
    }
}

impl<T> NoZeroes<T> {
    pub fn new(inner: Tiebreaker<T>) -> Self {
        Self { inner }
    }

    /// Compare two entries.
    pub fn compare(&self, a: &Entry<T>, b: &Entry<T>) -> Result<Ordering, OplogError> {
        let ordering = (self.inner)(a, b);
        if ordering == Ordering::Equal && a.hash != b.hash {
            return Err(OplogError::AmbiguousOrder(a.hash.clone(), b.hash.clone()));
        }
        Ok(ordering)
    }
}

/// Sort `entries` oldest first.
pub fn sort_entries<T>(entries: &mut [Entry<T>], order: &NoZeroes<T>) -> Result<(), OplogError> {
    let mut violation = None;
    entries.sort_by(|a, b| match order.compare(a, b) {
        Ok(ordering) => ordering,
        Err(e) => {
            violation.get_or_insert(e);
            Ordering::Equal
        }
    });
    match violation {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
