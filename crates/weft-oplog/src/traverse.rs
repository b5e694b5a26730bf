//! Lazy, newest-first walk over the log DAG.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::entry::{Entry, Payload};
use crate::error::OplogError;
use crate::log::Log;

/// Called with every yielded entry; returning `true` ends the walk after it.
pub type StopFn<'a, T> = Box<dyn FnMut(&Entry<T>) -> bool + Send + 'a>;

/// A single pass over the DAG, created by [`Log::traverse`].
///
/// The frontier is kept sorted by the log's order and the newest entry is
/// popped each step, so the walk yields entries newest first. Entries whose
/// bytes are not in storage are skipped.
pub struct Traversal<'a, T: Payload> {
    log: &'a Log<T>,
    roots: Option<Vec<Entry<T>>>,
    started: bool,
    done: bool,
    stack: Vec<Entry<T>>,
    queued: HashSet<String>,
    should_stop: Option<StopFn<'a, T>>,
    use_refs: bool,
}

impl<'a, T: Payload> Traversal<'a, T> {
    pub(crate) fn new(
        log: &'a Log<T>,
        roots: Option<Vec<Entry<T>>>,
        should_stop: Option<StopFn<'a, T>>,
        use_refs: bool,
    ) -> Self {
        Self {
            log,
            roots,
            started: false,
            done: false,
            stack: Vec::new(),
            queued: HashSet::new(),
            should_stop,
            use_refs,
        }
    }

    /// Yield the next entry, or `None` once the walk is over.
    pub async fn next(&mut self) -> Result<Option<Entry<T>>, OplogError> {
        if self.done {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            let roots = match self.roots.take() {
                Some(roots) => roots,
                None => self.log.heads().await?,
            };
            for root in roots {
                if self.queued.insert(root.hash.clone()) {
                    self.push(root)?;
                }
            }
        }

        let Some(entry) = self.stack.pop() else {
            self.done = true;
            return Ok(None);
        };

        let refs: &[String] = if self.use_refs { &entry.refs } else { &[] };
        for hash in entry.next.iter().chain(refs) {
            if self.queued.contains(hash) {
                continue;
            }
            if let Some(parent) = self.log.get(hash).await? {
                self.queued.insert(hash.clone());
                self.push(parent)?;
            }
        }

        if let Some(stop) = self.should_stop.as_mut()
            && stop(&entry)
        {
            self.done = true;
        }
        Ok(Some(entry))
    }

    /// Drain the remaining entries.
    pub async fn collect(mut self) -> Result<Vec<Entry<T>>, OplogError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    // Insert keeping the stack sorted oldest first.
    fn push(&mut self, entry: Entry<T>) -> Result<(), OplogError> {
        let order = self.log.order();
        let (mut lo, mut hi) = (0, self.stack.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if order.compare(&self.stack[mid], &entry)? == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        self.stack.insert(lo, entry);
        Ok(())
    }
}
