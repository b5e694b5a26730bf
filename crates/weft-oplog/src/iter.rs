//! Range queries over the log's total order.

use std::collections::VecDeque;

use crate::entry::{Entry, Payload};
use crate::error::OplogError;
use crate::log::Log;
use crate::traverse::{StopFn, Traversal};

/// Bounds of a range query, all by entry hash.
///
/// `lt` / `lte` pick where the walk starts (the parents of the hash, or the
/// hash itself); without either the walk starts at the heads. `gt` / `gte`
/// name the entry where it ends, excluded or included. `amount` caps the
/// number of entries returned.
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    pub gt: Option<String>,
    pub gte: Option<String>,
    pub lt: Option<String>,
    pub lte: Option<String>,
    pub amount: Option<usize>,
}

/// Entries of a range query, newest first.
///
/// With an end bound and an `amount` but no start bound, the walk runs to
/// the end bound and only the last `amount` entries before it are kept, so
/// the result is the `amount` entries just above the end bound.
pub struct LogIterator<'a, T: Payload> {
    traversal: Traversal<'a, T>,
    skip: Option<String>,
    buffer: Option<Buffer<T>>,
}

struct Buffer<T> {
    capacity: usize,
    filled: bool,
    entries: VecDeque<Entry<T>>,
}

impl<'a, T: Payload> LogIterator<'a, T> {
    pub(crate) async fn new(log: &'a Log<T>, options: IteratorOptions) -> Result<Self, OplogError> {
        let IteratorOptions {
            gt,
            gte,
            lt,
            lte,
            amount,
        } = options;

        if amount == Some(0) {
            return Ok(Self {
                traversal: log.traverse(Some(Vec::new()), None, true),
                skip: None,
                buffer: None,
            });
        }

        let roots = if let Some(hash) = &lt {
            match log.get(hash).await? {
                Some(entry) => {
                    let mut parents = Vec::with_capacity(entry.next.len());
                    for parent in &entry.next {
                        if let Some(p) = log.get(parent).await? {
                            parents.push(p);
                        }
                    }
                    Some(parents)
                }
                None => Some(Vec::new()),
            }
        } else if let Some(hash) = &lte {
            Some(log.get(hash).await?.into_iter().collect())
        } else {
            None
        };

        let end = match gt.as_ref().or(gte.as_ref()) {
            Some(hash) => log.get(hash).await?.map(|e| e.hash),
            None => None,
        };
        let limit = if end.is_some() { None } else { amount };

        let should_stop: StopFn<'a, T> = {
            let end = end.clone();
            let mut count = 0usize;
            Box::new(move |entry: &Entry<T>| {
                count += 1;
                limit.is_some_and(|l| count >= l) || end.as_deref() == Some(entry.hash.as_str())
            })
        };

        let skip = if gt.is_some() { end.clone() } else { None };
        let buffer = match amount {
            Some(capacity) if end.is_some() && lt.is_none() && lte.is_none() => Some(Buffer {
                capacity,
                filled: false,
                entries: VecDeque::with_capacity(capacity),
            }),
            _ => None,
        };

        Ok(Self {
            traversal: log.traverse(roots, Some(should_stop), true),
            skip,
            buffer,
        })
    }

    /// Next entry in range, or `None` when exhausted.
    pub async fn next(&mut self) -> Result<Option<Entry<T>>, OplogError> {
        if let Some(buffer) = self.buffer.as_mut()
            && !buffer.filled
        {
            while let Some(entry) = self.traversal.next().await? {
                if self.skip.as_deref() == Some(entry.hash.as_str()) {
                    continue;
                }
                if buffer.entries.len() == buffer.capacity {
                    buffer.entries.pop_front();
                }
                buffer.entries.push_back(entry);
            }
            buffer.filled = true;
        }
        if let Some(buffer) = self.buffer.as_mut() {
            return Ok(buffer.entries.pop_front());
        }

        while let Some(entry) = self.traversal.next().await? {
            if self.skip.as_deref() == Some(entry.hash.as_str()) {
                continue;
            }
            return Ok(Some(entry));
        }
        Ok(None)
    }

    /// Drain the remaining entries.
    pub async fn collect(mut self) -> Result<Vec<Entry<T>>, OplogError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
