//! The log engine: append, merge, traversal and range queries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};
use weft_identity::{Identities, Identity};
use weft_store::{ComposedStorage, LruStorage, MemoryStorage, Storage};
use weft_types::{Clock, DEFAULT_CACHE_SIZE, DEFAULT_REFERENCES_COUNT};

use crate::access::{AccessController, AllowAll};
use crate::conflict::{NoZeroes, Tiebreaker, sort_entries};
use crate::entry::{Entry, Payload};
use crate::error::OplogError;
use crate::heads::Heads;
use crate::iter::{IteratorOptions, LogIterator};
use crate::traverse::{StopFn, Traversal};

/// Marker stored in the index for every durably stored entry.
const INDEXED: &[u8] = &[1];

/// Options for [`Log::open`].
pub struct LogOptions<T: Payload> {
    /// Log id. A random id is generated when `None`.
    pub log_id: Option<String>,
    /// Initial heads, replacing whatever the heads storage holds.
    pub log_heads: Vec<Entry<T>>,
    pub access: Option<Arc<dyn AccessController<T>>>,
    pub entry_storage: Option<Arc<dyn Storage>>,
    pub heads_storage: Option<Arc<dyn Storage>>,
    pub index_storage: Option<Arc<dyn Storage>>,
    /// Custom order; wrapped in [`NoZeroes`].
    pub sort_fn: Option<Tiebreaker<T>>,
}

impl<T: Payload> Default for LogOptions<T> {
    fn default() -> Self {
        Self {
            log_id: None,
            log_heads: Vec::new(),
            access: None,
            entry_storage: None,
            heads_storage: None,
            index_storage: None,
            sort_fn: None,
        }
    }
}

/// Options for [`Log::append`].
#[derive(Debug, Clone, Copy)]
pub struct AppendOptions {
    /// Skip-list fan-out: how many older ancestors to reference.
    pub references_count: usize,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self {
            references_count: DEFAULT_REFERENCES_COUNT,
        }
    }
}

/// A replicated, append-only Merkle-DAG log.
///
/// Entries are stored by hash in the entry storage; the index records which
/// hashes have been verified and persisted; the heads storage tracks the
/// frontier. `append`, `join_entry` and `close` are serialized through one
/// FIFO mutation lock.
pub struct Log<T: Payload> {
    id: String,
    identity: Identity,
    identities: Arc<Identities>,
    access: Arc<dyn AccessController<T>>,
    storage: Arc<dyn Storage>,
    index: Arc<dyn Storage>,
    heads: Heads<T>,
    order: NoZeroes<T>,
    mutation: tokio::sync::Mutex<()>,
}

impl<T: Payload> std::fmt::Debug for Log<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("id", &self.id)
            .field("identity", &self.identity.id)
            .field("access", &self.access.kind())
            .finish()
    }
}

fn cached_memory() -> Arc<dyn Storage> {
    Arc::new(ComposedStorage::new(
        Arc::new(LruStorage::new(DEFAULT_CACHE_SIZE)),
        Arc::new(MemoryStorage::new()),
    ))
}

impl<T: Payload> Log<T> {
    /// Open a log for `identity`, defaulting every storage to memory behind
    /// an LRU cache.
    pub async fn open(
        identities: Arc<Identities>,
        identity: Identity,
        options: LogOptions<T>,
    ) -> Result<Self, OplogError> {
        let LogOptions {
            log_id,
            log_heads,
            access,
            entry_storage,
            heads_storage,
            index_storage,
            sort_fn,
        } = options;

        let id = match log_id {
            Some(id) if !id.is_empty() => id,
            Some(_) => return Err(OplogError::Validation("log id is empty".into())),
            None => hex::encode(rand::random::<[u8; 16]>()),
        };
        let heads = Heads::new(heads_storage.unwrap_or_else(cached_memory));
        if !log_heads.is_empty() {
            heads.set(&log_heads).await?;
        }

        let log = Self {
            id,
            identity,
            identities,
            access: access.unwrap_or_else(|| Arc::new(AllowAll)),
            storage: entry_storage.unwrap_or_else(cached_memory),
            index: index_storage.unwrap_or_else(cached_memory),
            heads,
            order: sort_fn.map(NoZeroes::new).unwrap_or_default(),
            mutation: tokio::sync::Mutex::new(()),
        };
        info!(log_id = %log.id, writer = %log.identity.id, "log opened");
        Ok(log)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The writer identity used by [`Log::append`].
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn identities(&self) -> &Arc<Identities> {
        &self.identities
    }

    pub fn access(&self) -> &Arc<dyn AccessController<T>> {
        &self.access
    }

    /// Entry storage, keyed by hash.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub(crate) fn order(&self) -> &NoZeroes<T> {
        &self.order
    }

    /// This writer's clock at the highest head time.
    pub async fn clock(&self) -> Result<Clock, OplogError> {
        let time = self
            .heads
            .all()
            .await?
            .iter()
            .map(|h| h.clock.time)
            .max()
            .unwrap_or(0);
        Ok(Clock::new(self.identity.public_key.clone(), time))
    }

    /// Current heads, newest first.
    pub async fn heads(&self) -> Result<Vec<Entry<T>>, OplogError> {
        let mut heads = self.heads.all().await?;
        sort_entries(&mut heads, &self.order)?;
        heads.reverse();
        Ok(heads)
    }

    /// Every entry reachable from the heads, oldest first.
    pub async fn values(&self) -> Result<Vec<Entry<T>>, OplogError> {
        let mut values = Vec::new();
        let mut traversal = self.traverse(None, None, true);
        while let Some(entry) = traversal.next().await? {
            values.push(entry);
        }
        values.reverse();
        Ok(values)
    }

    /// Fetch and decode an entry by hash.
    pub async fn get(&self, hash: &str) -> Result<Option<Entry<T>>, OplogError> {
        let Some(bytes) = self.storage.get(hash).await? else {
            return Ok(None);
        };
        let entry = Entry::decode(&bytes)?;
        if entry.hash != hash {
            return Err(OplogError::Validation(format!(
                "stored entry under {hash} hashes to {}",
                entry.hash
            )));
        }
        Ok(Some(entry))
    }

    /// Whether `hash` has been verified and indexed.
    pub async fn has(&self, hash: &str) -> Result<bool, OplogError> {
        Ok(self.index.get(hash).await?.is_some())
    }

    /// Append a payload as a new entry on top of the current heads.
    ///
    /// Nothing is persisted if the access controller denies the entry.
    pub async fn append(&self, payload: T, options: AppendOptions) -> Result<Entry<T>, OplogError> {
        let _guard = self.mutation.lock().await;

        let heads = self.heads().await?;
        let next: Vec<String> = heads.iter().map(|h| h.hash.clone()).collect();
        let refs = self
            .get_references(&heads, options.references_count + heads.len())
            .await?;
        let time = heads.iter().map(|h| h.clock.time).max().unwrap_or(0);
        let clock = Clock::new(self.identity.public_key.clone(), time)
            .tick()
            .filter(|c| c.time < u64::MAX)
            .ok_or_else(|| OplogError::Validation(format!("clock of log {} is exhausted", self.id)))?;

        let entry = Entry::create(
            &self.identities,
            &self.identity,
            &self.id,
            payload,
            Some(clock),
            next,
            refs,
        )
        .await?;

        if !self.access.can_append(&entry).await? {
            return Err(OplogError::Authorization(format!(
                "identity {} may not write to {}",
                self.identity.id, self.id
            )));
        }

        self.storage.put(&entry.hash, entry.bytes.clone()).await?;
        self.index.put(&entry.hash, Bytes::from_static(INDEXED)).await?;
        self.heads.set(std::slice::from_ref(&entry)).await?;

        debug!(log_id = %self.id, hash = %entry.hash, time = entry.clock.time, "appended entry");
        Ok(entry)
    }

    /// Merge every head of `other` into this log.
    ///
    /// Storage is imported in bulk first. A head that fails to join is
    /// logged and skipped. Returns the number of heads newly joined.
    pub async fn join(&self, other: &Log<T>) -> Result<usize, OplogError> {
        if other.id != self.id {
            return Err(OplogError::Validation(format!(
                "cannot join log {} into {}",
                other.id, self.id
            )));
        }
        if let Err(e) = self.storage.merge(other.storage.as_ref()).await {
            warn!(log_id = %self.id, error = %e, "bulk storage merge failed");
        }

        let mut joined = 0;
        for head in other.heads().await? {
            match self.join_entry(&head).await {
                Ok(true) => joined += 1,
                Ok(false) => {}
                Err(e) => warn!(log_id = %self.id, hash = %head.hash, error = %e, "rejected head"),
            }
        }
        Ok(joined)
    }

    /// Verify and merge a remote entry and its unknown ancestors.
    ///
    /// Returns `false` if the entry is already indexed.
    pub async fn join_entry(&self, entry: &Entry<T>) -> Result<bool, OplogError> {
        self.join_entry_with(entry, &HashMap::new()).await
    }

    /// Like [`Log::join_entry`], resolving unknown ancestors from
    /// `ancestors` before falling back to storage.
    ///
    /// Every ancestor is verified like the entry itself. Nothing is indexed
    /// unless the whole closure resolves; if some ancestors cannot be found
    /// the call fails with [`OplogError::NotFound`] listing them.
    pub async fn join_entry_with(
        &self,
        entry: &Entry<T>,
        ancestors: &HashMap<String, Entry<T>>,
    ) -> Result<bool, OplogError> {
        let _guard = self.mutation.lock().await;

        if self.has(&entry.hash).await? {
            return Ok(false);
        }
        self.verify_entry(entry).await?;

        let heads: HashSet<String> = self.heads.hashes().await?.into_iter().collect();
        let mut seen: HashSet<String> = HashSet::from([entry.hash.clone()]);
        let mut pending: VecDeque<String> = entry.next.iter().chain(&entry.refs).cloned().collect();
        let mut verified: Vec<Entry<T>> = Vec::new();
        let mut connected: Vec<String> = Vec::new();
        let mut missing: Vec<String> = Vec::new();

        while let Some(hash) = pending.pop_front() {
            if !seen.insert(hash.clone()) {
                continue;
            }
            if self.has(&hash).await? {
                if heads.contains(&hash) {
                    connected.push(hash);
                }
                continue;
            }
            let ancestor = match ancestors.get(&hash) {
                Some(found) => Some(found.clone()),
                None => self.get(&hash).await?,
            };
            let Some(ancestor) = ancestor else {
                missing.push(hash);
                continue;
            };
            if ancestor.hash != hash {
                return Err(OplogError::Validation(format!(
                    "ancestor {hash} resolved to {}",
                    ancestor.hash
                )));
            }
            self.verify_entry(&ancestor).await?;
            pending.extend(ancestor.next.iter().chain(&ancestor.refs).cloned());
            verified.push(ancestor);
        }

        if !missing.is_empty() {
            debug!(log_id = %self.id, hash = %entry.hash, missing = missing.len(), "unresolved ancestors");
            return Err(OplogError::NotFound(missing));
        }

        for e in verified.iter().chain(std::iter::once(entry)) {
            self.storage.put(&e.hash, e.bytes.clone()).await?;
        }
        for e in verified.iter().chain(std::iter::once(entry)) {
            self.index.put(&e.hash, Bytes::from_static(INDEXED)).await?;
        }
        self.heads.add(entry, &connected).await?;

        debug!(
            log_id = %self.id,
            hash = %entry.hash,
            ancestors = verified.len(),
            "joined entry"
        );
        Ok(true)
    }

    async fn verify_entry(&self, entry: &Entry<T>) -> Result<(), OplogError> {
        if entry.id != self.id {
            return Err(OplogError::Validation(format!(
                "entry {} belongs to log {}, not {}",
                entry.hash, entry.id, self.id
            )));
        }
        if !self.access.can_append(entry).await? {
            return Err(OplogError::Authorization(format!(
                "entry {} by {} rejected by {}",
                entry.hash,
                entry.identity,
                self.access.kind()
            )));
        }
        entry.verify()
    }

    /// Walk the DAG from `roots` (default: the heads), newest first.
    pub fn traverse<'a>(
        &'a self,
        roots: Option<Vec<Entry<T>>>,
        should_stop: Option<StopFn<'a, T>>,
        use_refs: bool,
    ) -> Traversal<'a, T> {
        Traversal::new(self, roots, should_stop, use_refs)
    }

    /// Range query over the log; see [`IteratorOptions`].
    pub async fn iterator(
        &self,
        options: IteratorOptions,
    ) -> Result<LogIterator<'_, T>, OplogError> {
        LogIterator::new(self, options).await
    }

    /// Up to `amount` ancestor hashes of `heads`, newest first, never
    /// including a head.
    pub async fn get_references(
        &self,
        heads: &[Entry<T>],
        amount: usize,
    ) -> Result<Vec<String>, OplogError> {
        if amount == 0 || heads.is_empty() {
            return Ok(Vec::new());
        }
        let head_hashes: HashSet<&str> = heads.iter().map(|h| h.hash.as_str()).collect();
        let mut refs = Vec::new();
        let mut traversal = self.traverse(Some(heads.to_vec()), None, false);
        while let Some(entry) = traversal.next().await? {
            if head_hashes.contains(entry.hash.as_str()) {
                continue;
            }
            refs.push(entry.hash);
            if refs.len() >= amount {
                break;
            }
        }
        Ok(refs)
    }

    /// Entries a peer holding `have` needs to connect `want`.
    ///
    /// Walks `next` edges from `want`, stopping at any hash in `have`, and
    /// returns the entries found in topological order (parents first).
    /// Hashes this log does not hold are skipped.
    pub async fn compute_pull_delta(
        &self,
        want: &[String],
        have: &[String],
    ) -> Result<Vec<Entry<T>>, OplogError> {
        let have: HashSet<&str> = have.iter().map(String::as_str).collect();

        // BFS backwards from `want`.
        let mut found: HashMap<String, Entry<T>> = HashMap::new();
        let mut queue: VecDeque<String> = want.iter().cloned().collect();
        while let Some(hash) = queue.pop_front() {
            if have.contains(hash.as_str()) || found.contains_key(&hash) {
                continue;
            }
            let Some(entry) = self.get(&hash).await? else {
                continue;
            };
            for parent in &entry.next {
                if !have.contains(parent.as_str()) && !found.contains_key(parent) {
                    queue.push_back(parent.clone());
                }
            }
            found.insert(hash, entry);
        }

        // Kahn's algorithm: parents first.
        let mut in_degree: HashMap<&str, usize> = found.keys().map(|h| (h.as_str(), 0)).collect();
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for (hash, entry) in &found {
            for parent in &entry.next {
                if found.contains_key(parent) {
                    *in_degree.entry(hash.as_str()).or_default() += 1;
                    children.entry(parent.as_str()).or_default().push(hash.as_str());
                }
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(h, _)| *h)
            .collect();
        ready.sort_unstable();
        let mut ordered: Vec<&str> = Vec::with_capacity(found.len());
        while let Some(hash) = ready.pop() {
            ordered.push(hash);
            if let Some(kids) = children.get(hash) {
                for &kid in kids {
                    if let Some(d) = in_degree.get_mut(kid) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push(kid);
                        }
                    }
                }
            }
        }

        Ok(ordered
            .into_iter()
            .filter_map(|h| found.get(h).cloned())
            .collect())
    }

    /// Erase every entry, the index and the heads.
    pub async fn clear(&self) -> Result<(), OplogError> {
        let _guard = self.mutation.lock().await;
        self.index.clear().await?;
        self.heads.clear().await?;
        self.storage.clear().await?;
        info!(log_id = %self.id, "log cleared");
        Ok(())
    }

    /// Wait for in-flight mutations, then close every storage.
    pub async fn close(&self) -> Result<(), OplogError> {
        let _guard = self.mutation.lock().await;
        self.index.close().await?;
        self.heads.close().await?;
        self.storage.close().await?;
        info!(log_id = %self.id, "log closed");
        Ok(())
    }
}
