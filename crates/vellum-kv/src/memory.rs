mod iter;
mod purge;
mod txn;

pub use self::{iter::MemoryIterator, txn::MemoryTxn};

use std::{
    ops::Bound,
    sync::{
        Arc, Mutex, RwLock, RwLockReadGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam_skiplist::SkipMap;

use crate::{
    error::Error,
    memory::txn::StagedOp,
    store::{IterOptions, Read, Store, TxnStore, Write},
};

/// A logical timestamp. Every committed transaction stamps all of its writes
/// with a single fresh version.
pub type Version = u64;

/// How long an in-flight record may pin old versions before the purge cycle
/// is allowed to reap it.
const IN_FLIGHT_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// One record in the versioned entry set. The derived ordering (key bytes,
/// then version ascending) keeps all versions of a key adjacent, so a single
/// bounded seek finds the latest version visible at a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct VersionedKey {
    pub key: Vec<u8>,
    pub version: Version,
}

impl VersionedKey {
    pub fn new(key: &[u8], version: Version) -> Self {
        Self {
            key: key.to_vec(),
            version,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ValueEntry {
    pub value: Vec<u8>,
    /// A tombstone marks the key absent from this version forward.
    pub tombstone: bool,
}

/// Index key for in-flight transactions and iterators, ordered by snapshot
/// version then candidate commit version. The process-unique `id` keeps
/// records opened at the same version from colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct InFlightKey {
    pub snapshot: Version,
    pub candidate: Version,
    pub id: u64,
}

pub(crate) struct Inner {
    /// Latest committed version.
    version: AtomicU64,
    pub(crate) values: SkipMap<VersionedKey, ValueEntry>,
    pub(crate) in_flight: SkipMap<InFlightKey, Instant>,
    next_id: AtomicU64,
    /// Close serialises against active readers and writers through this
    /// lock; every operation holds the read side for its duration.
    closed: RwLock<bool>,
    /// Commits happen one at a time. Staging and reads never take this.
    commit_lock: Mutex<()>,
    closing: crossbeam_channel::Sender<()>,
}

impl Inner {
    pub fn version(&self) -> Version {
        self.version.load(Ordering::SeqCst)
    }

    pub fn publish_version(&self, version: Version) {
        self.version.store(version, Ordering::SeqCst);
    }

    pub fn commit_lock(&self) -> &Mutex<()> {
        &self.commit_lock
    }

    /// Acquires the read side of the close lock, failing if the store has
    /// been closed. Callers hold the guard for the duration of an operation.
    pub fn read_guard(&self) -> Result<RwLockReadGuard<'_, bool>, Error> {
        let guard = self.closed.read()?;
        if *guard {
            return Err(Error::StoreClosed);
        }
        Ok(guard)
    }

    pub fn is_open(&self) -> bool {
        self.closed.read().map(|closed| !*closed).unwrap_or(false)
    }

    /// The latest entry for `key` with version <= `version`, if any.
    pub fn visible(&self, key: &[u8], version: Version) -> Option<(Version, ValueEntry)> {
        let bound = VersionedKey::new(key, version);
        let entry = self.values.upper_bound(Bound::Included(&bound))?;
        if entry.key().key == key {
            Some((entry.key().version, entry.value().clone()))
        } else {
            None
        }
    }

    /// Whether any entry for `key` landed in the window `(snapshot, current]`.
    pub fn modified_since(&self, key: &[u8], snapshot: Version, current: Version) -> bool {
        let from = VersionedKey::new(key, snapshot + 1);
        match self.values.lower_bound(Bound::Included(&from)) {
            Some(entry) => entry.key().key == key && entry.key().version <= current,
            None => false,
        }
    }

    /// Registers an in-flight record pinning `snapshot` against the purge
    /// cycle. The caller must remove it with [`Inner::unregister`].
    pub fn register(&self, snapshot: Version) -> InFlightKey {
        let key = InFlightKey {
            snapshot,
            candidate: snapshot + 1,
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        self.in_flight.insert(key, Instant::now() + IN_FLIGHT_DEADLINE);
        key
    }

    pub fn unregister(&self, key: InFlightKey) {
        self.in_flight.remove(&key);
    }

    /// The version below which shadowed entries are safe to discard: no live
    /// snapshot, including the engine's own current version, is older.
    pub fn min_live(&self) -> Version {
        let version = self.version();
        match self.in_flight.front() {
            Some(entry) => version.min(entry.key().snapshot),
            None => version,
        }
    }
}

/// An in-memory multi-version store. Readers, including iterators, resolve
/// against a snapshot version and never block writers or each other; commits
/// serialise on an internal mutex. Cloning yields another handle to the same
/// store.
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (closing, purge_signal) = crossbeam_channel::bounded(1);
        let inner = Arc::new(Inner {
            version: AtomicU64::new(0),
            values: SkipMap::new(),
            in_flight: SkipMap::new(),
            next_id: AtomicU64::new(0),
            closed: RwLock::new(false),
            commit_lock: Mutex::new(()),
            closing,
        });
        purge::spawn(Arc::downgrade(&inner), purge_signal);
        Self { inner }
    }

    /// Immediately discards versions shadowed by a newer version that every
    /// live snapshot can already see. Runs in bounded batches; reads through
    /// live iterators and transactions are unaffected.
    pub fn purge(&self) -> Result<(), Error> {
        let _guard = self.inner.read_guard()?;
        purge::execute(&self.inner);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Read for MemoryStore {
    type Iter<'a>
        = MemoryIterator<'a>
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        let _guard = self.inner.read_guard()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        match self.inner.visible(key, self.inner.version()) {
            Some((_, entry)) if !entry.tombstone => Ok(entry.value),
            _ => Err(Error::NotFound),
        }
    }

    fn has(&self, key: &[u8]) -> Result<bool, Error> {
        let _guard = self.inner.read_guard()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        match self.inner.visible(key, self.inner.version()) {
            Some((_, entry)) => Ok(!entry.tombstone),
            None => Ok(false),
        }
    }

    fn iterator(&self, opts: IterOptions) -> MemoryIterator<'_> {
        MemoryIterator::new(&self.inner, self.inner.version(), opts, None)
    }
}

impl Write for MemoryStore {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let _guard = self.inner.read_guard()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        // An implicit transaction committed immediately. Dropping it on a
        // failed commit discards the in-flight record.
        let txn = MemoryTxn::new(self.inner.clone(), false);
        txn.stage(key, StagedOp::Set(value.to_vec()))?;
        txn.commit_inner()
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        let _guard = self.inner.read_guard()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let txn = MemoryTxn::new(self.inner.clone(), false);
        txn.stage(key, StagedOp::Delete)?;
        txn.commit_inner()
    }
}

impl Store for MemoryStore {
    fn close(&self) {
        let mut closed = match self.inner.closed.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *closed {
            return;
        }
        *closed = true;
        let _ = self.inner.closing.try_send(());
        log::debug!("memory store closed");
    }
}

impl TxnStore for MemoryStore {
    type Txn = MemoryTxn;

    fn new_txn(&self, read_only: bool) -> Result<MemoryTxn, Error> {
        let _guard = self.inner.read_guard()?;
        Ok(MemoryTxn::new(self.inner.clone(), read_only))
    }
}
