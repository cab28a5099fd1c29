use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    error::Error,
    memory::{InFlightKey, Inner, MemoryIterator, ValueEntry, Version, VersionedKey},
    store::{IterOptions, Read, Txn, Write},
};

/// A staged operation. `Get` records a read for commit-time conflict
/// detection without mutating state; a later `Set`/`Delete` on the same key
/// overwrites it.
#[derive(Debug, Clone)]
pub(crate) enum StagedOp {
    Get,
    Set(Vec<u8>),
    Delete,
}

/// A transaction over a [`MemoryStore`](crate::memory::MemoryStore).
///
/// Writes stage locally and touch no shared state until commit. Reads consult
/// the staged map first, so the transaction sees its own writes, then fall
/// through to a snapshot read at the version captured when the transaction
/// was opened. Dropping an unterminated transaction discards it.
pub struct MemoryTxn {
    inner: Arc<Inner>,
    snapshot: Version,
    read_only: bool,
    staged: Mutex<BTreeMap<Vec<u8>, StagedOp>>,
    terminated: AtomicBool,
    record: InFlightKey,
}

impl MemoryTxn {
    pub(crate) fn new(inner: Arc<Inner>, read_only: bool) -> Self {
        let snapshot = inner.version();
        let record = inner.register(snapshot);
        Self {
            inner,
            snapshot,
            read_only,
            staged: Mutex::new(BTreeMap::new()),
            terminated: AtomicBool::new(false),
            record,
        }
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// The engine version this transaction reads at.
    pub fn version(&self) -> Version {
        self.snapshot
    }

    fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn check_live(&self) -> Result<(), Error> {
        if self.terminated() {
            return Err(Error::TransactionDiscarded);
        }
        Ok(())
    }

    /// Stages an operation without taking the close lock; callers hold it.
    pub(crate) fn stage(&self, key: &[u8], op: StagedOp) -> Result<(), Error> {
        self.staged.lock()?.insert(key.to_vec(), op);
        Ok(())
    }

    /// The commit protocol, run while the caller already holds the close
    /// lock's read side. Serialises on the commit mutex, rejects if any
    /// staged key gained an entry since the snapshot, then stamps all staged
    /// writes with one fresh version and publishes it.
    pub(crate) fn commit_inner(&self) -> Result<(), Error> {
        let _commit = self.inner.commit_lock().lock()?;
        let staged = self.staged.lock()?;
        let current = self.inner.version();
        for key in staged.keys() {
            if self.inner.modified_since(key, self.snapshot, current) {
                return Err(Error::Conflict);
            }
        }
        let version = current + 1;
        for (key, op) in staged.iter() {
            let entry = match op {
                StagedOp::Get => continue,
                StagedOp::Set(value) => ValueEntry {
                    value: value.clone(),
                    tombstone: false,
                },
                StagedOp::Delete => ValueEntry {
                    value: Vec::new(),
                    tombstone: true,
                },
            };
            self.inner
                .values
                .insert(VersionedKey::new(key, version), entry);
        }
        drop(staged);
        // Publishing the version only after every entry is in place makes the
        // whole commit visible atomically to new snapshots.
        self.inner.publish_version(version);
        self.terminated.store(true, Ordering::SeqCst);
        self.inner.unregister(self.record);
        Ok(())
    }

    fn discard_inner(&self) -> Result<(), Error> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.staged.lock()?.clear();
        self.inner.unregister(self.record);
        Ok(())
    }
}

impl Read for MemoryTxn {
    type Iter<'a>
        = MemoryIterator<'a>
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        let _guard = self.inner.read_guard()?;
        self.check_live()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let mut staged = self.staged.lock()?;
        match staged.get(key) {
            Some(StagedOp::Set(value)) => return Ok(value.clone()),
            Some(StagedOp::Delete) => return Err(Error::NotFound),
            Some(StagedOp::Get) | None => {}
        }
        if !self.read_only {
            staged.insert(key.to_vec(), StagedOp::Get);
        }
        drop(staged);
        match self.inner.visible(key, self.snapshot) {
            Some((_, entry)) if !entry.tombstone => Ok(entry.value),
            _ => Err(Error::NotFound),
        }
    }

    fn has(&self, key: &[u8]) -> Result<bool, Error> {
        let _guard = self.inner.read_guard()?;
        self.check_live()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let mut staged = self.staged.lock()?;
        match staged.get(key) {
            Some(StagedOp::Set(_)) => return Ok(true),
            Some(StagedOp::Delete) => return Ok(false),
            Some(StagedOp::Get) | None => {}
        }
        if !self.read_only {
            staged.insert(key.to_vec(), StagedOp::Get);
        }
        drop(staged);
        match self.inner.visible(key, self.snapshot) {
            Some((_, entry)) => Ok(!entry.tombstone),
            None => Ok(false),
        }
    }

    /// Iterates the snapshot this transaction reads at. Staged writes are
    /// not overlaid; `get`/`has` are the read-your-own-writes surface.
    fn iterator(&self, opts: IterOptions) -> MemoryIterator<'_> {
        let fault = self.terminated().then_some(Error::TransactionDiscarded);
        MemoryIterator::new(&self.inner, self.snapshot, opts, fault)
    }
}

impl Write for MemoryTxn {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let _guard = self.inner.read_guard()?;
        self.check_live()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if self.read_only {
            return Err(Error::ReadOnlyTxn);
        }
        self.stage(key, StagedOp::Set(value.to_vec()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        let _guard = self.inner.read_guard()?;
        self.check_live()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if self.read_only {
            return Err(Error::ReadOnlyTxn);
        }
        self.stage(key, StagedOp::Delete)
    }
}

impl Txn for MemoryTxn {
    fn commit(&self) -> Result<(), Error> {
        let _guard = self.inner.read_guard()?;
        if self.terminated() {
            return Ok(());
        }
        if self.read_only {
            self.terminated.store(true, Ordering::SeqCst);
            self.inner.unregister(self.record);
            return Ok(());
        }
        self.commit_inner()
    }

    /// Discarding releases only transaction-local state, so it succeeds even
    /// after the store has closed.
    fn discard(&self) -> Result<(), Error> {
        self.discard_inner()
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        let _ = self.discard_inner();
    }
}
