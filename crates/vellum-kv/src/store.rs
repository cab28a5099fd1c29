pub mod iter;

pub use self::iter::{Iter, IterOptions};

use crate::error::Error;

/// Read operations shared by stores and transactions. Keys are arbitrary
/// non-empty byte strings ordered lexicographically; the empty key is
/// rejected with [`Error::EmptyKey`].
pub trait Read {
    type Iter<'a>: Iter
    where
        Self: 'a;

    /// Returns the value stored under `key`, or [`Error::NotFound`] if the
    /// key is absent or deleted.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error>;

    fn has(&self, key: &[u8]) -> Result<bool, Error>;

    /// Opens an iterator over the store. Opening never fails; errors surface
    /// on first use.
    fn iterator(&self, opts: IterOptions) -> Self::Iter<'_>;
}

/// Write operations shared by stores and transactions.
pub trait Write {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error>;

    /// Deletes `key`. Deleting an absent key succeeds.
    fn delete(&self, key: &[u8]) -> Result<(), Error>;
}

pub trait Store: Read + Write {
    /// Closes the store. Idempotent; all subsequent and outstanding
    /// operations fail with [`Error::StoreClosed`].
    fn close(&self);
}

/// A store that can open explicit transactions.
pub trait TxnStore: Store {
    type Txn: Txn;

    fn new_txn(&self, read_only: bool) -> Result<Self::Txn, Error>;
}

/// A transaction over a [`TxnStore`]. Reads observe the snapshot taken at
/// open plus the transaction's own staged writes; writes stay invisible to
/// others until commit. A transaction terminates through the first `commit`
/// or `discard`; repeated terminations are no-ops, and read/write operations
/// after termination fail with [`Error::TransactionDiscarded`].
pub trait Txn: Read + Write {
    /// Atomically publishes all staged writes, or fails with
    /// [`Error::Conflict`] if another commit touched a key this transaction
    /// read or wrote since its snapshot. On conflict the store is unchanged
    /// and the caller is expected to retry with a new transaction.
    fn commit(&self) -> Result<(), Error>;

    fn discard(&self) -> Result<(), Error>;
}
