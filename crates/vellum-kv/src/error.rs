use std::sync::PoisonError;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("key not found")]
    NotFound,
    #[error("empty key")]
    EmptyKey,
    /// Reserved for API compatibility; not currently raised.
    #[error("value is nil")]
    NilValue,
    #[error("transaction discarded")]
    TransactionDiscarded,
    #[error("store closed")]
    StoreClosed,
    #[error("transaction conflict")]
    Conflict,
    #[error("transaction is read-only")]
    ReadOnlyTxn,
    #[error("poisoned mutex")]
    PoisonedMutex,
    #[error("i/o error: {0}")]
    Io(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonedMutex
    }
}
