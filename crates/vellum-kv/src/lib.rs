#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
    )
)]
#![warn(clippy::redundant_clone)]

//! An ordered byte-keyed, byte-valued store with snapshot-isolated
//! transactions, range and prefix iteration in both directions, and
//! composable wrapper layers (key namespacing, value encryption).
//!
//! The [`memory::MemoryStore`] keeps every committed version of a key in a
//! concurrent ordered map and resolves reads against a snapshot version, so
//! readers never block writers. Wrappers compose by value over any
//! [`store::Store`].

pub mod encrypted;
pub mod error;
pub mod memory;
pub mod namespace;
pub mod store;

pub use self::{
    encrypted::{ChaChaMode, Encrypted, Mode},
    error::Error,
    memory::{MemoryStore, MemoryTxn, Version},
    namespace::Namespace,
    store::{Iter, IterOptions, Read, Store, Txn, TxnStore, Write},
};
