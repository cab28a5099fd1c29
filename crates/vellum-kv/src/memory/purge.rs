use std::{
    sync::Weak,
    time::{Duration, Instant},
};

use chrono::Days;
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::memory::{Inner, Version, VersionedKey};

/// Upper bound on deletions per pass, to cap memory and how long a pass
/// holds the entry set busy.
const PURGE_BATCH: usize = 1000;

/// Spawns the background purge task. It fires once per wall-clock day (at
/// local midnight) and exits when the store closes, when every handle is
/// dropped, or when the close signal arrives.
pub(crate) fn spawn(inner: Weak<Inner>, closing: Receiver<()>) {
    let spawned = std::thread::Builder::new()
        .name("vellum-purge".into())
        .spawn(move || {
            loop {
                match closing.recv_timeout(until_next_purge()) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                let Some(inner) = inner.upgrade() else { return };
                if !inner.is_open() {
                    return;
                }
                execute(&inner);
            }
        });
    if let Err(err) = spawned {
        log::warn!("failed to spawn purge task: {err}");
    }
}

fn until_next_purge() -> Duration {
    let now = chrono::Local::now();
    let midnight = (now.date_naive() + Days::new(1))
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| now.naive_local());
    (midnight - now.naive_local())
        .to_std()
        .unwrap_or(Duration::from_secs(24 * 60 * 60))
}

/// One purge cycle: reap expired in-flight records, then repeatedly delete
/// batches of shadowed versions until a pass finds nothing left.
pub(crate) fn execute(inner: &Inner) {
    reap_expired(inner);

    let horizon = inner.min_live();
    let mut removed = 0usize;
    loop {
        let batch = shadowed_batch(inner, horizon);
        if batch.is_empty() {
            break;
        }
        removed += batch.len();
        for key in &batch {
            inner.values.remove(key);
        }
        std::thread::yield_now();
    }
    if removed > 0 {
        log::debug!("purged {removed} versions shadowed below version {horizon}");
    }
}

/// Entries safe to delete: each is older than `horizon` and shadowed by a
/// newer entry for the same key that every live snapshot can already see.
/// Walks the set in order, comparing adjacent entries, and stops at the
/// batch limit.
fn shadowed_batch(inner: &Inner, horizon: Version) -> Vec<VersionedKey> {
    let mut batch = Vec::new();
    let mut prev: Option<VersionedKey> = None;
    for entry in inner.values.iter() {
        let vk = entry.key();
        if vk.version > horizon {
            // Not visible at the horizon, so it cannot shadow anything.
            continue;
        }
        if let Some(prev) = &prev {
            if prev.key == vk.key {
                batch.push(prev.clone());
                if batch.len() >= PURGE_BATCH {
                    return batch;
                }
            }
        }
        prev = Some(vk.clone());
    }
    batch
}

fn reap_expired(inner: &Inner) {
    let now = Instant::now();
    for entry in inner.in_flight.iter() {
        if *entry.value() <= now {
            entry.remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        memory::MemoryStore,
        store::{Iter as _, IterOptions, Read, Txn as _, TxnStore, Write},
    };

    #[test]
    fn test_purge_discards_shadowed_versions_only() {
        let store = MemoryStore::new();
        store.set(b"a", &[1]).unwrap();
        store.set(b"a", &[2]).unwrap();
        store.set(b"a", &[3]).unwrap();
        store.set(b"b", &[1]).unwrap();
        assert_eq!(store.inner.values.len(), 4);

        store.purge().unwrap();

        // Only the latest version of each key survives.
        assert_eq!(store.inner.values.len(), 2);
        assert_eq!(store.get(b"a").unwrap(), vec![3]);
        assert_eq!(store.get(b"b").unwrap(), vec![1]);
    }

    #[test]
    fn test_purge_keeps_sole_tombstone() {
        let store = MemoryStore::new();
        store.set(b"a", &[1]).unwrap();
        store.delete(b"a").unwrap();

        store.purge().unwrap();

        // The shadowed write goes; the tombstone is still the visible entry.
        assert_eq!(store.inner.values.len(), 1);
        assert_eq!(store.get(b"a"), Err(Error::NotFound));
    }

    #[test]
    fn test_purge_is_idempotent_on_clean_store() {
        let store = MemoryStore::new();
        store.set(b"a", &[1]).unwrap();
        store.purge().unwrap();
        store.purge().unwrap();
        assert_eq!(store.inner.values.len(), 1);
        assert_eq!(store.get(b"a").unwrap(), vec![1]);
    }

    #[test]
    fn test_live_txn_pins_versions() {
        let store = MemoryStore::new();
        store.set(b"a", &[1]).unwrap();

        let txn = store.new_txn(true).unwrap();
        store.set(b"a", &[2]).unwrap();

        store.purge().unwrap();

        // The transaction's snapshot still resolves to the old version.
        assert_eq!(txn.get(b"a").unwrap(), vec![1]);
        txn.discard().unwrap();

        // With the pin gone the old version is purgeable.
        store.purge().unwrap();
        assert_eq!(store.inner.values.len(), 1);
        assert_eq!(store.get(b"a").unwrap(), vec![2]);
    }

    #[test]
    fn test_live_iterator_pins_versions() {
        let store = MemoryStore::new();
        store.set(b"a", &[1]).unwrap();
        store.set(b"b", &[1]).unwrap();

        let mut iter = store.iterator(IterOptions::default());
        store.set(b"a", &[2]).unwrap();
        store.delete(b"b").unwrap();

        store.purge().unwrap();

        // The iterator's snapshot is intact after the purge.
        assert!(iter.next().unwrap());
        assert_eq!(iter.key().unwrap(), b"a");
        assert_eq!(iter.value().unwrap().unwrap(), vec![1]);
        assert!(iter.next().unwrap());
        assert_eq!(iter.key().unwrap(), b"b");
        assert!(!iter.next().unwrap());
        iter.close().unwrap();

        store.purge().unwrap();
        assert_eq!(store.get(b"a").unwrap(), vec![2]);
        assert_eq!(store.get(b"b"), Err(Error::NotFound));
    }

    #[test]
    fn test_purge_batches_over_large_backlogs() {
        let store = MemoryStore::new();
        // More shadowed versions than one batch can hold.
        for i in 0..1200u32 {
            let key = i.to_be_bytes();
            store.set(&key, &[0]).unwrap();
            store.set(&key, &[1]).unwrap();
        }
        assert_eq!(store.inner.values.len(), 2400);

        store.purge().unwrap();
        assert_eq!(store.inner.values.len(), 1200);
        for i in 0..1200u32 {
            assert_eq!(store.get(&i.to_be_bytes()).unwrap(), vec![1]);
        }
    }

    #[test]
    fn test_reap_expired_records() {
        let store = MemoryStore::new();
        store.set(b"a", &[1]).unwrap();
        let _txn = store.new_txn(true).unwrap();
        assert_eq!(store.inner.in_flight.len(), 1);

        // Force the record past its deadline, then purge.
        let record = *store.inner.in_flight.front().unwrap().key();
        store.inner.in_flight.insert(record, Instant::now() - Duration::from_secs(1));
        store.purge().unwrap();
        assert_eq!(store.inner.in_flight.len(), 0);
    }
}
