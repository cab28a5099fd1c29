use std::ops::Bound;

use crate::{
    error::Error,
    memory::{InFlightKey, Inner, Version, VersionedKey},
    store::{Iter, IterOptions, iter::prefix_end},
};

enum State {
    /// Freshly constructed or reset; the next `next` positions at the first
    /// item in the iteration direction.
    FreshOrReset,
    Positioned {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Exhausted,
    Closed,
}

/// A snapshot-consistent cursor over the versioned entry set.
///
/// Each distinct key is resolved to its latest version at or below the
/// snapshot; tombstoned keys and keys whose only versions are newer than the
/// snapshot are skipped. The iterator registers an in-flight record at
/// construction so the purge cycle cannot remove versions it can still see,
/// and releases it on close or drop.
pub struct MemoryIterator<'a> {
    inner: &'a Inner,
    version: Version,
    /// Inclusive lower bound (the prefix itself for prefix iterators).
    start: Option<Vec<u8>>,
    /// Exclusive upper bound.
    end: Option<Vec<u8>>,
    /// For prefix iterators: the one key inside the bounds that must not be
    /// yielded, since prefix iteration yields strict extensions only.
    prefix: Option<Vec<u8>>,
    reverse: bool,
    keys_only: bool,
    /// An error determined at construction (e.g. the owning transaction was
    /// already discarded), reported on every `next`/`seek`.
    fault: Option<Error>,
    pin: Option<InFlightKey>,
    state: State,
}

impl<'a> MemoryIterator<'a> {
    pub(crate) fn new(
        inner: &'a Inner,
        version: Version,
        opts: IterOptions,
        fault: Option<Error>,
    ) -> Self {
        let (start, end, prefix) = match opts.prefix {
            Some(prefix) => (
                Some(prefix.clone()),
                prefix_end(&prefix),
                Some(prefix),
            ),
            None => (opts.start, opts.end, None),
        };
        let pin = (fault.is_none() && inner.is_open()).then(|| inner.register(version));
        Self {
            inner,
            version,
            start,
            end,
            prefix,
            reverse: opts.reverse,
            keys_only: opts.keys_only,
            fault,
            pin,
            state: State::FreshOrReset,
        }
    }

    fn in_bounds(&self, key: &[u8]) -> bool {
        if let Some(start) = &self.start {
            if key < start.as_slice() {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if key >= end.as_slice() {
                return false;
            }
        }
        true
    }

    /// The smallest distinct key at or after `from` (strictly after when
    /// `exclusive`); `None` starts from the front of the entry set.
    fn key_forward(&self, from: Option<&[u8]>, exclusive: bool) -> Option<Vec<u8>> {
        let entry = match from {
            None => self.inner.values.front(),
            Some(key) => {
                // (key, MAX) sits after every version of `key`, so an
                // exclusive probe lands on the next distinct key.
                let bound = if exclusive {
                    VersionedKey::new(key, Version::MAX)
                } else {
                    VersionedKey::new(key, 0)
                };
                let bound = if exclusive {
                    Bound::Excluded(&bound)
                } else {
                    Bound::Included(&bound)
                };
                self.inner.values.lower_bound(bound)
            }
        }?;
        Some(entry.key().key.clone())
    }

    /// The largest distinct key at or before `from` (strictly before when
    /// `exclusive`); `None` starts from the back of the entry set.
    fn key_reverse(&self, from: Option<&[u8]>, exclusive: bool) -> Option<Vec<u8>> {
        let entry = match from {
            None => self.inner.values.back(),
            Some(key) => {
                let bound = if exclusive {
                    VersionedKey::new(key, 0)
                } else {
                    VersionedKey::new(key, Version::MAX)
                };
                let bound = if exclusive {
                    Bound::Excluded(&bound)
                } else {
                    Bound::Included(&bound)
                };
                self.inner.values.upper_bound(bound)
            }
        }?;
        Some(entry.key().key.clone())
    }

    fn key_step(&self, from: Option<&[u8]>, exclusive: bool) -> Option<Vec<u8>> {
        if self.reverse {
            self.key_reverse(from, exclusive)
        } else {
            self.key_forward(from, exclusive)
        }
    }

    /// Walks distinct keys in the iteration direction from `from` until one
    /// is in bounds, is not the excluded prefix, and has a live (non
    /// tombstone) version at the snapshot. A candidate out of bounds
    /// terminates the walk.
    fn advance(&self, from: Option<&[u8]>, exclusive: bool) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut probe = self.key_step(from, exclusive)?;
        loop {
            if !self.in_bounds(&probe) {
                return None;
            }
            if self.prefix.as_deref() != Some(probe.as_slice()) {
                if let Some((_, entry)) = self.inner.visible(&probe, self.version) {
                    if !entry.tombstone {
                        return Some((probe, entry.value));
                    }
                }
            }
            probe = self.key_step(Some(probe.as_slice()), true)?;
        }
    }

    fn first(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.reverse {
            // `end` is exclusive, so the first reverse candidate is the
            // largest key strictly below it.
            match &self.end {
                Some(end) => self.advance(Some(end.as_slice()), true),
                None => self.advance(None, false),
            }
        } else {
            match &self.start {
                Some(start) => self.advance(Some(start.as_slice()), false),
                None => self.advance(None, false),
            }
        }
    }

    fn settle(&mut self, found: Option<(Vec<u8>, Vec<u8>)>) -> bool {
        match found {
            Some((key, value)) => {
                self.state = State::Positioned { key, value };
                true
            }
            None => {
                self.state = State::Exhausted;
                false
            }
        }
    }
}

impl Iter for MemoryIterator<'_> {
    fn next(&mut self) -> Result<bool, Error> {
        if let Some(err) = &self.fault {
            return Err(err.clone());
        }
        let _guard = self.inner.read_guard()?;
        let found = match &self.state {
            State::Closed | State::Exhausted => return Ok(false),
            State::FreshOrReset => self.first(),
            State::Positioned { key, .. } => self.advance(Some(key.as_slice()), true),
        };
        Ok(self.settle(found))
    }

    fn seek(&mut self, target: &[u8]) -> Result<bool, Error> {
        if let Some(err) = &self.fault {
            return Err(err.clone());
        }
        let _guard = self.inner.read_guard()?;
        if matches!(self.state, State::Closed) {
            return Ok(false);
        }
        let found = if self.reverse {
            // Clamp down to the exclusive upper bound; a target at or past
            // it positions on the largest key strictly below the bound.
            match &self.end {
                Some(end) if target >= end.as_slice() => self.advance(Some(end.as_slice()), true),
                _ => self.advance(Some(target), false),
            }
        } else {
            // Clamp up to the inclusive lower bound.
            match &self.start {
                Some(start) if target < start.as_slice() => {
                    self.advance(Some(start.as_slice()), false)
                }
                _ => self.advance(Some(target), false),
            }
        };
        Ok(self.settle(found))
    }

    fn key(&self) -> Option<&[u8]> {
        match &self.state {
            State::Positioned { key, .. } => Some(key),
            _ => None,
        }
    }

    fn value(&self) -> Result<Option<Vec<u8>>, Error> {
        match &self.state {
            State::Positioned { value, .. } => {
                if self.keys_only {
                    Ok(Some(Vec::new()))
                } else {
                    Ok(Some(value.clone()))
                }
            }
            _ => Ok(None),
        }
    }

    fn reset(&mut self) {
        if !matches!(self.state, State::Closed) {
            self.state = State::FreshOrReset;
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(pin) = self.pin.take() {
            self.inner.unregister(pin);
        }
        self.state = State::Closed;
        Ok(())
    }
}

impl Drop for MemoryIterator<'_> {
    fn drop(&mut self) {
        if let Some(pin) = self.pin.take() {
            self.inner.unregister(pin);
        }
    }
}
