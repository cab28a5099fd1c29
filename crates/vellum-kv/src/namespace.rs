use crate::{
    error::Error,
    store::{Iter, IterOptions, Read, Store, Write},
};

/// Exposes one keyspace slice of another store as a logical store of its
/// own: every key is prepended with the namespace on the way in and stripped
/// on the way out. The mapping is a bijection on keys extending the
/// namespace, so ordering and snapshot guarantees of the wrapped store carry
/// through unchanged.
pub struct Namespace<S> {
    namespace: Vec<u8>,
    store: S,
}

fn prefixed(namespace: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(namespace.len() + key.len());
    out.extend_from_slice(namespace);
    out.extend_from_slice(key);
    out
}

impl<S: Store> Namespace<S> {
    pub fn new(store: S, namespace: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace: namespace.into(),
            store,
        }
    }

    pub fn namespace(&self) -> &[u8] {
        &self.namespace
    }

    fn prefixed(&self, key: &[u8]) -> Vec<u8> {
        prefixed(&self.namespace, key)
    }
}

impl<S: Store> Read for Namespace<S> {
    type Iter<'a>
        = NamespaceIterator<S::Iter<'a>>
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.store.get(&self.prefixed(key))
    }

    fn has(&self, key: &[u8]) -> Result<bool, Error> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.store.has(&self.prefixed(key))
    }

    fn iterator(&self, mut opts: IterOptions) -> Self::Iter<'_> {
        if let Some(prefix) = opts.prefix.take() {
            opts.prefix = Some(self.prefixed(&prefix));
        } else if opts.start.is_none() && opts.end.is_none() {
            // Without bounds the underlying store would start outside the
            // namespace entirely; scope the whole iteration to it instead.
            // Prefix iteration also skips the key equal to the namespace,
            // which would be the (reserved) empty logical key.
            opts.prefix = Some(self.namespace.clone());
        } else {
            if let Some(start) = opts.start.take() {
                opts.start = Some(self.prefixed(&start));
            }
            if let Some(end) = opts.end.take() {
                opts.end = Some(self.prefixed(&end));
            }
        }
        NamespaceIterator {
            namespace: self.namespace.clone(),
            inner: self.store.iterator(opts),
            escaped: false,
        }
    }
}

impl<S: Store> Write for Namespace<S> {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.store.set(&self.prefixed(key), value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.store.delete(&self.prefixed(key))
    }
}

impl<S: Store> Store for Namespace<S> {
    fn close(&self) {
        self.store.close();
    }
}

/// Iterates a namespaced store, stripping the namespace from yielded keys.
/// When only one of start/end was bounded, the underlying iterator can run
/// off the namespace; the first such key terminates the iteration.
pub struct NamespaceIterator<I> {
    namespace: Vec<u8>,
    inner: I,
    escaped: bool,
}

impl<I: Iter> NamespaceIterator<I> {
    /// Validates the underlying position: skips the key equal to the
    /// namespace, terminates on a key outside it.
    fn settle(&mut self, mut has: bool) -> Result<bool, Error> {
        loop {
            if !has {
                return Ok(false);
            }
            let (exact, inside) = match self.inner.key() {
                Some(key) => (
                    key == self.namespace.as_slice(),
                    key.starts_with(&self.namespace),
                ),
                None => return Ok(false),
            };
            if exact {
                has = self.inner.next()?;
                continue;
            }
            if !inside {
                self.escaped = true;
                return Ok(false);
            }
            return Ok(true);
        }
    }
}

impl<I: Iter> Iter for NamespaceIterator<I> {
    fn next(&mut self) -> Result<bool, Error> {
        if self.escaped {
            return Ok(false);
        }
        let has = self.inner.next()?;
        self.settle(has)
    }

    fn seek(&mut self, target: &[u8]) -> Result<bool, Error> {
        self.escaped = false;
        let has = self.inner.seek(&prefixed(&self.namespace, target))?;
        self.settle(has)
    }

    fn key(&self) -> Option<&[u8]> {
        self.inner
            .key()
            .and_then(|key| key.strip_prefix(self.namespace.as_slice()))
    }

    fn value(&self) -> Result<Option<Vec<u8>>, Error> {
        self.inner.value()
    }

    fn reset(&mut self) {
        self.escaped = false;
        self.inner.reset();
    }

    fn close(&mut self) -> Result<(), Error> {
        self.inner.close()
    }
}
