use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};

use crate::{
    error::Error,
    store::{Iter, IterOptions, Read, Store, Write},
};

/// A value encryption scheme. Key handling is the implementation's concern;
/// the store only hands values through it.
pub trait Mode {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

const NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 authenticated encryption with a fresh random nonce per
/// value, prepended to the ciphertext.
pub struct ChaChaMode {
    cipher: ChaCha20Poly1305,
}

impl ChaChaMode {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }
}

impl Mode for ChaChaMode {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|err| Error::Crypto(err.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|err| Error::Crypto(err.to_string()))
    }
}

/// Wraps a store, transforming every stored value through `mode`. Keys,
/// ordering, bounds, and error semantics of the wrapped store are untouched;
/// empty values pass through without transformation.
pub struct Encrypted<S, M> {
    store: S,
    mode: M,
}

impl<S: Store, M: Mode> Encrypted<S, M> {
    pub fn new(store: S, mode: M) -> Self {
        Self { store, mode }
    }
}

impl<S: Store, M: Mode> Read for Encrypted<S, M> {
    type Iter<'a>
        = EncryptedIterator<'a, S::Iter<'a>, M>
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        let value = self.store.get(key)?;
        if value.is_empty() {
            return Ok(value);
        }
        self.mode.decrypt(&value)
    }

    fn has(&self, key: &[u8]) -> Result<bool, Error> {
        self.store.has(key)
    }

    fn iterator(&self, opts: IterOptions) -> Self::Iter<'_> {
        EncryptedIterator {
            inner: self.store.iterator(opts),
            mode: &self.mode,
        }
    }
}

impl<S: Store, M: Mode> Write for Encrypted<S, M> {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        if value.is_empty() {
            return self.store.set(key, value);
        }
        self.store.set(key, &self.mode.encrypt(value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.store.delete(key)
    }
}

impl<S: Store, M: Mode> Store for Encrypted<S, M> {
    fn close(&self) {
        self.store.close();
    }
}

pub struct EncryptedIterator<'a, I, M> {
    inner: I,
    mode: &'a M,
}

impl<I: Iter, M: Mode> Iter for EncryptedIterator<'_, I, M> {
    fn next(&mut self) -> Result<bool, Error> {
        self.inner.next()
    }

    fn seek(&mut self, target: &[u8]) -> Result<bool, Error> {
        self.inner.seek(target)
    }

    fn key(&self) -> Option<&[u8]> {
        self.inner.key()
    }

    fn value(&self) -> Result<Option<Vec<u8>>, Error> {
        match self.inner.value()? {
            Some(value) if !value.is_empty() => Ok(Some(self.mode.decrypt(&value)?)),
            other => Ok(other),
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn close(&mut self) -> Result<(), Error> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    const KEY: [u8; 32] = [7; 32];

    fn encrypted_store() -> (MemoryStore, Encrypted<MemoryStore, ChaChaMode>) {
        let store = MemoryStore::new();
        (store.clone(), Encrypted::new(store, ChaChaMode::new(&KEY)))
    }

    #[test]
    fn test_mode_round_trips() {
        let mode = ChaChaMode::new(&KEY);
        let ciphertext = mode.encrypt(b"plaintext").unwrap();
        assert_ne!(ciphertext, b"plaintext".to_vec());
        assert_eq!(mode.decrypt(&ciphertext).unwrap(), b"plaintext".to_vec());
    }

    #[test]
    fn test_mode_rejects_tampering() {
        let mode = ChaChaMode::new(&KEY);
        let mut ciphertext = mode.encrypt(b"plaintext").unwrap();
        *ciphertext.last_mut().unwrap() ^= 1;
        assert!(matches!(mode.decrypt(&ciphertext), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_mode_rejects_wrong_key() {
        let ciphertext = ChaChaMode::new(&KEY).encrypt(b"secret").unwrap();
        let other = ChaChaMode::new(&[8; 32]);
        assert!(matches!(other.decrypt(&ciphertext), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_set_get_round_trips() {
        let (raw, store) = encrypted_store();
        store.set(b"k", b"value").unwrap();
        assert_eq!(store.get(b"k").unwrap(), b"value".to_vec());

        // The raw store only ever sees ciphertext.
        let stored = raw.get(b"k").unwrap();
        assert_ne!(stored, b"value".to_vec());
        assert!(stored.len() > b"value".len());
    }

    #[test]
    fn test_empty_value_passes_through() {
        let (raw, store) = encrypted_store();
        store.set(b"k", b"").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Vec::<u8>::new());
        assert_eq!(raw.get(b"k").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_iteration_decrypts_in_order() {
        let (_, store) = encrypted_store();
        store.set(b"b", b"2").unwrap();
        store.set(b"a", b"1").unwrap();
        store.set(b"c", b"3").unwrap();
        store.delete(b"b").unwrap();

        let mut iter = store.iterator(IterOptions::default());
        let mut items = Vec::new();
        while iter.next().unwrap() {
            items.push((
                iter.key().unwrap().to_vec(),
                iter.value().unwrap().unwrap(),
            ));
        }
        assert_eq!(
            items,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_error_semantics_pass_through() {
        let (_, store) = encrypted_store();
        assert_eq!(store.get(b"missing"), Err(Error::NotFound));
        assert_eq!(store.get(b""), Err(Error::EmptyKey));
        assert_eq!(store.set(b"", b"v"), Err(Error::EmptyKey));

        store.close();
        assert_eq!(store.get(b"k"), Err(Error::StoreClosed));
    }
}
