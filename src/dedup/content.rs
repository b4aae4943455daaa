use std::fmt;

use sha2::{Digest, Sha256};

use super::SeenMap;

/// SHA-256 digest of a raw response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(body);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Admission memo: has a body with this content been scanned before?
///
/// Only the boolean decision is kept; bodies themselves are never stored.
pub struct ContentCache {
    seen: SeenMap<Fingerprint, ()>,
}

impl ContentCache {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            seen: SeenMap::with_capacity(capacity),
        }
    }

    /// Record `body` and return `true` if this caller is the first to see it.
    pub fn should_scan(&self, body: &[u8]) -> bool {
        self.should_scan_fingerprint(Fingerprint::of(body))
    }

    pub fn should_scan_fingerprint(&self, fingerprint: Fingerprint) -> bool {
        self.seen.claim(fingerprint, ())
    }

    pub fn contains(&self, body: &[u8]) -> bool {
        self.seen.contains(&Fingerprint::of(body))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(None)
    }
}
