//! Injection cooldown ring.
//!
//! A short ring of recent payload hashes suppresses injecting the same
//! context block twice in a row. Compaction clears the ring, because after a
//! compaction the agent has genuinely lost the earlier injection.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

/// Number of recent payload hashes remembered.
const RING_SIZE: usize = 3;

/// Hex characters kept from the digest.
const HASH_PREFIX_LEN: usize = 12;

/// First 12 hex characters of the payload's SHA-256.
pub fn payload_hash(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..HASH_PREFIX_LEN].to_string()
}

/// Bounded ring of recent payload hashes.
#[derive(Debug, Default)]
pub struct CooldownRing {
    hashes: VecDeque<String>,
}

impl CooldownRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the payload was seen recently and must be
    /// suppressed; otherwise records it.
    pub fn check_and_record(&mut self, payload: &str) -> bool {
        let hash = payload_hash(payload);
        if self.hashes.contains(&hash) {
            return true;
        }
        self.hashes.push_back(hash);
        while self.hashes.len() > RING_SIZE {
            self.hashes.pop_front();
        }
        false
    }

    /// Forget everything (compaction signal).
    pub fn clear(&mut self) {
        self.hashes.clear();
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_short() {
        let h = payload_hash("hello");
        assert_eq!(h.len(), HASH_PREFIX_LEN);
        assert_eq!(h, payload_hash("hello"));
        assert_ne!(h, payload_hash("hello!"));
    }

    #[test]
    fn test_duplicate_payload_is_suppressed() {
        let mut ring = CooldownRing::new();
        assert!(!ring.check_and_record("payload"));
        assert!(ring.check_and_record("payload"));
    }

    #[test]
    fn test_clear_allows_reinjection() {
        let mut ring = CooldownRing::new();
        assert!(!ring.check_and_record("payload"));
        ring.clear();
        assert!(!ring.check_and_record("payload"));
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut ring = CooldownRing::new();
        for i in 0..10 {
            ring.check_and_record(&format!("payload-{}", i));
        }
        assert_eq!(ring.len(), RING_SIZE);
        // The oldest entries have been evicted and may inject again.
        assert!(!ring.check_and_record("payload-0"));
    }
}
