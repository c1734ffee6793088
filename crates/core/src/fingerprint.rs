//! Fingerprint helpers
//!
//! Two kinds of fingerprints exist in the system and both are sha256 hex:
//! - the caller phone fingerprint, an irreversible salted hash of the
//!   normalized number (the raw number must never be persisted or logged)
//! - cache fingerprints, stable deterministic keys derived from feature
//!   tuples

use sha2::{Digest, Sha256};

/// Fingerprint a caller phone number: `sha256(digits_only(phone) + "|" + salt)`.
pub fn phone_fingerprint(phone: &str, salt: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let mut hasher = Sha256::new();
    hasher.update(digits.as_bytes());
    hasher.update(b"|");
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable fingerprint over an ordered feature tuple. Parts are separated by
/// a unit separator so `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn stable_fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Content hash of an utterance, used as a cache key.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_fingerprint_normalizes() {
        let a = phone_fingerprint("+86 138-0013-8000", "salt");
        let b = phone_fingerprint("8613800138000", "salt");
        assert_eq!(a, b);
    }

    #[test]
    fn test_phone_fingerprint_salted() {
        let a = phone_fingerprint("13800138000", "salt-a");
        let b = phone_fingerprint("13800138000", "salt-b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_is_hex_digest() {
        let fp = phone_fingerprint("13800138000", "salt");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_stable_fingerprint_separators() {
        assert_ne!(
            stable_fingerprint(&["ab", "c"]),
            stable_fingerprint(&["a", "bc"])
        );
        assert_eq!(
            stable_fingerprint(&["x", "y"]),
            stable_fingerprint(&["x", "y"])
        );
    }
}
