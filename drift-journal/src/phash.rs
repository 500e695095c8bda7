//! Stable 64-bit path hash used as the metadata primary key.

use std::hash::Hasher;

use siphasher::sip::SipHasher24;

// Fixed keys: the hash must be identical across runs and processes,
// it is persisted as the primary key of the metadata table.
const KEY0: u64 = 0x6472_6966_7473_796e;
const KEY1: u64 = 0x6a6f_7572_6e61_6c00;

/// Hash of the UTF-8 byte sequence of a sync path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathHash(pub i64);

impl PathHash {
    /// Sentinel for the reserved empty path.
    pub const INVALID: PathHash = PathHash(-1);

    pub fn compute(path: &str) -> PathHash {
        if path.is_empty() {
            return PathHash::INVALID;
        }
        let mut hasher = SipHasher24::new_with_keys(KEY0, KEY1);
        hasher.write(path.as_bytes());
        PathHash(hasher.finish() as i64)
    }

    pub fn is_valid(&self) -> bool {
        *self != PathHash::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_is_invalid() {
        assert_eq!(PathHash::compute(""), PathHash::INVALID);
        assert!(!PathHash::compute("").is_valid());
    }

    #[test]
    fn hash_is_stable_and_distinct() {
        let a = PathHash::compute("docs/report.txt");
        let b = PathHash::compute("docs/report.txt");
        let c = PathHash::compute("docs/report.md");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_valid());
    }
}
