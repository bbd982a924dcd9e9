//! Keyed 128-bit fingerprints of SQL source text.
use std::fmt;
use std::hash::Hasher;

use rand::rngs::OsRng;
use rand::RngCore;
use siphasher::sip::SipHasher24;

/// Two independent SipHash-2-4 keys.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HashKeys {
    first: (u64, u64),
    second: (u64, u64),
}

impl HashKeys {
    /// Fresh keys from the operating system's CSPRNG.
    pub fn random() -> Self {
        let mut rng = OsRng;
        Self {
            first: (rng.next_u64(), rng.next_u64()),
            second: (rng.next_u64(), rng.next_u64()),
        }
    }

    pub fn from_parts(first: (u64, u64), second: (u64, u64)) -> Self {
        Self { first, second }
    }

    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        let hi = sip(self.first, text);
        let lo = sip(self.second, text);
        Fingerprint(((hi as u128) << 64) | lo as u128)
    }
}

impl fmt::Debug for HashKeys {
    // Keys stay out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashKeys(..)")
    }
}

fn sip((k0, k1): (u64, u64), text: &str) -> u64 {
    let mut h = SipHasher24::new_with_keys(k0, k1);
    h.write(text.as_bytes());
    h.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u128);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
