use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};

/// The hashing discipline for a map: turns a key into the 64-bit value the
/// table indexes and fingerprints with.
///
/// The standard hashers ([`RandomState`] and any [`BuildHasherDefault`])
/// get implementations that finalize the hasher output with a 64-bit
/// avalanche mix, so hash functions with weak high or low bits (integer
/// identity hashes and the like) still spread across buckets and produce
/// usable fingerprints. Wrap a hasher in [`Avalanching`] to use its output
/// verbatim, or implement this trait directly for full control.
pub trait HashKey {
    /// Hashes the key to the full 64-bit value used for bucket selection
    /// and fingerprinting.
    fn hash_key<Q: Hash + ?Sized>(&self, key: &Q) -> u64;
}

impl HashKey for RandomState {
    #[inline]
    fn hash_key<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        mix(self.hash_one(key))
    }
}

impl<H: Hasher + Default> HashKey for BuildHasherDefault<H> {
    #[inline]
    fn hash_key<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        mix(self.hash_one(key))
    }
}

/// Marks a [`BuildHasher`] whose output is already well mixed, instructing
/// the table to use it verbatim.
///
/// The top 16 bits of the hash become entry fingerprints and the low bits
/// select the bucket, so the wrapped hasher must distribute across the whole
/// 64-bit range. Useful for hashers that finalize internally and would only
/// waste cycles being mixed twice.
///
/// # Examples
///
/// ```
/// use loquat::{Avalanching, HashMap};
/// use std::collections::hash_map::RandomState;
///
/// let map: HashMap<u64, u64, _> = HashMap::with_hasher(Avalanching(RandomState::new()));
/// map.pin().insert(1, 1);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Avalanching<S>(pub S);

impl<S: BuildHasher> HashKey for Avalanching<S> {
    #[inline]
    fn hash_key<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.0.hash_one(key)
    }
}

// A fixed-point multiply-shift finalizer (the `splitmix64` constant): a
// linear transform followed by a non-linear one.
#[inline]
pub(crate) fn mix(hash: u64) -> u64 {
    let x = hash.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^ (x >> 31)
}
