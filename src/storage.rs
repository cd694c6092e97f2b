use crate::reclaim::{self, Guard};

use std::borrow::Borrow;
use std::fmt;

/// How a map stores its entries inside bucket nodes.
///
/// A policy fixes the per-node representation (`Slot`) and the capabilities
/// the table needs from it: construction, key access, equality, and
/// retirement. The policy is chosen when the map type is instantiated and
/// applies to every entry; see [`Boxed`] and [`Inline`]. Everything is
/// monomorphized, so the choice costs nothing at runtime.
pub trait Storage<K, V> {
    /// The representation of an entry stored in a bucket node.
    type Slot: Copy;

    /// Builds a slot for the given entry.
    ///
    /// `hash` is the key's full mixed hash, available for fingerprinting.
    fn make(key: K, value: V, hash: u64) -> Self::Slot;

    /// Returns the entry's key.
    ///
    /// # Safety
    ///
    /// The slot's entry must not have been reclaimed.
    unsafe fn key(slot: &Self::Slot) -> &K;

    /// Returns the entry's value.
    ///
    /// # Safety
    ///
    /// The slot's entry must not have been reclaimed.
    unsafe fn value(slot: &Self::Slot) -> &V;

    /// Returns the entry as a pair.
    ///
    /// # Safety
    ///
    /// The slot's entry must not have been reclaimed.
    unsafe fn pair(slot: &Self::Slot) -> (&K, &V);

    /// Returns `true` if the slot's key equals `key`, whose mixed hash is
    /// `hash`.
    ///
    /// # Safety
    ///
    /// The slot's entry must not have been reclaimed.
    unsafe fn matches<Q>(slot: &Self::Slot, key: &Q, hash: u64) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized;

    /// Defers destruction of the entry's out-of-line storage, if any.
    ///
    /// # Safety
    ///
    /// The slot must have been unlinked from the table and is retired only
    /// once.
    unsafe fn retire(slot: Self::Slot, guard: &Guard<'_>);

    /// Frees the entry's out-of-line storage immediately.
    ///
    /// # Safety
    ///
    /// No other reference to the entry may exist.
    unsafe fn dealloc(slot: Self::Slot);
}

/// Entries allocated out-of-line, behind a fingerprinted pointer.
///
/// The node stores a tagged pointer to a heap-allocated `(K, V)`: the top 16
/// bits carry a fingerprint (the top 16 bits of the key's mixed hash), the
/// low 48 bits the address. Lookups compare fingerprints first and only
/// dereference on a match, saving a cache miss per non-matching node.
/// Entries never move, so this works for any key and value type; it is the
/// default policy.
///
/// Relies on the pointer's address fitting in 48 bits, which holds for
/// user-space addresses on the supported 64-bit targets.
pub struct Boxed;

/// Entries stored inline in the bucket node.
///
/// Saves an indirection per access, at the cost of entries being memcpy'd
/// when a bucket is rebuilt or migrated. Restricted to `Copy` entries, which
/// keeps those moves trivial. Opt in with the `storage` method on the map
/// builder or the [`InlineHashMap`](crate::InlineHashMap) alias.
pub struct Inline;

// mask for the address bits of a fingerprinted pointer
const ADDRESS: usize = (1 << 48) - 1;

/// A fingerprinted pointer to a heap-allocated entry.
pub struct BoxedSlot<K, V> {
    ptr: *mut (K, V),
}

impl<K, V> BoxedSlot<K, V> {
    #[inline]
    fn entry(&self) -> *mut (K, V) {
        self.ptr.map_addr(|addr| addr & ADDRESS)
    }

    #[inline]
    fn fingerprint(&self) -> usize {
        self.ptr.addr() >> 48
    }
}

// derived impls would add `K: Clone` style bounds the pointer doesn't need
impl<K, V> Copy for BoxedSlot<K, V> {}

impl<K, V> Clone for BoxedSlot<K, V> {
    fn clone(&self) -> BoxedSlot<K, V> {
        *self
    }
}

impl<K, V> fmt::Debug for BoxedSlot<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedSlot")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl<K, V> Storage<K, V> for Boxed {
    type Slot = BoxedSlot<K, V>;

    #[inline]
    fn make(key: K, value: V, hash: u64) -> BoxedSlot<K, V> {
        let ptr = Box::into_raw(Box::new((key, value)));
        debug_assert_eq!(ptr.addr() & !ADDRESS, 0);

        BoxedSlot {
            ptr: ptr.map_addr(|addr| addr | ((hash >> 48) as usize) << 48),
        }
    }

    #[inline]
    unsafe fn key(slot: &BoxedSlot<K, V>) -> &K {
        // safety: the caller guarantees the entry is live
        unsafe { &(*slot.entry()).0 }
    }

    #[inline]
    unsafe fn value(slot: &BoxedSlot<K, V>) -> &V {
        // safety: the caller guarantees the entry is live
        unsafe { &(*slot.entry()).1 }
    }

    #[inline]
    unsafe fn pair(slot: &BoxedSlot<K, V>) -> (&K, &V) {
        // safety: the caller guarantees the entry is live
        let entry = unsafe { &*slot.entry() };
        (&entry.0, &entry.1)
    }

    #[inline]
    unsafe fn matches<Q>(slot: &BoxedSlot<K, V>, key: &Q, hash: u64) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        // a mismatched fingerprint rules the key out without touching the
        // entry's cache line
        slot.fingerprint() == (hash >> 48) as usize
            && unsafe { (*slot.entry()).0.borrow() == key }
    }

    #[inline]
    unsafe fn retire(slot: BoxedSlot<K, V>, guard: &Guard<'_>) {
        // safety: the caller guarantees the entry was unlinked
        unsafe { guard.retire(slot.entry(), reclaim::boxed::<(K, V)>) }
    }

    #[inline]
    unsafe fn dealloc(slot: BoxedSlot<K, V>) {
        // safety: the caller guarantees exclusive access
        unsafe { drop(Box::from_raw(slot.entry())) }
    }
}

impl<K, V> Storage<K, V> for Inline
where
    K: Copy,
    V: Copy,
{
    type Slot = (K, V);

    #[inline]
    fn make(key: K, value: V, _hash: u64) -> (K, V) {
        (key, value)
    }

    #[inline]
    unsafe fn key(slot: &(K, V)) -> &K {
        &slot.0
    }

    #[inline]
    unsafe fn value(slot: &(K, V)) -> &V {
        &slot.1
    }

    #[inline]
    unsafe fn pair(slot: &(K, V)) -> (&K, &V) {
        (&slot.0, &slot.1)
    }

    #[inline]
    unsafe fn matches<Q>(slot: &(K, V), key: &Q, _hash: u64) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        slot.0.borrow() == key
    }

    #[inline]
    unsafe fn retire(_slot: (K, V), _guard: &Guard<'_>) {}

    #[inline]
    unsafe fn dealloc(_slot: (K, V)) {}
}
