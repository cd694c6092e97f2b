use crate::hash::HashKey;
use crate::raw;
use crate::reclaim::{Collector, Guard};
use crate::storage::{Boxed, Inline, Storage};

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// A concurrent hash map.
///
/// Most operations require a [`Guard`], which can be acquired through
/// [`HashMap::guard`] or the [`HashMap::pin`] API. See the
/// [crate-level documentation](crate) for details.
pub struct HashMap<K, V, S = RandomState, P: Storage<K, V> = Boxed> {
    raw: raw::HashMap<K, V, S, P>,
}

/// A concurrent hash map storing its entries inline.
///
/// See [`Inline`] for the trade-offs against the default [`Boxed`]
/// representation.
pub type InlineHashMap<K, V, S = RandomState> = HashMap<K, V, S, Inline>;

// Safety: references to keys and values are only handed out under a guard,
// and entries are dropped on whichever thread retires them last.
unsafe impl<K: Send, V: Send, S: Send, P: Storage<K, V>> Send for HashMap<K, V, S, P> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync, P: Storage<K, V>> Sync
    for HashMap<K, V, S, P>
{
}

/// A builder for a [`HashMap`].
///
/// # Examples
///
/// ```rust
/// use loquat::{Collector, HashMap};
/// use std::collections::hash_map::RandomState;
///
/// let map: HashMap<i32, i32> = HashMap::builder()
///     // Set the initial capacity.
///     .capacity(2048)
///     // Set the hasher.
///     .hasher(RandomState::new())
///     // Share a collector with other maps.
///     .collector(Collector::new())
///     // Construct the hash map.
///     .build();
/// ```
pub struct HashMapBuilder<K, V, S = RandomState, P = Boxed> {
    hasher: S,
    capacity: usize,
    collector: Collector,
    _kv: PhantomData<(K, V, P)>,
}

impl<K, V> HashMapBuilder<K, V> {
    /// Set the hasher used to hash keys.
    ///
    /// The map applies a 64-bit finalizer to whatever the hasher produces,
    /// unless the hasher is wrapped in [`Avalanching`](crate::Avalanching).
    pub fn hasher<S>(self, hasher: S) -> HashMapBuilder<K, V, S> {
        HashMapBuilder {
            hasher,
            capacity: self.capacity,
            collector: self.collector,
            _kv: PhantomData,
        }
    }
}

impl<K, V, S, P> HashMapBuilder<K, V, S, P> {
    /// Set the initial capacity of the map.
    ///
    /// The table grows automatically; the capacity only sizes the initial
    /// bucket array. A capacity of zero is treated as one.
    pub fn capacity(self, capacity: usize) -> HashMapBuilder<K, V, S, P> {
        HashMapBuilder {
            capacity,
            hasher: self.hasher,
            collector: self.collector,
            _kv: PhantomData,
        }
    }

    /// Set the entry storage policy. See [`Boxed`] and [`Inline`] for the
    /// options.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use loquat::{HashMap, Inline};
    ///
    /// let map: HashMap<u32, u32, _, Inline> =
    ///     HashMap::builder().storage::<Inline>().build();
    /// map.pin().insert(1, 1);
    /// ```
    pub fn storage<P2>(self) -> HashMapBuilder<K, V, S, P2> {
        HashMapBuilder {
            hasher: self.hasher,
            capacity: self.capacity,
            collector: self.collector,
            _kv: PhantomData,
        }
    }

    /// Set the [`Collector`] used for memory reclamation.
    ///
    /// By default every map owns its collector, and dropping the map drains
    /// it. Maps can share one collector; note that all guards used to access
    /// the map must then come from that collector.
    pub fn collector(self, collector: Collector) -> Self {
        HashMapBuilder {
            collector,
            hasher: self.hasher,
            capacity: self.capacity,
            _kv: PhantomData,
        }
    }

    /// Construct a [`HashMap`] from the builder, using the configured
    /// options.
    pub fn build(self) -> HashMap<K, V, S, P>
    where
        P: Storage<K, V>,
    {
        HashMap {
            raw: raw::HashMap::new(self.capacity, self.hasher, self.collector),
        }
    }
}

impl<K, V, S, P> fmt::Debug for HashMapBuilder<K, V, S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashMapBuilder")
            .field("capacity", &self.capacity)
            .field("collector", &self.collector)
            .finish()
    }
}

impl<K, V> HashMap<K, V> {
    /// Creates an empty `HashMap`.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::new();
    /// ```
    pub fn new() -> HashMap<K, V> {
        HashMap::with_capacity_and_hasher(1, RandomState::new())
    }

    /// Creates an empty `HashMap` with the specified capacity.
    ///
    /// The table grows automatically, starting from a bucket array sized for
    /// at least `capacity` entries.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::with_capacity(10);
    /// ```
    pub fn with_capacity(capacity: usize) -> HashMap<K, V> {
        HashMap::with_capacity_and_hasher(capacity, RandomState::new())
    }

    /// Returns a builder for a `HashMap`.
    ///
    /// The builder can be used for more complex configuration, such as a
    /// shared [`Collector`] or the [`Inline`] storage policy.
    pub fn builder() -> HashMapBuilder<K, V> {
        HashMapBuilder {
            capacity: 1,
            hasher: RandomState::default(),
            collector: Collector::new(),
            _kv: PhantomData,
        }
    }
}

impl<K, V, S, P> Default for HashMap<K, V, S, P>
where
    S: Default,
    P: Storage<K, V>,
{
    fn default() -> Self {
        HashMap::with_hasher(S::default())
    }
}

impl<K, V, S, P: Storage<K, V>> HashMap<K, V, S, P> {
    /// Creates an empty `HashMap` which will use the given hasher.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let map: HashMap<i32, i32, _> = HashMap::with_hasher(RandomState::new());
    /// map.pin().insert(1, 2);
    /// ```
    pub fn with_hasher(hasher: S) -> HashMap<K, V, S, P> {
        HashMap::with_capacity_and_hasher(1, hasher)
    }

    /// Creates an empty `HashMap` with at least the specified capacity,
    /// using `hasher` to hash the keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let map: HashMap<i32, i32, _> = HashMap::with_capacity_and_hasher(10, RandomState::new());
    /// map.pin().insert(1, 2);
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> HashMap<K, V, S, P> {
        HashMap {
            raw: raw::HashMap::new(capacity, hasher, Collector::new()),
        }
    }

    /// Returns a pinned reference to the map.
    ///
    /// The returned reference manages a guard internally, preventing
    /// reclamation for as long as it is held.
    #[inline]
    pub fn pin(&self) -> HashMapRef<'_, K, V, S, P> {
        HashMapRef {
            guard: self.guard(),
            map: self,
        }
    }

    /// Returns a guard for use with this map.
    ///
    /// Note that holding on to a guard pins the current epoch and prevents
    /// all reclamation.
    #[inline]
    pub fn guard(&self) -> Guard<'_> {
        self.raw.guard()
    }

    /// Returns the collector this map allocates through.
    #[inline]
    pub fn collector(&self) -> &Collector {
        self.raw.collector()
    }

    #[inline]
    pub(crate) fn hasher(&self) -> &S {
        &self.raw.hasher
    }
}

impl<K, V, S, P> HashMap<K, V, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, V>,
{
    /// Returns the number of entries in the map.
    ///
    /// The value is summed from per-thread counters: exact when the map is
    /// quiescent, an estimate while it is being written concurrently. It is
    /// *not* linearizable with point operations.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    ///
    /// map.pin().insert(1, "a");
    /// map.pin().insert(2, "b");
    /// assert!(map.len() == 2);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map is empty. Otherwise returns `false`.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    /// assert!(map.is_empty());
    /// map.pin().insert("a", 1);
    /// assert!(!map.is_empty());
    /// ```
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// The key may be any borrowed form of the map's key type, but [`Hash`]
    /// and [`Eq`] on the borrowed form *must* match those for the key type.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// m.insert(1, "a");
    /// assert_eq!(m.contains_key(&1), true);
    /// assert_eq!(m.contains_key(&2), false);
    /// ```
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q, guard: &Guard<'_>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key, guard).is_some()
    }

    /// Returns the number of entries for the specified key: zero or one.
    #[inline]
    pub fn count<Q>(&self, key: &Q, guard: &Guard<'_>) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.contains_key(key, guard) as usize
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// m.insert(1, "a");
    /// assert_eq!(m.get(&1), Some(&"a"));
    /// assert_eq!(m.get(&2), None);
    /// ```
    #[inline]
    pub fn get<'g, Q>(&self, key: &Q, guard: &'g Guard<'_>) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        P::Slot: 'g,
    {
        let hash = self.raw.hasher.hash_key(key);

        match self.raw.get(key, hash, guard) {
            // safety: the slot was returned under `guard`
            Some(slot) => Some(unsafe { P::value(slot) }),
            None => None,
        }
    }

    /// Returns the key-value pair corresponding to the supplied key.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// m.insert(1, "a");
    /// assert_eq!(m.get_key_value(&1), Some((&1, &"a")));
    /// assert_eq!(m.get_key_value(&2), None);
    /// ```
    #[inline]
    pub fn get_key_value<'g, Q>(&self, key: &Q, guard: &'g Guard<'_>) -> Option<(&'g K, &'g V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        P::Slot: 'g,
    {
        let hash = self.raw.hasher.hash_key(key);

        match self.raw.get(key, hash, guard) {
            // safety: the slot was returned under `guard`
            Some(slot) => Some(unsafe { P::pair(slot) }),
            None => None,
        }
    }

    /// Inserts a key-value pair into the map if the key is not already
    /// present.
    ///
    /// If the map did not have this key present, [`None`] is returned and
    /// the entry is inserted. If the key is present, the map is **not**
    /// modified and a reference to the current value is returned. Use
    /// [`upsert`](HashMap::upsert) to overwrite.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// assert_eq!(m.insert(37, "a"), None);
    /// assert_eq!(m.insert(37, "b"), Some(&"a"));
    /// assert_eq!(m.get(&37), Some(&"a"));
    /// ```
    #[inline]
    pub fn insert<'g>(&self, key: K, value: V, guard: &'g Guard<'_>) -> Option<&'g V>
    where
        P::Slot: 'g,
    {
        let hash = self.raw.hasher.hash_key(&key);

        match self.raw.insert(key, value, hash, guard) {
            // safety: the slot was returned under `guard`
            Some(slot) => Some(unsafe { P::value(slot) }),
            None => None,
        }
    }

    /// Inserts a key-value pair if the key is not already present, returning
    /// `true` if the insert took place.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// assert!(m.insert_if_absent(1, "a"));
    /// assert!(!m.insert_if_absent(1, "b"));
    /// ```
    #[inline]
    pub fn insert_if_absent(&self, key: K, value: V, guard: &Guard<'_>) -> bool {
        self.insert(key, value, guard).is_none()
    }

    /// Inserts or updates the entry for `key` with the value `update`
    /// computes from the current one.
    ///
    /// The update function receives the current value, or `None` if the key
    /// is absent, and returns the value to store. It always takes effect.
    /// Returns the prior value, if any.
    ///
    /// The update is applied atomically only if the bucket is not modified
    /// concurrently; otherwise the operation retries, so `update` should be
    /// pure as it may be called multiple times.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    ///
    /// let bump = |v: Option<&i32>| v.map(|n| n + 1).unwrap_or(0);
    /// assert_eq!(m.upsert(1, bump), None);
    /// assert_eq!(m.upsert(1, bump), Some(&0));
    /// assert_eq!(m.get(&1), Some(&1));
    /// ```
    #[inline]
    pub fn upsert<'g, F>(&self, key: K, update: F, guard: &'g Guard<'_>) -> Option<&'g V>
    where
        K: Clone,
        F: Fn(Option<&V>) -> V,
        P::Slot: 'g,
    {
        let hash = self.raw.hasher.hash_key(&key);

        match self.raw.upsert(key, update, hash, guard) {
            // safety: the slot was returned under `guard`
            Some(slot) => Some(unsafe { P::value(slot) }),
            None => None,
        }
    }

    /// Removes a key from the map, returning the value at the key if the
    /// key was previously in the map.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    /// map.pin().insert(1, "a");
    /// assert_eq!(map.pin().remove(&1), Some(&"a"));
    /// assert_eq!(map.pin().remove(&1), None);
    /// ```
    #[inline]
    pub fn remove<'g, Q>(&self, key: &Q, guard: &'g Guard<'_>) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        P::Slot: 'g,
    {
        let hash = self.raw.hasher.hash_key(key);

        match self.raw.remove(key, hash, guard) {
            // safety: the slot was returned under `guard`
            Some(slot) => Some(unsafe { P::value(slot) }),
            None => None,
        }
    }

    /// Removes a key from the map, returning the stored key and value if
    /// the key was previously in the map.
    #[inline]
    pub fn remove_entry<'g, Q>(&self, key: &Q, guard: &'g Guard<'_>) -> Option<(&'g K, &'g V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        P::Slot: 'g,
    {
        let hash = self.raw.hasher.hash_key(key);

        match self.raw.remove(key, hash, guard) {
            // safety: the slot was returned under `guard`
            Some(slot) => Some(unsafe { P::pair(slot) }),
            None => None,
        }
    }

    /// Clears the map, removing all key-value pairs.
    ///
    /// Note that this method drives any in-progress resize to completion
    /// before proceeding.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::new();
    ///
    /// map.pin().insert(1, "a");
    /// map.pin().clear();
    /// assert!(map.pin().is_empty());
    /// ```
    #[inline]
    pub fn clear(&self, guard: &Guard<'_>) {
        self.raw.clear(guard)
    }

    /// An iterator visiting all key-value pairs in arbitrary order.
    /// The iterator element type is `(&K, &V)`.
    ///
    /// Each bucket is observed as an atomic snapshot of its chain, and this
    /// method drives any in-progress resize to completion before iterating.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashMap;
    ///
    /// let map = HashMap::from([("a", 1), ("b", 2)]);
    ///
    /// let guard = map.guard();
    /// for (key, value) in map.iter(&guard) {
    ///     println!("{key}: {value}");
    /// }
    /// ```
    #[inline]
    pub fn iter<'g>(&self, guard: &'g Guard<'_>) -> Iter<'g, K, V, P> {
        Iter {
            raw: self.raw.iter(guard),
        }
    }

    /// An iterator visiting all keys in arbitrary order.
    /// The iterator element type is `&K`.
    #[inline]
    pub fn keys<'g>(&self, guard: &'g Guard<'_>) -> Keys<'g, K, V, P> {
        Keys {
            iter: self.iter(guard),
        }
    }

    /// An iterator visiting all values in arbitrary order.
    /// The iterator element type is `&V`.
    #[inline]
    pub fn values<'g>(&self, guard: &'g Guard<'_>) -> Values<'g, K, V, P> {
        Values {
            iter: self.iter(guard),
        }
    }
}

impl<K, V, S, P> PartialEq for HashMap<K, V, S, P>
where
    K: Hash + Eq,
    V: PartialEq,
    S: HashKey,
    P: Storage<K, V>,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }

        let (guard1, guard2) = (&self.guard(), &other.guard());

        let mut iter = self.iter(guard1);
        iter.all(|(key, value)| other.get(key, guard2).map_or(false, |v| *value == *v))
    }
}

impl<K, V, S, P> Eq for HashMap<K, V, S, P>
where
    K: Hash + Eq,
    V: Eq,
    S: HashKey,
    P: Storage<K, V>,
{
}

impl<K, V, S, P> fmt::Debug for HashMap<K, V, S, P>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: HashKey,
    P: Storage<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.guard();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

impl<K, V, S, P> Extend<(K, V)> for &HashMap<K, V, S, P>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: HashKey,
    P: Storage<K, V>,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        let guard = self.guard();

        for (key, value) in iter {
            // later occurrences of a key win, like the standard library
            self.upsert(key, move |_| value.clone(), &guard);
        }
    }
}

impl<'a, K, V, S, P> Extend<(&'a K, &'a V)> for &HashMap<K, V, S, P>
where
    K: Copy + Hash + Eq,
    V: Copy,
    S: HashKey,
    P: Storage<K, V>,
{
    fn extend<T: IntoIterator<Item = (&'a K, &'a V)>>(&mut self, iter: T) {
        self.extend(iter.into_iter().map(|(&key, &value)| (key, value)));
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for HashMap<K, V, RandomState>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn from(arr: [(K, V); N]) -> Self {
        HashMap::from_iter(arr)
    }
}

impl<K, V, S, P> FromIterator<(K, V)> for HashMap<K, V, S, P>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: HashKey + Default,
    P: Storage<K, V>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut iter = iter.into_iter();

        match iter.next() {
            None => Self::default(),
            Some((key, value)) => {
                let (lower, _) = iter.size_hint();
                let map = HashMap::with_capacity_and_hasher(
                    lower.saturating_add(1),
                    S::default(),
                );

                {
                    let mut map = &map;
                    map.extend(std::iter::once((key, value)).chain(iter));
                }

                map
            }
        }
    }
}

impl<K, V, S, P> Clone for HashMap<K, V, S, P>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: HashKey + Clone,
    P: Storage<K, V>,
{
    fn clone(&self) -> HashMap<K, V, S, P> {
        let other = HashMap {
            raw: raw::HashMap::new(self.len(), self.raw.hasher.clone(), Collector::new()),
        };

        {
            let (guard1, guard2) = (&self.guard(), &other.guard());
            for (key, value) in self.iter(guard1) {
                other.insert(key.clone(), value.clone(), guard2);
            }
        }

        other
    }
}

/// A pinned reference to a [`HashMap`].
///
/// This type is created with [`HashMap::pin`] and can be used to access a
/// [`HashMap`] without explicitly managing a guard.
pub struct HashMapRef<'map, K, V, S, P: Storage<K, V>> {
    guard: Guard<'map>,
    map: &'map HashMap<K, V, S, P>,
}

impl<'map, K, V, S, P> HashMapRef<'map, K, V, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, V>,
{
    /// Returns a reference to the inner [`HashMap`].
    #[inline]
    pub fn map(&self) -> &'map HashMap<K, V, S, P> {
        self.map
    }

    /// Returns the number of entries in the map.
    ///
    /// See [`HashMap::len`] for details.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the map is empty. Otherwise returns `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// See [`HashMap::contains_key`] for details.
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key, &self.guard)
    }

    /// Returns the number of entries for the specified key: zero or one.
    ///
    /// See [`HashMap::count`] for details.
    #[inline]
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.count(key, &self.guard)
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// See [`HashMap::get`] for details.
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key, &self.guard)
    }

    /// Returns the key-value pair corresponding to the supplied key.
    ///
    /// See [`HashMap::get_key_value`] for details.
    #[inline]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get_key_value(key, &self.guard)
    }

    /// Inserts a key-value pair into the map if the key is not already
    /// present.
    ///
    /// See [`HashMap::insert`] for details.
    #[inline]
    pub fn insert(&self, key: K, value: V) -> Option<&V> {
        self.map.insert(key, value, &self.guard)
    }

    /// Inserts a key-value pair if the key is not already present, returning
    /// `true` if the insert took place.
    ///
    /// See [`HashMap::insert_if_absent`] for details.
    #[inline]
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        self.map.insert_if_absent(key, value, &self.guard)
    }

    /// Inserts or updates the entry for `key` with the value `update`
    /// computes from the current one.
    ///
    /// See [`HashMap::upsert`] for details.
    #[inline]
    pub fn upsert<F>(&self, key: K, update: F) -> Option<&V>
    where
        K: Clone,
        F: Fn(Option<&V>) -> V,
    {
        self.map.upsert(key, update, &self.guard)
    }

    /// Removes a key from the map, returning the value at the key if the
    /// key was previously in the map.
    ///
    /// See [`HashMap::remove`] for details.
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key, &self.guard)
    }

    /// Removes a key from the map, returning the stored key and value if
    /// the key was previously in the map.
    ///
    /// See [`HashMap::remove_entry`] for details.
    #[inline]
    pub fn remove_entry<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove_entry(key, &self.guard)
    }

    /// Clears the map, removing all key-value pairs.
    ///
    /// See [`HashMap::clear`] for details.
    #[inline]
    pub fn clear(&self) {
        self.map.clear(&self.guard)
    }

    /// An iterator visiting all key-value pairs in arbitrary order.
    ///
    /// See [`HashMap::iter`] for details.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, V, P> {
        self.map.iter(&self.guard)
    }

    /// An iterator visiting all keys in arbitrary order.
    ///
    /// See [`HashMap::keys`] for details.
    #[inline]
    pub fn keys(&self) -> Keys<'_, K, V, P> {
        self.map.keys(&self.guard)
    }

    /// An iterator visiting all values in arbitrary order.
    ///
    /// See [`HashMap::values`] for details.
    #[inline]
    pub fn values(&self) -> Values<'_, K, V, P> {
        self.map.values(&self.guard)
    }
}

impl<K, V, S, P> fmt::Debug for HashMapRef<'_, K, V, S, P>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: HashKey,
    P: Storage<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V, S, P> IntoIterator for &'a HashMapRef<'_, K, V, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, V>,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over a map's entries.
///
/// This struct is created by the [`iter`](HashMap::iter) method on
/// [`HashMap`]. See its documentation for details.
pub struct Iter<'g, K, V, P: Storage<K, V>> {
    raw: raw::Iter<'g, K, V, P>,
}

impl<'g, K: 'g, V: 'g, P: Storage<K, V>> Iterator for Iter<'g, K, V, P>
where
    P::Slot: 'g,
{
    type Item = (&'g K, &'g V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        // safety: the slot is protected by the iterator's guard
        self.raw.next().map(|slot| unsafe { P::pair(slot) })
    }
}

impl<K, V, P> fmt::Debug for Iter<'_, K, V, P>
where
    K: fmt::Debug,
    V: fmt::Debug,
    P: Storage<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Iter {
                raw: self.raw.clone(),
            })
            .finish()
    }
}

/// An iterator over a map's keys.
///
/// This struct is created by the [`keys`](HashMap::keys) method on
/// [`HashMap`]. See its documentation for details.
pub struct Keys<'g, K, V, P: Storage<K, V>> {
    iter: Iter<'g, K, V, P>,
}

impl<'g, K: 'g, V: 'g, P: Storage<K, V>> Iterator for Keys<'g, K, V, P>
where
    P::Slot: 'g,
{
    type Item = &'g K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (key, _) = self.iter.next()?;
        Some(key)
    }
}

impl<K, V, P> fmt::Debug for Keys<'_, K, V, P>
where
    K: fmt::Debug,
    V: fmt::Debug,
    P: Storage<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Keys").field(&self.iter).finish()
    }
}

/// An iterator over a map's values.
///
/// This struct is created by the [`values`](HashMap::values) method on
/// [`HashMap`]. See its documentation for details.
pub struct Values<'g, K, V, P: Storage<K, V>> {
    iter: Iter<'g, K, V, P>,
}

impl<'g, K: 'g, V: 'g, P: Storage<K, V>> Iterator for Values<'g, K, V, P>
where
    P::Slot: 'g,
{
    type Item = &'g V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (_, value) = self.iter.next()?;
        Some(value)
    }
}

impl<K, V, P> fmt::Debug for Values<'_, K, V, P>
where
    K: fmt::Debug,
    V: fmt::Debug,
    P: Storage<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Values").field(&self.iter).finish()
    }
}
