use crate::hash::HashKey;
use crate::map::{HashMap, HashMapBuilder, Keys};
use crate::reclaim::{Collector, Guard};
use crate::storage::{Boxed, Storage};

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::Hash;

/// A concurrent hash set.
///
/// A set is a [`HashMap`] that stores its elements as keys, so the same
/// guard discipline and storage policies apply. See the
/// [crate-level documentation](crate) for details.
pub struct HashSet<K, S = RandomState, P: Storage<K, ()> = Boxed> {
    map: HashMap<K, (), S, P>,
}

/// A builder for a [`HashSet`].
///
/// # Examples
///
/// ```rust
/// use loquat::{Collector, HashSet};
/// use std::collections::hash_map::RandomState;
///
/// let set: HashSet<i32> = HashSet::builder()
///     // Set the initial capacity.
///     .capacity(2048)
///     // Set the hasher.
///     .hasher(RandomState::new())
///     // Share a collector with other maps or sets.
///     .collector(Collector::new())
///     // Construct the hash set.
///     .build();
/// ```
pub struct HashSetBuilder<K, S = RandomState, P = Boxed> {
    inner: HashMapBuilder<K, (), S, P>,
}

impl<K> HashSetBuilder<K> {
    /// Set the hasher used to hash elements.
    pub fn hasher<S>(self, hasher: S) -> HashSetBuilder<K, S> {
        HashSetBuilder {
            inner: self.inner.hasher(hasher),
        }
    }
}

impl<K, S, P> HashSetBuilder<K, S, P> {
    /// Set the initial capacity of the set.
    ///
    /// The table grows automatically; the capacity only sizes the initial
    /// bucket array. A capacity of zero is treated as one.
    pub fn capacity(self, capacity: usize) -> HashSetBuilder<K, S, P> {
        HashSetBuilder {
            inner: self.inner.capacity(capacity),
        }
    }

    /// Set the element storage policy. See [`Boxed`] and
    /// [`Inline`](crate::Inline) for the options.
    pub fn storage<P2>(self) -> HashSetBuilder<K, S, P2> {
        HashSetBuilder {
            inner: self.inner.storage::<P2>(),
        }
    }

    /// Set the [`Collector`] used for memory reclamation.
    ///
    /// See [`HashMapBuilder::collector`](crate::HashMapBuilder::collector)
    /// for details.
    pub fn collector(self, collector: Collector) -> Self {
        HashSetBuilder {
            inner: self.inner.collector(collector),
        }
    }

    /// Construct a [`HashSet`] from the builder, using the configured
    /// options.
    pub fn build(self) -> HashSet<K, S, P>
    where
        P: Storage<K, ()>,
    {
        HashSet {
            map: self.inner.build(),
        }
    }
}

impl<K, S, P> fmt::Debug for HashSetBuilder<K, S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashSetBuilder").finish_non_exhaustive()
    }
}

impl<K> HashSet<K> {
    /// Creates an empty `HashSet`.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashSet;
    /// let set: HashSet<i32> = HashSet::new();
    /// ```
    pub fn new() -> HashSet<K> {
        HashSet {
            map: HashMap::new(),
        }
    }

    /// Creates an empty `HashSet` with the specified capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashSet;
    /// let set: HashSet<i32> = HashSet::with_capacity(10);
    /// ```
    pub fn with_capacity(capacity: usize) -> HashSet<K> {
        HashSet {
            map: HashMap::with_capacity(capacity),
        }
    }

    /// Returns a builder for a `HashSet`.
    pub fn builder() -> HashSetBuilder<K> {
        HashSetBuilder {
            inner: HashMap::builder(),
        }
    }
}

impl<K, S, P> Default for HashSet<K, S, P>
where
    S: Default,
    P: Storage<K, ()>,
{
    fn default() -> Self {
        HashSet {
            map: HashMap::default(),
        }
    }
}

impl<K, S, P: Storage<K, ()>> HashSet<K, S, P> {
    /// Creates an empty `HashSet` which will use the given hasher.
    pub fn with_hasher(hasher: S) -> HashSet<K, S, P> {
        HashSet {
            map: HashMap::with_hasher(hasher),
        }
    }

    /// Creates an empty `HashSet` with at least the specified capacity,
    /// using `hasher` to hash the elements.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> HashSet<K, S, P> {
        HashSet {
            map: HashMap::with_capacity_and_hasher(capacity, hasher),
        }
    }

    /// Returns a pinned reference to the set.
    ///
    /// The returned reference manages a guard internally, preventing
    /// reclamation for as long as it is held.
    #[inline]
    pub fn pin(&self) -> HashSetRef<'_, K, S, P> {
        HashSetRef {
            guard: self.guard(),
            set: self,
        }
    }

    /// Returns a guard for use with this set.
    ///
    /// Note that holding on to a guard pins the current epoch and prevents
    /// all reclamation.
    #[inline]
    pub fn guard(&self) -> Guard<'_> {
        self.map.guard()
    }

    /// Returns the collector this set allocates through.
    #[inline]
    pub fn collector(&self) -> &Collector {
        self.map.collector()
    }
}

impl<K, S, P> HashSet<K, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, ()>,
{
    /// Returns the number of elements in the set.
    ///
    /// See [`HashMap::len`] for the consistency caveats.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashSet;
    ///
    /// let set = HashSet::new();
    ///
    /// set.pin().insert(1);
    /// set.pin().insert(2);
    /// assert!(set.len() == 2);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the set is empty. Otherwise returns `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the set contains the specified element.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashSet;
    ///
    /// let set = HashSet::new();
    /// set.pin().insert(1);
    /// assert_eq!(set.pin().contains(&1), true);
    /// assert_eq!(set.pin().contains(&2), false);
    /// ```
    #[inline]
    pub fn contains<Q>(&self, key: &Q, guard: &Guard<'_>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key, guard)
    }

    /// Returns a reference to the element in the set, if any, equal to the
    /// given key.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashSet;
    ///
    /// let set = HashSet::new();
    /// set.pin().insert(1);
    /// assert_eq!(set.pin().get(&1), Some(&1));
    /// assert_eq!(set.pin().get(&2), None);
    /// ```
    #[inline]
    pub fn get<'g, Q>(&self, key: &Q, guard: &'g Guard<'_>) -> Option<&'g K>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        P::Slot: 'g,
    {
        match self.map.get_key_value(key, guard) {
            Some((key, _)) => Some(key),
            None => None,
        }
    }

    /// Adds an element to the set.
    ///
    /// If the set did not have this element, `true` is returned. If it did,
    /// `false` is returned and the stored element is not replaced. This
    /// matters for types that can be `==` without being identical.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashSet;
    ///
    /// let set = HashSet::new();
    /// assert_eq!(set.pin().insert(37), true);
    /// assert_eq!(set.pin().insert(37), false);
    /// ```
    #[inline]
    pub fn insert(&self, key: K, guard: &Guard<'_>) -> bool {
        self.map.insert_if_absent(key, (), guard)
    }

    /// Removes an element from the set. Returns whether the element was
    /// present.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashSet;
    ///
    /// let set = HashSet::new();
    /// set.pin().insert(1);
    /// assert_eq!(set.pin().remove(&1), true);
    /// assert_eq!(set.pin().remove(&1), false);
    /// ```
    #[inline]
    pub fn remove<Q>(&self, key: &Q, guard: &Guard<'_>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key, guard).is_some()
    }

    /// Removes an element from the set, returning it if it was present.
    #[inline]
    pub fn take<'g, Q>(&self, key: &Q, guard: &'g Guard<'_>) -> Option<&'g K>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        P::Slot: 'g,
    {
        match self.map.remove_entry(key, guard) {
            Some((key, _)) => Some(key),
            None => None,
        }
    }

    /// Clears the set, removing all elements.
    ///
    /// See [`HashMap::clear`] for details.
    #[inline]
    pub fn clear(&self, guard: &Guard<'_>) {
        self.map.clear(guard)
    }

    /// An iterator visiting all elements in arbitrary order.
    /// The iterator element type is `&K`.
    ///
    /// See [`HashMap::iter`] for the snapshot semantics.
    ///
    /// # Examples
    ///
    /// ```
    /// use loquat::HashSet;
    ///
    /// let set = HashSet::from([1, 2, 3]);
    ///
    /// let guard = set.guard();
    /// for element in set.iter(&guard) {
    ///     println!("{element}");
    /// }
    /// ```
    #[inline]
    pub fn iter<'g>(&self, guard: &'g Guard<'_>) -> Iter<'g, K, P> {
        Iter {
            keys: self.map.keys(guard),
        }
    }
}

impl<K, S, P> PartialEq for HashSet<K, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, ()>,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }

        let (guard1, guard2) = (&self.guard(), &other.guard());

        let mut iter = self.iter(guard1);
        iter.all(|key| other.contains(key, guard2))
    }
}

impl<K, S, P> Eq for HashSet<K, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, ()>,
{
}

impl<K, S, P> fmt::Debug for HashSet<K, S, P>
where
    K: Hash + Eq + fmt::Debug,
    S: HashKey,
    P: Storage<K, ()>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.guard();
        f.debug_set().entries(self.iter(&guard)).finish()
    }
}

impl<K, S, P> Extend<K> for &HashSet<K, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, ()>,
{
    fn extend<T: IntoIterator<Item = K>>(&mut self, iter: T) {
        let guard = self.guard();

        for key in iter {
            self.insert(key, &guard);
        }
    }
}

impl<'a, K, S, P> Extend<&'a K> for &HashSet<K, S, P>
where
    K: Copy + Hash + Eq,
    S: HashKey,
    P: Storage<K, ()>,
{
    fn extend<T: IntoIterator<Item = &'a K>>(&mut self, iter: T) {
        self.extend(iter.into_iter().copied());
    }
}

impl<K, const N: usize> From<[K; N]> for HashSet<K, RandomState>
where
    K: Hash + Eq,
{
    fn from(arr: [K; N]) -> Self {
        HashSet::from_iter(arr)
    }
}

impl<K, S, P> FromIterator<K> for HashSet<K, S, P>
where
    K: Hash + Eq,
    S: HashKey + Default,
    P: Storage<K, ()>,
{
    fn from_iter<T: IntoIterator<Item = K>>(iter: T) -> Self {
        let mut iter = iter.into_iter();

        match iter.next() {
            None => Self::default(),
            Some(key) => {
                let (lower, _) = iter.size_hint();
                let set: HashSet<K, S, P> = HashSet::with_capacity_and_hasher(
                    lower.saturating_add(1),
                    S::default(),
                );

                {
                    let guard = set.guard();
                    set.insert(key, &guard);
                    for key in iter {
                        set.insert(key, &guard);
                    }
                }

                set
            }
        }
    }
}

impl<K, S, P> Clone for HashSet<K, S, P>
where
    K: Hash + Eq + Clone,
    S: HashKey + Clone,
    P: Storage<K, ()>,
{
    fn clone(&self) -> HashSet<K, S, P> {
        let other: HashSet<K, S, P> =
            HashSet::with_capacity_and_hasher(self.len(), self.map.hasher().clone());

        {
            let (guard1, guard2) = (&self.guard(), &other.guard());
            for key in self.iter(guard1) {
                other.insert(key.clone(), guard2);
            }
        }

        other
    }
}

/// A pinned reference to a [`HashSet`].
///
/// This type is created with [`HashSet::pin`] and can be used to access a
/// [`HashSet`] without explicitly managing a guard.
pub struct HashSetRef<'set, K, S, P: Storage<K, ()>> {
    guard: Guard<'set>,
    set: &'set HashSet<K, S, P>,
}

impl<'set, K, S, P> HashSetRef<'set, K, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, ()>,
{
    /// Returns a reference to the inner [`HashSet`].
    #[inline]
    pub fn set(&self) -> &'set HashSet<K, S, P> {
        self.set
    }

    /// Returns the number of elements in the set.
    ///
    /// See [`HashSet::len`] for details.
    #[inline]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Returns `true` if the set is empty. Otherwise returns `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the set contains the specified element.
    ///
    /// See [`HashSet::contains`] for details.
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.set.contains(key, &self.guard)
    }

    /// Returns a reference to the element in the set, if any, equal to the
    /// given key.
    ///
    /// See [`HashSet::get`] for details.
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<&K>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.set.get(key, &self.guard)
    }

    /// Adds an element to the set, returning whether it was newly inserted.
    ///
    /// See [`HashSet::insert`] for details.
    #[inline]
    pub fn insert(&self, key: K) -> bool {
        self.set.insert(key, &self.guard)
    }

    /// Removes an element from the set. Returns whether the element was
    /// present.
    ///
    /// See [`HashSet::remove`] for details.
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.set.remove(key, &self.guard)
    }

    /// Removes an element from the set, returning it if it was present.
    ///
    /// See [`HashSet::take`] for details.
    #[inline]
    pub fn take<Q>(&self, key: &Q) -> Option<&K>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.set.take(key, &self.guard)
    }

    /// Clears the set, removing all elements.
    ///
    /// See [`HashSet::clear`] for details.
    #[inline]
    pub fn clear(&self) {
        self.set.clear(&self.guard)
    }

    /// An iterator visiting all elements in arbitrary order.
    ///
    /// See [`HashSet::iter`] for details.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, P> {
        self.set.iter(&self.guard)
    }
}

impl<K, S, P> fmt::Debug for HashSetRef<'_, K, S, P>
where
    K: Hash + Eq + fmt::Debug,
    S: HashKey,
    P: Storage<K, ()>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a, K, S, P> IntoIterator for &'a HashSetRef<'_, K, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, ()>,
{
    type Item = &'a K;
    type IntoIter = Iter<'a, K, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over a set's elements.
///
/// This struct is created by the [`iter`](HashSet::iter) method on
/// [`HashSet`]. See its documentation for details.
pub struct Iter<'g, K, P: Storage<K, ()>> {
    keys: Keys<'g, K, (), P>,
}

impl<'g, K: 'g, P: Storage<K, ()>> Iterator for Iter<'g, K, P>
where
    P::Slot: 'g,
{
    type Item = &'g K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.keys.next()
    }
}

impl<K, P> fmt::Debug for Iter<'_, K, P>
where
    K: fmt::Debug,
    P: Storage<K, ()>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Iter").field(&self.keys).finish()
    }
}
