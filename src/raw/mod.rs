mod alloc;
pub(crate) mod list;
pub(crate) mod utils;

use std::borrow::Borrow;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::{hint, ptr};

use self::alloc::{RawTable, Table};
use self::list::Node;
use self::utils::Counter;
use crate::hash::HashKey;
use crate::reclaim::{Collector, Guard};
use crate::storage::Storage;

use smallvec::SmallVec;

// A successful insert that leaves a chain longer than this samples the
// population estimate to decide whether to grow.
const OVERFULL_CHAIN: usize = 8;

// The number of buckets a writer migrates on top of its own when it finds a
// resize in progress.
const MIGRATION_CHUNK: usize = 64;

// A lock-free hash map: an array of bucket cells, each an atomic word
// holding the state of one immutable chain.
pub struct HashMap<K, V, S, P: Storage<K, V>> {
    // A pointer to the root table.
    table: AtomicPtr<RawTable>,

    // Collector for memory reclamation; owns every node and entry.
    collector: Collector,

    // A sharded estimate of the number of entries.
    count: Counter,

    // The hasher used to hash keys.
    pub hasher: S,

    _p: PhantomData<(K, V, P)>,
}

// Tag bits stored in the low bits of a bucket cell.
//
// A cell is a tagged union over four states:
// - null, untagged: the bucket is empty
// - non-null, untagged: the head of the bucket's chain
// - `LOCKED`: a thread is partitioning the chain into the successor table.
//   The head pointer is kept alongside the tag, so readers scan through a
//   locked bucket; only writers wait.
// - `FORWARDED`: the bucket's entries have moved to the successor table
mod cell {
    pub const LOCKED: usize = 0b01;
    pub const FORWARDED: usize = 0b10;

    // mask for the head pointer, ignoring tag bits
    pub const POINTER: usize = !(LOCKED | FORWARDED);
}

#[inline]
fn untagged<E>(head: *mut Node<E>) -> *mut Node<E> {
    head.map_addr(|addr| addr & cell::POINTER)
}

#[inline]
fn locked<E>(head: *mut Node<E>) -> *mut Node<E> {
    head.map_addr(|addr| addr | cell::LOCKED)
}

#[inline]
fn forwarded<E>() -> *mut Node<E> {
    cell::FORWARDED as *mut Node<E>
}

#[inline]
fn is_locked<E>(head: *mut Node<E>) -> bool {
    head.addr() & cell::LOCKED != 0
}

#[inline]
fn is_forwarded<E>(head: *mut Node<E>) -> bool {
    head.addr() & cell::FORWARDED != 0
}

#[inline]
fn bucket_index(hash: u64, len: usize) -> usize {
    hash as usize & (len - 1)
}

unsafe fn drop_table<E>(ptr: *mut u8) {
    // safety: retired table pointers come from `Table::alloc`
    unsafe { Table::<E>::dealloc(Table::from_raw(ptr.cast::<RawTable>())) }
}

impl<K, V, S, P: Storage<K, V>> HashMap<K, V, S, P> {
    pub fn new(capacity: usize, hasher: S, collector: Collector) -> HashMap<K, V, S, P> {
        let len = capacity.max(1).next_power_of_two();
        let table = Table::<P::Slot>::alloc(len);

        HashMap {
            table: AtomicPtr::new(table.raw),
            collector,
            count: Counter::default(),
            hasher,
            _p: PhantomData,
        }
    }

    #[inline]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    #[inline]
    pub fn guard(&self) -> Guard<'_> {
        self.collector.enter()
    }

    // The number of entries, summed across counter shards. Exact once all
    // operations have quiesced; a racing estimate otherwise.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.sum()
    }

    // Returns the root table.
    #[inline]
    fn root(&self, guard: &Guard<'_>) -> Table<P::Slot> {
        assert!(
            Collector::ptr_eq(guard.collector(), &self.collector),
            "attempted to access the map with a guard from a different collector"
        );

        let raw = guard.protect(&self.table, Ordering::Acquire);

        // safety: the root pointer always comes from `Table::alloc`, and the
        // guard keeps a retired root alive
        unsafe { Table::from_raw(raw) }
    }

    // Returns the successor of a table whose resize has started.
    #[inline]
    fn next_table(&self, table: Table<P::Slot>) -> Table<P::Slot> {
        let next = table.state().next.load(Ordering::Acquire);

        // a forwarded bucket is only ever written after the successor is
        // published
        debug_assert!(!next.is_null());
        unsafe { Table::from_raw(next) }
    }
}

impl<K, V, S, P> HashMap<K, V, S, P>
where
    K: Hash + Eq,
    S: HashKey,
    P: Storage<K, V>,
{
    // Returns the slot for `key`, if present.
    //
    // Linearizes at the acquire load of the cell whose chain is scanned.
    pub fn get<'g, Q>(&self, key: &Q, hash: u64, guard: &'g Guard<'_>) -> Option<&'g P::Slot>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut table = self.root(guard);

        loop {
            let cell = table.bucket(bucket_index(hash, table.len));
            let head = guard.protect(cell, Ordering::Acquire);

            if is_forwarded(head) {
                table = self.next_table(table);
                continue;
            }

            // a locked bucket keeps its head pointer, so readers fall
            // through to the chain while a migrator partitions it
            let search = unsafe { list::search::<K, V, P, Q>(untagged(head), key, hash) };

            if search.found.is_null() {
                return None;
            }

            // safety: the guard protects every node on the chain
            return Some(unsafe { &(*search.found).slot });
        }
    }

    // Inserts an entry if `key` is absent.
    //
    // Returns the current slot if the key is present; the map is not
    // modified in that case.
    pub fn insert<'g>(
        &self,
        key: K,
        value: V,
        hash: u64,
        guard: &'g Guard<'_>,
    ) -> Option<&'g P::Slot> {
        // the entry is built once and reused across retries
        let mut new_node: *mut Node<P::Slot> = ptr::null_mut();
        let mut entry = Some((key, value));

        let mut table = self.root(guard);

        loop {
            table = self.assist(table, hash, guard);

            let cell = table.bucket(bucket_index(hash, table.len));
            let head = guard.protect(cell, Ordering::Acquire);

            if is_forwarded(head) {
                table = self.next_table(table);
                continue;
            }

            if is_locked(head) {
                hint::spin_loop();
                continue;
            }

            let search = {
                let key = match entry {
                    Some((ref key, _)) => key,
                    // safety: we own the unpublished node
                    None => unsafe { P::key(&(*new_node).slot) },
                };

                // safety: the head was loaded under our guard
                unsafe { list::search::<K, V, P, K>(head, key, hash) }
            };

            if !search.found.is_null() {
                if !new_node.is_null() {
                    // safety: the node was never published
                    unsafe {
                        P::dealloc((*new_node).slot);
                        drop(Box::from_raw(new_node));
                    }
                }

                // safety: the guard protects the matching node
                return Some(unsafe { &(*search.found).slot });
            }

            if new_node.is_null() {
                let (key, value) = match entry.take() {
                    Some(entry) => entry,
                    None => unreachable!(),
                };

                new_node = list::alloc(P::make(key, value, hash), ptr::null_mut());
            }

            // safety: the node is still ours until the CAS below succeeds
            unsafe { (*new_node).next = head };

            match cell.compare_exchange(head, new_node, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.count
                        .get(guard.thread_id())
                        .fetch_add(1, Ordering::Relaxed);

                    if search.len + 1 > OVERFULL_CHAIN {
                        self.try_grow(table, guard);
                    }

                    return None;
                }

                // lost the race for this bucket, retry
                Err(_) => continue,
            }
        }
    }

    // Inserts or replaces the entry for `key` with `update(current)`.
    //
    // Returns the prior slot, if any. `update` may be called multiple times
    // if the bucket is concurrently modified, so it should be pure.
    pub fn upsert<'g, F>(
        &self,
        key: K,
        update: F,
        hash: u64,
        guard: &'g Guard<'_>,
    ) -> Option<&'g P::Slot>
    where
        K: Clone,
        F: Fn(Option<&V>) -> V,
    {
        let mut table = self.root(guard);

        loop {
            table = self.assist(table, hash, guard);

            let cell = table.bucket(bucket_index(hash, table.len));
            let head = guard.protect(cell, Ordering::Acquire);

            if is_forwarded(head) {
                table = self.next_table(table);
                continue;
            }

            if is_locked(head) {
                hint::spin_loop();
                continue;
            }

            // safety: the head was loaded under our guard
            let search = unsafe { list::search::<K, V, P, K>(head, &key, hash) };

            if search.found.is_null() {
                let slot = P::make(key.clone(), update(None), hash);
                let node = list::alloc(slot, head);

                match cell.compare_exchange(head, node, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        self.count
                            .get(guard.thread_id())
                            .fetch_add(1, Ordering::Relaxed);

                        if search.len + 1 > OVERFULL_CHAIN {
                            self.try_grow(table, guard);
                        }

                        return None;
                    }

                    Err(_) => {
                        // safety: the node and entry were never published
                        unsafe {
                            drop(Box::from_raw(node));
                            P::dealloc(slot);
                        }
                        continue;
                    }
                }
            }

            // safety: the guard protects the matching node
            let old = unsafe { &(*search.found).slot };
            let slot = P::make(key.clone(), update(Some(unsafe { P::value(old) })), hash);

            // safety: `search` found a node at this depth
            let new_head = unsafe { list::replace(head, search.depth, slot) };

            match cell.compare_exchange(head, new_head, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    // safety: the CAS unlinked the old prefix
                    unsafe { list::retire_prefix::<K, V, P>(head, search.depth, guard) };
                    return Some(old);
                }

                Err(_) => {
                    // safety: the rebuilt prefix and entry were never
                    // published
                    unsafe {
                        list::free_rebuilt(new_head, (*search.found).next);
                        P::dealloc(slot);
                    }
                    continue;
                }
            }
        }
    }

    // Removes the entry for `key`, returning its slot.
    //
    // The miss path does not allocate.
    pub fn remove<'g, Q>(&self, key: &Q, hash: u64, guard: &'g Guard<'_>) -> Option<&'g P::Slot>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut table = self.root(guard);

        loop {
            table = self.assist(table, hash, guard);

            let cell = table.bucket(bucket_index(hash, table.len));
            let head = guard.protect(cell, Ordering::Acquire);

            if is_forwarded(head) {
                table = self.next_table(table);
                continue;
            }

            if is_locked(head) {
                hint::spin_loop();
                continue;
            }

            // safety: the head was loaded under our guard
            let search = unsafe { list::search::<K, V, P, Q>(head, key, hash) };

            if search.found.is_null() {
                return None;
            }

            // safety: `search` found a node at this depth
            let new_head = unsafe { list::remove_at(head, search.depth) };

            match cell.compare_exchange(head, new_head, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    // safety: the CAS unlinked the old prefix
                    unsafe { list::retire_prefix::<K, V, P>(head, search.depth, guard) };

                    self.count
                        .get(guard.thread_id())
                        .fetch_sub(1, Ordering::Relaxed);

                    // safety: the guard protects the removed node
                    return Some(unsafe { &(*search.found).slot });
                }

                Err(_) => {
                    // safety: the rebuilt prefix was never published
                    unsafe { list::free_rebuilt(new_head, (*search.found).next) };
                    continue;
                }
            }
        }
    }

    // Removes every entry.
    //
    // Drives any in-progress resize to completion first, then empties the
    // root's buckets one at a time; each bucket is emptied atomically.
    pub fn clear(&self, guard: &Guard<'_>) {
        'restart: loop {
            let table = self.quiesce(guard);

            for i in 0..table.len {
                let cell = table.bucket(i);

                loop {
                    let head = guard.protect(cell, Ordering::Acquire);

                    if head.is_null() {
                        break;
                    }

                    // a new resize started underneath us; chase it
                    if is_forwarded(head) {
                        continue 'restart;
                    }

                    if is_locked(head) {
                        hint::spin_loop();
                        continue;
                    }

                    match cell.compare_exchange(
                        head,
                        ptr::null_mut(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            // safety: the CAS unlinked the chain
                            let removed = unsafe { list::retire_list::<K, V, P>(head, guard) };

                            self.count
                                .get(guard.thread_id())
                                .fetch_sub(removed as isize, Ordering::Relaxed);

                            break;
                        }

                        Err(_) => continue,
                    }
                }
            }

            return;
        }
    }

    // An iterator over the table.
    //
    // Drives any in-progress resize to completion first, so the walk starts
    // from a single table.
    pub fn iter<'g>(&self, guard: &'g Guard<'_>) -> Iter<'g, K, V, P> {
        let table = self.quiesce(guard);

        Iter {
            table,
            index: 0,
            node: ptr::null_mut(),
            pending: SmallVec::new(),
            guard,
            _kv: PhantomData,
        }
    }

    // Drives a writer's table forward: if a resize is in progress, migrate
    // the bucket this operation targets plus a chunk, and return the
    // successor to operate on.
    #[inline]
    fn assist(&self, table: Table<P::Slot>, hash: u64, guard: &Guard<'_>) -> Table<P::Slot> {
        let next = table.state().next.load(Ordering::Acquire);

        if next.is_null() {
            return table;
        }

        // safety: the successor pointer always comes from `Table::alloc`
        let next = unsafe { Table::from_raw(next) };

        self.migrate_bucket(table, bucket_index(hash, table.len), next, guard);
        self.help_copy(table, next, guard);

        next
    }

    // Moves one bucket to the successor table, cooperating with any other
    // thread working on the same bucket.
    fn migrate_bucket(
        &self,
        table: Table<P::Slot>,
        i: usize,
        next: Table<P::Slot>,
        guard: &Guard<'_>,
    ) {
        let cell = table.bucket(i);

        loop {
            let head = guard.protect(cell, Ordering::Acquire);

            if is_forwarded(head) {
                return;
            }

            if is_locked(head) {
                // another thread is partitioning this bucket; it finishes
                // in a bounded number of steps
                hint::spin_loop();
                continue;
            }

            if head.is_null() {
                match cell.compare_exchange(
                    head,
                    forwarded(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(_) => continue,
                }
            }

            // lock the bucket. writers now wait; readers keep scanning the
            // chain through the tagged pointer
            match cell.compare_exchange(head, locked(head), Ordering::AcqRel, Ordering::Acquire) {
                Err(_) => continue,

                Ok(_) => {
                    // split the chain by the hash bit the successor adds
                    let (lo, hi) = unsafe { self.partition(head, table.len) };

                    // the lock makes us the only writer of these two cells
                    next.bucket(i).store(lo, Ordering::Release);
                    next.bucket(i + table.len).store(hi, Ordering::Release);

                    // release: a reader that sees the forward also sees both
                    // halves
                    cell.store(forwarded(), Ordering::Release);

                    // safety: the chain is unreachable from this table, and
                    // its entries were re-linked through fresh nodes
                    unsafe { list::retire_nodes(head, guard) };
                    break;
                }
            }
        }

        // we performed this bucket's forward; track completion
        let state = table.state();
        let copied = state.copied.fetch_add(1, Ordering::AcqRel) + 1;

        if copied == table.len {
            self.promote(table, next, guard);
        }
    }

    // Rebuilds a chain into the two successor chains for buckets `i` and
    // `i + len`.
    unsafe fn partition(
        &self,
        head: *mut Node<P::Slot>,
        len: usize,
    ) -> (*mut Node<P::Slot>, *mut Node<P::Slot>) {
        let mut low = ptr::null_mut();
        let mut high = ptr::null_mut();

        let mut node = head;
        while !node.is_null() {
            // safety: the chain is locked and every entry on it is live
            unsafe {
                let slot = (*node).slot;
                let hash = self.hasher.hash_key(P::key(&slot));

                if hash as usize & len == 0 {
                    low = list::alloc(slot, low);
                } else {
                    high = list::alloc(slot, high);
                }

                node = (*node).next;
            }
        }

        (low, high)
    }

    // Claims and migrates a chunk of buckets.
    fn help_copy(&self, table: Table<P::Slot>, next: Table<P::Slot>, guard: &Guard<'_>) {
        let state = table.state();

        let start = state.claim.fetch_add(MIGRATION_CHUNK, Ordering::Relaxed);
        if start >= table.len {
            return;
        }

        for i in start..(start + MIGRATION_CHUNK).min(table.len) {
            self.migrate_bucket(table, i, next, guard);
        }
    }

    // Makes the fully-migrated table's successor the root.
    fn promote(&self, table: Table<P::Slot>, next: Table<P::Slot>, guard: &Guard<'_>) {
        if self
            .table
            .compare_exchange(table.raw, next.raw, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // the nodes were retired as their buckets migrated; the array
            // itself goes through the collector too
            unsafe { guard.retire(table.raw, drop_table::<P::Slot>) };
        }
    }

    // Starts a resize if the table is past its load factor.
    fn try_grow(&self, table: Table<P::Slot>, guard: &Guard<'_>) {
        let state = table.state();

        // one resize at a time, and only the root may start one: a second
        // wave of growth waits for promotion
        if !state.next.load(Ordering::Acquire).is_null() {
            return;
        }

        if self.table.load(Ordering::Acquire) != table.raw {
            return;
        }

        // the chain sample that got us here is cheap and noisy; the counter
        // decides
        if self.count.sum() < table.len {
            return;
        }

        let next = self.alloc_next(table);
        self.help_copy(table, next, guard);
    }

    // Returns the successor table, allocating it if it has not been created.
    fn alloc_next(&self, table: Table<P::Slot>) -> Table<P::Slot> {
        const SPIN_ALLOC: usize = 7;

        let state = table.state();
        let next = state.next.load(Ordering::Acquire);

        if !next.is_null() {
            // safety: the successor pointer always comes from `Table::alloc`
            return unsafe { Table::from_raw(next) };
        }

        // otherwise try to acquire the allocation lock
        let _allocating = match state.allocating.try_lock() {
            Ok(lock) => lock,

            // someone else is allocating; spin for a bit waiting for the
            // table before blocking on the lock
            Err(_) => {
                let mut spun = 0;

                while spun <= SPIN_ALLOC {
                    for _ in 0..(spun * spun) {
                        hint::spin_loop();
                    }

                    let next = state.next.load(Ordering::Acquire);
                    if !next.is_null() {
                        // safety: as above
                        return unsafe { Table::from_raw(next) };
                    }

                    spun += 1;
                }

                state.allocating.lock().unwrap()
            }
        };

        // was the table allocated while we acquired the lock?
        let next = state.next.load(Ordering::Acquire);
        if !next.is_null() {
            // safety: as above
            return unsafe { Table::from_raw(next) };
        }

        let next_len = table.len << 1;
        if next_len > isize::MAX as usize {
            panic!("hash table exceeded maximum capacity");
        }

        let next = Table::<P::Slot>::alloc(next_len);

        state.next.store(next.raw, Ordering::Release);
        drop(_allocating);

        next
    }

    // Completes any in-progress resize and returns the quiesced root.
    fn quiesce(&self, guard: &Guard<'_>) -> Table<P::Slot> {
        loop {
            let table = self.root(guard);
            let next = table.state().next.load(Ordering::Acquire);

            if next.is_null() {
                return table;
            }

            // safety: the successor pointer always comes from `Table::alloc`
            let next = unsafe { Table::from_raw(next) };

            for i in 0..table.len {
                self.migrate_bucket(table, i, next, guard);
            }

            // every bucket is forwarded; promote directly rather than
            // waiting on the completion counter's owner
            self.promote(table, next, guard);
        }
    }
}

impl<K, V, S, P: Storage<K, V>> Drop for HashMap<K, V, S, P> {
    fn drop(&mut self) {
        let mut raw = *self.table.get_mut();

        // walk the root and, if a resize was in flight, its successor;
        // every live node appears exactly once across the two
        while !raw.is_null() {
            // safety: we have &mut self, and table pointers come from
            // `Table::alloc`
            let table = unsafe { Table::<P::Slot>::from_raw(raw) };

            for i in 0..table.len {
                let head = table.bucket(i).load(Ordering::Relaxed);

                // migrated to the successor
                if is_forwarded(head) {
                    continue;
                }

                // no operation is in flight anymore
                debug_assert!(!is_locked(head));

                let mut node = head;
                while !node.is_null() {
                    // safety: we have exclusive access to every node and
                    // entry still linked into the table
                    unsafe {
                        let boxed = Box::from_raw(node);
                        P::dealloc(boxed.slot);
                        node = boxed.next;
                    }
                }
            }

            raw = table.state().next.load(Ordering::Relaxed);

            // safety: no references to this table remain
            unsafe { Table::dealloc(table) };
        }
    }
}

// An iterator over a quiesced table's entries.
//
// If a resize starts mid-walk, forwarded buckets are chased into the
// successor, so each bucket still yields a legal snapshot of its chain and
// every key is visited at most once.
pub struct Iter<'g, K, V, P: Storage<K, V>> {
    table: Table<P::Slot>,
    index: usize,
    node: *mut Node<P::Slot>,
    pending: SmallVec<[(Table<P::Slot>, usize); 4]>,
    guard: &'g Guard<'g>,
    _kv: PhantomData<(K, V)>,
}

impl<'g, K, V, P: Storage<K, V>> Iterator for Iter<'g, K, V, P>
where
    P::Slot: 'g,
{
    type Item = &'g P::Slot;

    fn next(&mut self) -> Option<&'g P::Slot> {
        loop {
            if !self.node.is_null() {
                // safety: the guard protects every node we walk
                let slot = unsafe { &(*self.node).slot };
                self.node = unsafe { (*self.node).next };
                return Some(slot);
            }

            if self.index < self.table.len {
                let i = self.index;
                self.index += 1;

                let table = self.table;
                self.resolve(table, i);
                continue;
            }

            match self.pending.pop() {
                Some((table, i)) => self.resolve(table, i),
                None => return None,
            }
        }
    }
}

impl<'g, K, V, P: Storage<K, V>> Iter<'g, K, V, P> {
    // Positions the cursor on bucket `i`, chasing a forward into the
    // successor's two buckets.
    fn resolve(&mut self, table: Table<P::Slot>, i: usize) {
        let head = self.guard.protect(table.bucket(i), Ordering::Acquire);

        if is_forwarded(head) {
            let next = table.state().next.load(Ordering::Acquire);
            debug_assert!(!next.is_null());

            // safety: the successor pointer always comes from `Table::alloc`
            let next = unsafe { Table::<P::Slot>::from_raw(next) };

            self.pending.push((next, i));
            self.pending.push((next, i + table.len));
            return;
        }

        // locked buckets fall through, like any read
        self.node = untagged(head);
    }
}

impl<'g, K, V, P: Storage<K, V>> Clone for Iter<'g, K, V, P> {
    fn clone(&self) -> Iter<'g, K, V, P> {
        Iter {
            table: self.table,
            index: self.index,
            node: self.node,
            pending: self.pending.clone(),
            guard: self.guard,
            _kv: PhantomData,
        }
    }
}
