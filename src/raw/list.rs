use crate::reclaim::{self, Guard};
use crate::storage::Storage;

use smallvec::SmallVec;
use std::borrow::Borrow;
use std::ptr;

// A node in an immutable bucket list.
//
// Nodes are shared between successive versions of a bucket: a mutation
// rebuilds the prefix up to the node it changes and reuses the suffix
// unchanged. Neither field is written again after the node is published,
// which is what makes scanning a list safe while it is concurrently
// replaced.
pub struct Node<E> {
    pub slot: E,
    pub next: *mut Node<E>,
}

// Allocates a list node.
pub fn alloc<E>(slot: E, next: *mut Node<E>) -> *mut Node<E> {
    Box::into_raw(Box::new(Node { slot, next }))
}

// The result of scanning a list for a key.
pub struct Search<E> {
    // The matching node, or null.
    pub found: *mut Node<E>,
    // The position of the match, counted from the head.
    pub depth: usize,
    // The number of nodes traversed; the list length if there was no match.
    pub len: usize,
}

// Scans the list for `key`.
//
// # Safety
//
// `head` must be a protected list head (or a node reachable from one), and
// every entry on the list must be live.
pub unsafe fn search<K, V, P, Q>(head: *mut Node<P::Slot>, key: &Q, hash: u64) -> Search<P::Slot>
where
    P: Storage<K, V>,
    K: Borrow<Q>,
    Q: Eq + ?Sized,
{
    let mut node = head;
    let mut depth = 0;

    while !node.is_null() {
        // safety: nodes on a protected list stay valid for the guard's
        // lifetime, even if they are concurrently unlinked
        if unsafe { P::matches(&(*node).slot, key, hash) } {
            return Search {
                found: node,
                depth,
                len: depth + 1,
            };
        }

        node = unsafe { (*node).next };
        depth += 1;
    }

    Search {
        found: ptr::null_mut(),
        depth: 0,
        len: depth,
    }
}

// Builds a new list in which the node at `depth` carries `slot` instead of
// its old entry. The prefix is copied; everything after the replaced node is
// shared with the old list.
//
// # Safety
//
// `head` must be a protected list head with more than `depth` nodes.
pub unsafe fn replace<E: Copy>(head: *mut Node<E>, depth: usize, slot: E) -> *mut Node<E> {
    let (prefix, target) = unsafe { split_at(head, depth) };

    let mut new_head = alloc(slot, unsafe { (*target).next });
    for slot in prefix.into_iter().rev() {
        new_head = alloc(slot, new_head);
    }

    new_head
}

// Builds a new list with the node at `depth` omitted. The prefix is copied;
// everything after the removed node is shared with the old list.
//
// # Safety
//
// `head` must be a protected list head with more than `depth` nodes.
pub unsafe fn remove_at<E: Copy>(head: *mut Node<E>, depth: usize) -> *mut Node<E> {
    let (prefix, target) = unsafe { split_at(head, depth) };

    let mut new_head = unsafe { (*target).next };
    for slot in prefix.into_iter().rev() {
        new_head = alloc(slot, new_head);
    }

    new_head
}

// Collects the slots of the first `depth` nodes and returns the node at
// `depth`.
unsafe fn split_at<E: Copy>(head: *mut Node<E>, depth: usize) -> (SmallVec<[E; 8]>, *mut Node<E>) {
    let mut prefix = SmallVec::new();
    let mut node = head;

    for _ in 0..depth {
        unsafe {
            prefix.push((*node).slot);
            node = (*node).next;
        }
    }

    (prefix, node)
}

// Retires the nodes a successful mutation superseded: the old head up to and
// including the node at `depth`, along with that node's entry.
//
// # Safety
//
// The old list head must have been atomically replaced, and this must be
// called exactly once for it.
pub unsafe fn retire_prefix<K, V, P>(head: *mut Node<P::Slot>, depth: usize, guard: &Guard<'_>)
where
    P: Storage<K, V>,
{
    let mut node = head;

    for i in 0..=depth {
        unsafe {
            let next = (*node).next;

            if i == depth {
                // the replaced or removed entry itself
                P::retire((*node).slot, guard);
            }

            guard.retire(node, reclaim::boxed::<Node<P::Slot>>);
            node = next;
        }
    }
}

// Retires every node of an unlinked list, leaving the entries alone. Used
// when a bucket migrates: the entries move to the successor table in fresh
// nodes.
//
// # Safety
//
// The list must have been atomically unlinked, and this must be called
// exactly once for it.
pub unsafe fn retire_nodes<E>(head: *mut Node<E>, guard: &Guard<'_>) {
    let mut node = head;

    while !node.is_null() {
        unsafe {
            let next = (*node).next;
            guard.retire(node, reclaim::boxed::<Node<E>>);
            node = next;
        }
    }
}

// Retires every node of an unlinked list together with its entries,
// returning the number of entries retired. Used when a bucket is cleared.
//
// # Safety
//
// The list must have been atomically unlinked, and this must be called
// exactly once for it.
pub unsafe fn retire_list<K, V, P>(head: *mut Node<P::Slot>, guard: &Guard<'_>) -> usize
where
    P: Storage<K, V>,
{
    let mut node = head;
    let mut len = 0;

    while !node.is_null() {
        unsafe {
            let next = (*node).next;
            P::retire((*node).slot, guard);
            guard.retire(node, reclaim::boxed::<Node<P::Slot>>);
            node = next;
        }

        len += 1;
    }

    len
}

// Frees the nodes of a rebuilt list that lost its CAS and was never
// published, stopping at the shared suffix. Entry storage is not touched;
// the caller owns any entry it created for the attempt.
//
// # Safety
//
// No other thread can have observed these nodes.
pub unsafe fn free_rebuilt<E>(head: *mut Node<E>, suffix: *mut Node<E>) {
    let mut node = head;

    while node != suffix {
        unsafe {
            let next = (*node).next;
            drop(Box::from_raw(node));
            node = next;
        }
    }
}
