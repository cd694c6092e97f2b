#![allow(unstable_name_collisions)]

//! A growable, lock-free concurrent hash map and set.
//!
//! Designed for high thread counts, high contention, and skewed key
//! distributions: point operations never take a lock, buckets are immutable
//! chains published with a single compare-and-swap, and the table resizes
//! online while readers and writers keep running.
//!
//! # Usage
//!
//! Operations return references to values inside the map, so they take a
//! [`Guard`] that keeps those references alive:
//!
//! ```
//! use loquat::HashMap;
//!
//! let map = HashMap::new();
//!
//! let guard = map.guard();
//! map.insert('a', 1, &guard);
//! assert_eq!(map.get(&'a', &guard), Some(&1));
//! ```
//!
//! The [`pin`](HashMap::pin) API manages the guard for you:
//!
//! ```
//! use loquat::HashMap;
//!
//! let map = HashMap::new();
//!
//! let m = map.pin();
//! m.insert('a', 1);
//! assert_eq!(m.get(&'a'), Some(&1));
//! ```
//!
//! Guards are cheap, but holding one pins the current reclamation epoch:
//! memory freed by other threads accumulates until the guard is dropped, so
//! avoid keeping guards across long pauses.
//!
//! # Semantics
//!
//! [`insert`](HashMap::insert) does *not* overwrite: if the key is present
//! the map is unmodified and the current value is returned. Use
//! [`upsert`](HashMap::upsert) to write unconditionally; it receives the
//! current value and always takes effect:
//!
//! ```
//! use loquat::HashMap;
//!
//! let map = HashMap::new();
//! let m = map.pin();
//!
//! m.upsert("hits", |n| n.map(|n| n + 1).unwrap_or(1));
//! m.upsert("hits", |n| n.map(|n| n + 1).unwrap_or(1));
//! assert_eq!(m.get(&"hits"), Some(&2));
//! ```
//!
//! Operations on a single key are totally ordered and a lookup observes the
//! latest committed value for its bucket. Aggregates are weaker by design:
//! [`len`](HashMap::len) is exact only once writers quiesce, and iteration
//! sees each bucket as an atomic snapshot without freezing the whole map.
//!
//! # Storage policies
//!
//! Entries are heap-allocated and fingerprinted by default ([`Boxed`]),
//! which gives stable addresses for any key and value type. Small `Copy`
//! entries can be stored directly in the nodes instead with [`Inline`],
//! trading entry moves during resizing for one less pointer chase:
//!
//! ```
//! use loquat::{HashMap, Inline, InlineHashMap};
//!
//! let map: InlineHashMap<u64, u64> = HashMap::builder().storage::<Inline>().build();
//! map.pin().insert(1, 2);
//! ```

mod hash;
mod map;
mod raw;
mod reclaim;
mod set;
mod storage;

#[cfg(feature = "serde")]
mod serde_impls;

pub use hash::{Avalanching, HashKey};
pub use map::{HashMap, HashMapBuilder, HashMapRef, InlineHashMap, Iter, Keys, Values};
pub use reclaim::{Collector, Guard};
pub use set::{HashSet, HashSetBuilder, HashSetRef};
pub use storage::{Boxed, Inline, Storage};
