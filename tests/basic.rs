// adapted from: https://github.com/jonhoo/flurry/blob/main/tests/basic.rs

mod common;
use common::with_map;

use loquat::{HashMap, Inline};

use std::hash::{BuildHasherDefault, Hasher};
use std::sync::Arc;

#[test]
fn new() {
    with_map::<usize, usize>(|map| drop(map()));
}

#[test]
fn clear() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        for i in 0..5 {
            map.insert(i, 1, &guard);
        }
        map.clear(&guard);
        assert!(map.is_empty());
        for i in 0..5 {
            assert!(map.get(&i, &guard).is_none());
        }
    });
}

#[test]
fn insert() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        let old = map.insert(42, 0, &guard);
        assert!(old.is_none());
    });
}

#[test]
fn get_empty() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        let e = map.get(&42, &guard);
        assert!(e.is_none());
    });
}

#[test]
fn get_key_value_empty() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        let e = map.get_key_value(&42, &guard);
        assert!(e.is_none());
    });
}

#[test]
fn remove_empty() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        let old = map.remove(&42, &guard);
        assert!(old.is_none());
    });
}

#[test]
fn insert_and_remove() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        map.insert(42, 0, &guard);
        let old = map.remove(&42, &guard).unwrap();
        assert_eq!(old, &0);
        assert!(map.get(&42, &guard).is_none());
    });
}

#[test]
fn insert_and_get() {
    with_map::<usize, usize>(|map| {
        let map = map();
        map.insert(42, 0, &map.guard());

        {
            let guard = map.guard();
            let e = map.get(&42, &guard).unwrap();
            assert_eq!(e, &0);
        }
    });
}

#[test]
fn insert_and_get_key_value() {
    with_map::<usize, usize>(|map| {
        let map = map();
        map.insert(42, 0, &map.guard());

        {
            let guard = map.guard();
            let e = map.get_key_value(&42, &guard).unwrap();
            assert_eq!(e, (&42, &0));
        }
    });
}

// an insert on a present key must leave the map untouched
#[test]
fn reinsert_does_not_overwrite() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        assert_eq!(map.insert(42, 0, &guard), None);
        assert_eq!(map.insert(42, 1, &guard), Some(&0));

        {
            let guard = map.guard();
            let e = map.get(&42, &guard).unwrap();
            assert_eq!(e, &0);
        }
    });
}

#[test]
fn insert_if_absent() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        assert!(map.insert_if_absent(1, 10, &guard));
        assert!(!map.insert_if_absent(1, 20, &guard));
        assert_eq!(map.get(&1, &guard), Some(&10));
    });
}

// the round trip from the map's contract: insert, collide, read, remove
#[test]
fn insert_remove_round_trip() {
    with_map::<usize, char>(|map| {
        let map = map();
        let guard = map.guard();

        assert_eq!(map.insert(7, 'a', &guard), None);
        assert_eq!(map.insert(7, 'b', &guard), Some(&'a'));
        assert_eq!(map.get(&7, &guard), Some(&'a'));
        assert_eq!(map.remove(&7, &guard), Some(&'a'));
        assert_eq!(map.get(&7, &guard), None);
        assert_eq!(map.len(), 0);
    });
}

#[test]
fn upsert() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        map.insert(42, 0, &guard);

        let old = map.upsert(42, |v| v.unwrap() + 1, &guard);
        assert_eq!(old, Some(&0));

        {
            let guard = map.guard();
            let e = map.get(&42, &guard).unwrap();
            assert_eq!(e, &1);
        }
    });
}

#[test]
fn upsert_empty() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        let old = map.upsert(42, |v| v.map(|v| v + 1).unwrap_or(0), &guard);
        assert!(old.is_none());

        {
            let guard = map.guard();
            assert_eq!(map.get(&42, &guard), Some(&0));
        }
    });
}

#[test]
fn upsert_counter() {
    const N: usize = 1000;

    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        for _ in 0..N {
            map.upsert(42, |v| v.map(|v| v + 1).unwrap_or(1), &guard);
        }

        assert_eq!(map.get(&42, &guard), Some(&N));
    });
}

#[test]
fn remove_entry() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        map.insert(1, 10, &guard);
        assert_eq!(map.remove_entry(&1, &guard), Some((&1, &10)));
        assert_eq!(map.remove_entry(&1, &guard), None);
    });
}

#[test]
fn count_and_contains() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        map.insert(1, 10, &guard);
        assert_eq!(map.count(&1, &guard), 1);
        assert_eq!(map.count(&2, &guard), 0);
        assert!(map.contains_key(&1, &guard));
        assert!(!map.contains_key(&2, &guard));
    });
}

#[test]
fn concurrent_insert() {
    with_map::<usize, usize>(|map| {
        let map = Arc::new(map());

        let map1 = map.clone();
        let t1 = std::thread::spawn(move || {
            for i in 0..64 {
                map1.insert(i, 0, &map1.guard());
            }
        });
        let map2 = map.clone();
        let t2 = std::thread::spawn(move || {
            for i in 0..64 {
                map2.insert(i, 1, &map2.guard());
            }
        });

        t1.join().unwrap();
        t2.join().unwrap();

        let guard = map.guard();
        for i in 0..64 {
            let v = map.get(&i, &guard).unwrap();
            assert!(v == &0 || v == &1);

            let kv = map.get_key_value(&i, &guard).unwrap();
            assert!(kv == (&i, &0) || kv == (&i, &1));
        }
    });
}

// two racing inserts of the same key: exactly one wins, and the loser
// observes the winner's value
#[test]
fn concurrent_insert_one_winner() {
    with_map::<usize, usize>(|map| {
        for _ in 0..64 {
            let map = Arc::new(map());

            let threads: Vec<_> = (0..2)
                .map(|t| {
                    let map = map.clone();
                    std::thread::spawn(move || map.insert(0, t, &map.guard()).is_none())
                })
                .collect();

            let winners: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

            assert_eq!(winners.iter().filter(|&&won| won).count(), 1);

            let guard = map.guard();
            let winner = if winners[0] { 0 } else { 1 };
            assert_eq!(map.get(&0, &guard), Some(&winner));
        }
    });
}

#[test]
fn concurrent_remove() {
    with_map::<usize, usize>(|map| {
        let map = Arc::new(map());

        {
            let guard = map.guard();
            for i in 0..64 {
                map.insert(i, i, &guard);
            }
        }

        let map1 = map.clone();
        let t1 = std::thread::spawn(move || {
            let guard = map1.guard();
            for i in 0..64 {
                if let Some(v) = map1.remove(&i, &guard) {
                    assert_eq!(v, &i);
                }
            }
        });
        let map2 = map.clone();
        let t2 = std::thread::spawn(move || {
            let guard = map2.guard();
            for i in 0..64 {
                if let Some(v) = map2.remove(&i, &guard) {
                    assert_eq!(v, &i);
                }
            }
        });

        t1.join().unwrap();
        t2.join().unwrap();

        // after joining the threads, the map should be empty
        let guard = map.guard();
        for i in 0..64 {
            assert!(map.get(&i, &guard).is_none());
        }
    });
}

#[test]
fn concurrent_upsert() {
    with_map::<usize, usize>(|map| {
        let map = Arc::new(map());

        {
            let guard = map.guard();
            for i in 0..64 {
                map.insert(i, i, &guard);
            }
        }

        let map1 = map.clone();
        let t1 = std::thread::spawn(move || {
            let guard = map1.guard();
            for i in 0..64 {
                map1.upsert(i, |v| v.unwrap() + 1, &guard);
            }
        });
        let map2 = map.clone();
        let t2 = std::thread::spawn(move || {
            let guard = map2.guard();
            for i in 0..64 {
                map2.upsert(i, |v| v.unwrap() + 1, &guard);
            }
        });

        t1.join().unwrap();
        t2.join().unwrap();

        // both upserts committed on every key
        let guard = map.guard();
        for i in 0..64 {
            assert_eq!(map.get(&i, &guard), Some(&(i + 2)));
        }
    });
}

// insert and remove of one key racing: a lookup sees the key's value or
// nothing, never a stale or mixed value
#[test]
fn concurrent_insert_remove_no_ghosts() {
    with_map::<usize, usize>(|map| {
        let map = Arc::new(map());

        let writer = {
            let map = map.clone();
            std::thread::spawn(move || {
                for _ in 0..512 {
                    let guard = map.guard();
                    map.insert(7, 42, &guard);
                    map.remove(&7, &guard);
                }
            })
        };

        let reader = {
            let map = map.clone();
            std::thread::spawn(move || {
                for _ in 0..512 {
                    let guard = map.guard();
                    match map.get(&7, &guard) {
                        Some(&v) => assert_eq!(v, 42),
                        None => {}
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();

        let guard = map.guard();
        assert!(map.get(&7, &guard).is_none());
    });
}

// a map constructed with a single bucket grows to hold anything
#[test]
fn growth_from_capacity_one() {
    let map = HashMap::with_capacity(1);

    {
        let guard = map.guard();
        for i in 0..1024_usize {
            assert_eq!(map.insert(i, i, &guard), None);
        }
    }

    assert_eq!(map.len(), 1024);

    let guard = map.guard();
    for i in 0..1024_usize {
        assert_eq!(map.get(&i, &guard), Some(&i));
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_resize_and_get() {
    with_map::<usize, usize>(|map| {
        let map = Arc::new(map());

        {
            let guard = map.guard();
            for i in 0..1024 {
                map.insert(i, i, &guard);
            }
        }

        let map1 = map.clone();
        // t1 inserts fresh keys to force repeated growth
        let t1 = std::thread::spawn(move || {
            let guard = map1.guard();
            for i in 1024..8192 {
                map1.insert(i, i, &guard);
            }
        });
        let map2 = map.clone();
        // t2 hammers reads of the old keys, hoping to cross a migration
        let t2 = std::thread::spawn(move || {
            let guard = map2.guard();
            for _ in 0..32 {
                for i in 0..1024 {
                    let v = map2.get(&i, &guard).unwrap();
                    assert_eq!(v, &i);
                }
            }
        });

        t1.join().unwrap();
        t2.join().unwrap();

        // all entries survive the resizes
        {
            let guard = map.guard();
            for i in 0..8192 {
                let v = map.get(&i, &guard).unwrap();
                assert_eq!(v, &i);
            }
        }
    });
}

#[test]
fn current_kv_dropped() {
    let dropped1 = Arc::new(0);
    let dropped2 = Arc::new(0);

    with_map::<Arc<usize>, Arc<usize>>(|map| {
        let map = map();

        map.insert(dropped1.clone(), dropped2.clone(), &map.guard());
        assert_eq!(Arc::strong_count(&dropped1), 2);
        assert_eq!(Arc::strong_count(&dropped2), 2);

        drop(map);

        // dropping the map should immediately drop (not defer) all keys and
        // values
        assert_eq!(Arc::strong_count(&dropped1), 1);
        assert_eq!(Arc::strong_count(&dropped2), 1);
    });
}

#[test]
fn removed_kv_dropped_after_guards() {
    let key = Arc::new(0);
    let value = Arc::new(0);

    with_map::<Arc<usize>, Arc<usize>>(|map| {
        let map = map();

        map.insert(key.clone(), value.clone(), &map.guard());
        assert_eq!(Arc::strong_count(&key), 2);

        {
            let guard = map.guard();
            map.remove(&key, &guard);
            assert!(map.get(&key, &guard).is_none());
        }

        // once the map (and its collector) goes away, the deferred entry
        // must have been freed
        drop(map);
        assert_eq!(Arc::strong_count(&key), 1);
        assert_eq!(Arc::strong_count(&value), 1);
    });
}

#[test]
fn empty_maps_equal() {
    with_map::<usize, usize>(|map| {
        let map1 = map();
        let map2 = map();
        assert_eq!(map1, map2);
        assert_eq!(map2, map1);
    });
}

#[test]
fn different_size_maps_not_equal() {
    with_map::<usize, usize>(|map| {
        let map1 = map();
        let map2 = map();
        {
            let guard1 = map1.guard();
            let guard2 = map2.guard();

            map1.insert(1, 0, &guard1);
            map1.insert(2, 0, &guard1);
            map1.insert(3, 0, &guard1);

            map2.insert(1, 0, &guard2);
            map2.insert(2, 0, &guard2);
        }

        assert_ne!(map1, map2);
        assert_ne!(map2, map1);
    });
}

#[test]
fn same_values_equal() {
    with_map::<usize, usize>(|map| {
        let map1 = map();
        let map2 = map();
        {
            map1.pin().insert(1, 0);
            map2.pin().insert(1, 0);
        }

        assert_eq!(map1, map2);
        assert_eq!(map2, map1);
    });
}

#[test]
fn different_values_not_equal() {
    with_map::<usize, usize>(|map| {
        let map1 = map();
        let map2 = map();
        {
            map1.pin().insert(1, 0);
            map2.pin().insert(1, 1);
        }

        assert_ne!(map1, map2);
        assert_ne!(map2, map1);
    });
}

#[test]
fn clone_map_empty() {
    with_map::<&'static str, u32>(|map| {
        let map = map();
        let cloned_map = map.clone();
        assert_eq!(map.len(), cloned_map.len());
        assert_eq!(&map, &cloned_map);
        assert_eq!(cloned_map.len(), 0);
    });
}

#[test]
// Test that the same values exist in both maps (original and cloned)
fn clone_map_filled() {
    with_map::<&'static str, u32>(|map| {
        let map = map();
        map.insert("FooKey", 0, &map.guard());
        map.insert("BarKey", 10, &map.guard());
        let cloned_map = map.clone();
        assert_eq!(map.len(), cloned_map.len());
        assert_eq!(&map, &cloned_map);

        // test that we are not mapping the same tables
        map.insert("NewItem", 100, &map.guard());
        assert_ne!(&map, &cloned_map);
    });
}

#[test]
fn default() {
    let map: HashMap<usize, usize> = HashMap::default();
    let guard = map.guard();
    map.insert(42, 0, &guard);

    assert_eq!(map.get(&42, &guard), Some(&0));
}

#[test]
fn debug() {
    let map: HashMap<usize, usize> = HashMap::new();
    let guard = map.guard();
    map.insert(42, 0, &guard);
    map.insert(16, 8, &guard);

    let formatted = format!("{:?}", map);

    assert!(formatted == "{42: 0, 16: 8}" || formatted == "{16: 8, 42: 0}");
}

#[test]
fn extend() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        let mut entries: Vec<(usize, usize)> = vec![(42, 0), (16, 6), (38, 42)];
        entries.sort_unstable();

        (&map).extend(entries.clone().into_iter());

        let mut collected: Vec<(usize, usize)> = map
            .iter(&guard)
            .map(|(key, value)| (*key, *value))
            .collect();
        collected.sort_unstable();

        assert_eq!(entries, collected);
    });
}

#[test]
fn extend_ref() {
    with_map::<usize, usize>(|map| {
        let map = map();

        let mut entries: Vec<(&usize, &usize)> = vec![(&42, &0), (&16, &6), (&38, &42)];
        entries.sort();

        (&map).extend(entries.clone().into_iter());

        let guard = map.guard();
        let mut collected: Vec<(&usize, &usize)> = map.iter(&guard).collect();
        collected.sort();

        assert_eq!(entries, collected);
    });
}

#[test]
fn from_iter_empty() {
    let entries: Vec<(usize, usize)> = Vec::new();
    let map: HashMap<usize, usize> = HashMap::from_iter(entries);

    assert_eq!(map.len(), 0)
}

#[test]
fn from_array() {
    let map = HashMap::from([(1, "a"), (2, "b")]);
    let guard = map.guard();
    assert_eq!(map.get(&1, &guard), Some(&"a"));
    assert_eq!(map.get(&2, &guard), Some(&"b"));
    assert_eq!(map.len(), 2);
}

#[test]
fn len() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let len = if cfg!(miri) { 100 } else { 10_000 };
        for i in 0..len {
            map.pin().insert(i, i + 1);
        }
        assert_eq!(map.pin().len(), len);
    });
}

#[test]
fn iter() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let len = if cfg!(miri) { 100 } else { 10_000 };
        for i in 0..len {
            assert_eq!(map.pin().insert(i, i + 1), None);
        }

        let v: Vec<_> = (0..len).map(|i| (i, i + 1)).collect();
        let mut got: Vec<_> = map.pin().iter().map(|(&k, &v)| (k, v)).collect();
        got.sort();
        assert_eq!(v, got);
    });
}

#[test]
fn keys_and_values() {
    with_map::<usize, usize>(|map| {
        let map = map();
        for i in 0..64 {
            map.pin().insert(i, i + 100);
        }

        let guard = map.guard();
        let mut keys: Vec<_> = map.keys(&guard).copied().collect();
        keys.sort();
        assert_eq!(keys, (0..64).collect::<Vec<_>>());

        let mut values: Vec<_> = map.values(&guard).copied().collect();
        values.sort();
        assert_eq!(values, (100..164).collect::<Vec<_>>());
    });
}

#[test]
fn mixed() {
    const LEN: usize = if cfg!(miri) { 48 } else { 1024 };
    with_map::<usize, usize>(|map| {
        let map = map();

        assert!(map.pin().get(&100).is_none());
        map.pin().insert(100, 101);
        assert_eq!(map.pin().get(&100), Some(&101));
        map.pin().upsert(100, |x| x.unwrap() + 2);
        assert_eq!(map.pin().get(&100), Some(&103));

        assert!(map.pin().get(&200).is_none());
        map.pin().insert(200, 202);
        assert_eq!(map.pin().get(&200), Some(&202));

        assert!(map.pin().get(&300).is_none());

        assert_eq!(map.pin().remove(&100), Some(&103));
        assert_eq!(map.pin().remove(&200), Some(&202));
        assert!(map.pin().remove(&300).is_none());

        assert!(map.pin().get(&100).is_none());
        assert!(map.pin().get(&200).is_none());
        assert!(map.pin().get(&300).is_none());

        for i in 0..LEN {
            assert_eq!(map.pin().insert(i, i + 1), None);
        }

        for i in 0..LEN {
            assert_eq!(map.pin().get(&i), Some(&(i + 1)));
        }

        for i in 0..LEN {
            // the prior value comes back from the upsert
            assert_eq!(map.pin().upsert(i, |v| v.unwrap() - 1), Some(&(i + 1)));
        }

        for i in 0..LEN {
            assert_eq!(map.pin().get(&i), Some(&i));
        }

        for i in 0..LEN {
            assert_eq!(map.pin().remove(&i), Some(&i));
        }

        for i in 0..LEN {
            assert_eq!(map.pin().get(&i), None);
        }

        for i in 0..(LEN * 2) {
            assert_eq!(map.pin().insert(i, i + 1), None);
        }

        for i in 0..(LEN * 2) {
            assert_eq!(map.pin().get(&i), Some(&(i + 1)));
        }
    });
}

#[test]
fn inline_storage() {
    let map: HashMap<u64, u64, _, Inline> = HashMap::builder().storage::<Inline>().build();

    let guard = map.guard();
    for i in 0..512_u64 {
        assert_eq!(map.insert(i, i * 2, &guard), None);
    }

    assert_eq!(map.insert(0, 99, &guard), Some(&0));
    assert_eq!(map.upsert(0, |v| v.unwrap() + 1, &guard), Some(&0));
    assert_eq!(map.get(&0, &guard), Some(&1));

    for i in 1..512_u64 {
        assert_eq!(map.get(&i, &guard), Some(&(i * 2)));
    }

    assert_eq!(map.remove(&1, &guard), Some(&2));
    assert_eq!(map.len(), 511);
}

#[test]
fn shared_collector() {
    let collector = loquat::Collector::new();

    let map1: HashMap<usize, usize> = HashMap::builder().collector(collector.clone()).build();
    let map2: HashMap<usize, usize> = HashMap::builder().collector(collector).build();

    // one guard works with both maps
    let guard = map1.guard();
    map1.insert(1, 1, &guard);
    map2.insert(2, 2, &guard);
    assert_eq!(map1.get(&1, &guard), Some(&1));
    assert_eq!(map2.get(&2, &guard), Some(&2));
}

#[test]
#[should_panic]
fn mismatched_guard() {
    let map1: HashMap<usize, usize> = HashMap::new();
    let map2: HashMap<usize, usize> = HashMap::new();

    let guard = map1.guard();
    map2.insert(1, 1, &guard);
}

#[test]
fn string_keys_wide_values() {
    with_map::<String, [u64; 4]>(|map| {
        let map = map();
        let guard = map.guard();

        for i in 0..512_u64 {
            let old = map.insert(format!("key-{i}"), [i, i + 1, i + 2, i + 3], &guard);
            assert!(old.is_none());
        }

        // duplicates of the whole stream leave the map unchanged
        for i in 0..512_u64 {
            let old = map.insert(format!("key-{i}"), [0; 4], &guard);
            assert_eq!(old, Some(&[i, i + 1, i + 2, i + 3]));
        }

        assert_eq!(map.len(), 512);

        for i in 0..512_u64 {
            let got = map.get(format!("key-{i}").as_str(), &guard);
            assert_eq!(got, Some(&[i, i + 1, i + 2, i + 3]));
        }
    });
}

#[test]
fn avalanching_hasher() {
    use loquat::Avalanching;
    use std::collections::hash_map::RandomState;

    let map: HashMap<u64, u64, _> =
        HashMap::with_hasher(Avalanching(RandomState::new()));

    let guard = map.guard();
    for i in 0..256 {
        assert_eq!(map.insert(i, i, &guard), None);
    }
    for i in 0..256 {
        assert_eq!(map.get(&i, &guard), Some(&i));
    }
}

// run tests with hashers that create unrealistically bad distributions
mod hasher {
    use super::*;
    use loquat::HashKey;

    fn check<S: HashKey + Default>() {
        let range = if cfg!(miri) { 0..16 } else { 0..100 };

        let map: HashMap<i32, i32, S> = HashMap::with_hasher(S::default());
        let guard = map.guard();
        for i in range.clone() {
            map.insert(i, i, &guard);
        }

        assert!(!map.contains_key(&i32::MIN, &guard));
        assert!(!map.contains_key(&(range.start - 1), &guard));
        for i in range.clone() {
            assert!(map.contains_key(&i, &guard));
        }
        assert!(!map.contains_key(&range.end, &guard));
        assert!(!map.contains_key(&i32::MAX, &guard));

        for i in range.clone() {
            assert_eq!(map.remove(&i, &guard), Some(&i));
        }
        assert_eq!(map.len(), 0);
    }

    // every key lands in one bucket; the chain degrades to O(n) but stays
    // correct
    #[test]
    fn test_zero_hasher() {
        #[derive(Default)]
        pub struct ZeroHasher;

        impl Hasher for ZeroHasher {
            fn finish(&self) -> u64 {
                0
            }

            fn write(&mut self, _: &[u8]) {}
        }

        check::<BuildHasherDefault<ZeroHasher>>();
    }

    #[test]
    fn test_max_hasher() {
        #[derive(Default)]
        struct MaxHasher;

        impl Hasher for MaxHasher {
            fn finish(&self) -> u64 {
                u64::MAX
            }

            fn write(&mut self, _: &[u8]) {}
        }

        check::<BuildHasherDefault<MaxHasher>>();
    }
}
