use loquat::HashSet;

use std::sync::Arc;

fn with_set<K>(mut test: impl FnMut(&dyn Fn() -> HashSet<K>)) {
    test(&(|| HashSet::with_capacity(1)));
    test(&(|| HashSet::with_capacity(1 << 12)));
}

#[test]
fn new() {
    with_set::<usize>(|set| drop(set()));
}

#[test]
fn insert() {
    with_set::<usize>(|set| {
        let set = set();
        let guard = set.guard();
        assert!(set.insert(42, &guard));
        assert!(!set.insert(42, &guard));
    });
}

#[test]
fn get_empty() {
    with_set::<usize>(|set| {
        let set = set();
        let guard = set.guard();
        assert!(set.get(&42, &guard).is_none());
    });
}

#[test]
fn remove_empty() {
    with_set::<usize>(|set| {
        let set = set();
        let guard = set.guard();
        assert!(!set.remove(&42, &guard));
    });
}

#[test]
fn insert_and_remove() {
    with_set::<usize>(|set| {
        let set = set();
        let guard = set.guard();
        set.insert(42, &guard);
        assert!(set.remove(&42, &guard));
        assert!(set.get(&42, &guard).is_none());
    });
}

#[test]
fn insert_and_get() {
    with_set::<usize>(|set| {
        let set = set();
        set.insert(42, &set.guard());

        {
            let guard = set.guard();
            assert_eq!(set.get(&42, &guard), Some(&42));
            assert!(set.contains(&42, &guard));
        }
    });
}

#[test]
fn take() {
    with_set::<usize>(|set| {
        let set = set();
        let guard = set.guard();
        set.insert(42, &guard);
        assert_eq!(set.take(&42, &guard), Some(&42));
        assert_eq!(set.take(&42, &guard), None);
        assert!(set.is_empty());
    });
}

#[test]
fn clear() {
    with_set::<usize>(|set| {
        let set = set();
        let guard = set.guard();
        for i in 0..5 {
            set.insert(i, &guard);
        }
        set.clear(&guard);
        assert!(set.is_empty());
    });
}

#[test]
fn len() {
    with_set::<usize>(|set| {
        let set = set();
        let len = if cfg!(miri) { 100 } else { 10_000 };
        for i in 0..len {
            set.pin().insert(i);
        }
        assert_eq!(set.pin().len(), len);
    });
}

#[test]
fn iter() {
    with_set::<usize>(|set| {
        let set = set();
        for i in 0..64 {
            set.pin().insert(i);
        }

        let guard = set.guard();
        let mut got: Vec<_> = set.iter(&guard).copied().collect();
        got.sort();
        assert_eq!(got, (0..64).collect::<Vec<_>>());
    });
}

#[test]
fn concurrent_insert() {
    with_set::<usize>(|set| {
        let set = Arc::new(set());

        let set1 = set.clone();
        let t1 = std::thread::spawn(move || {
            for i in 0..64 {
                set1.insert(i, &set1.guard());
            }
        });
        let set2 = set.clone();
        let t2 = std::thread::spawn(move || {
            for i in 0..64 {
                set2.insert(i, &set2.guard());
            }
        });

        t1.join().unwrap();
        t2.join().unwrap();

        let guard = set.guard();
        for i in 0..64 {
            assert!(set.contains(&i, &guard));
        }
        assert_eq!(set.len(), 64);
    });
}

#[test]
fn concurrent_remove() {
    with_set::<usize>(|set| {
        let set = Arc::new(set());

        {
            let guard = set.guard();
            for i in 0..64 {
                set.insert(i, &guard);
            }
        }

        let set1 = set.clone();
        let t1 = std::thread::spawn(move || {
            let guard = set1.guard();
            for i in 0..64 {
                set1.remove(&i, &guard);
            }
        });
        let set2 = set.clone();
        let t2 = std::thread::spawn(move || {
            let guard = set2.guard();
            for i in 0..64 {
                set2.remove(&i, &guard);
            }
        });

        t1.join().unwrap();
        t2.join().unwrap();

        let guard = set.guard();
        for i in 0..64 {
            assert!(!set.contains(&i, &guard));
        }
    });
}

#[test]
fn string_elements() {
    with_set::<String>(|set| {
        let set = set();
        let guard = set.guard();

        for i in 0..256 {
            assert!(set.insert(format!("element-{i}"), &guard));
        }

        for i in 0..256 {
            assert!(set.contains(format!("element-{i}").as_str(), &guard));
        }

        assert_eq!(set.len(), 256);
    });
}

#[test]
fn eq_and_debug() {
    with_set::<usize>(|set| {
        let set1 = set();
        let set2 = set();

        set1.pin().insert(1);
        set2.pin().insert(1);
        assert_eq!(set1, set2);

        set2.pin().insert(2);
        assert_ne!(set1, set2);

        set1.pin().remove(&1);
        let formatted = format!("{:?}", set1);
        assert_eq!(formatted, "{}");
    });
}

#[test]
fn from_array_and_extend() {
    let set = HashSet::from([1, 2, 3]);
    assert_eq!(set.len(), 3);

    (&set).extend([3, 4].into_iter());
    let guard = set.guard();
    assert!(set.contains(&4, &guard));
    assert_eq!(set.len(), 4);
}

#[test]
fn clone_set() {
    let set = HashSet::from(["a".to_string(), "b".to_string()]);
    let cloned = set.clone();

    assert_eq!(set, cloned);

    set.pin().insert("c".to_string());
    assert_ne!(set, cloned);
}
