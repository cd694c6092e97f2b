// Copyright 2017 Amanieu d'Antras
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{self, AtomicBool, AtomicPtr, Ordering};
use std::sync::Mutex;

const BUCKETS: usize = usize::BITS as usize;

// Lazily-allocated, append-only per-thread storage.
//
// Values are indexed by a process-wide thread id that is recycled when a
// thread exits, so the number of slots is bounded by the peak number of
// live threads, not the total number ever spawned.
pub struct ThreadLocal<T: Send> {
    buckets: [AtomicPtr<Entry<T>>; BUCKETS],
}

struct Entry<T> {
    present: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Drop for Entry<T> {
    fn drop(&mut self) {
        unsafe {
            if *self.present.get_mut() {
                ptr::drop_in_place((*self.value.get()).as_mut_ptr());
            }
        }
    }
}

unsafe impl<T: Send> Send for ThreadLocal<T> {}
unsafe impl<T: Send> Sync for ThreadLocal<T> {}

impl<T> ThreadLocal<T>
where
    T: Send,
{
    pub fn with_capacity(capacity: usize) -> ThreadLocal<T> {
        let allocated_buckets = capacity
            .checked_sub(1)
            .map(|c| (usize::BITS as usize) - (c.leading_zeros() as usize))
            .unwrap_or(0);

        let mut buckets = [ptr::null_mut(); BUCKETS];
        for (i, bucket) in buckets[..allocated_buckets].iter_mut().enumerate() {
            *bucket = allocate_bucket::<T>(1 << i);
        }

        ThreadLocal {
            // safety: `AtomicPtr` has the same representation as a pointer
            buckets: unsafe { std::mem::transmute(buckets) },
        }
    }

    // Returns the value for the current thread, initializing it with `create`
    // if it has not been set.
    pub fn get_or(&self, create: impl FnOnce() -> T) -> &T {
        let id = thread_id::get();
        let (bucket, index) = location(id);

        // safety: `location` always returns a bucket index < BUCKETS
        let bucket = unsafe { self.buckets.get_unchecked(bucket) };
        let mut bucket_ptr = bucket.load(Ordering::Acquire);

        if bucket_ptr.is_null() {
            let new_bucket = allocate_bucket(bucket_len(id));

            match bucket.compare_exchange(
                ptr::null_mut(),
                new_bucket,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => bucket_ptr = new_bucket,
                // if the bucket value changed (from null), that means
                // another thread stored a new bucket before we could,
                // and we can free our bucket and use that one instead
                Err(other) => unsafe {
                    let _ = Box::from_raw(ptr::slice_from_raw_parts_mut(
                        new_bucket,
                        bucket_len(id),
                    ));

                    bucket_ptr = other;
                },
            }
        }

        unsafe {
            let entry = &*bucket_ptr.add(index);

            // read without atomic operations as only this thread can set the value
            if (&entry.present as *const _ as *const bool).read() {
                (*entry.value.get()).assume_init_ref()
            } else {
                entry.value.get().write(MaybeUninit::new(create()));
                entry.present.store(true, Ordering::Release);

                // seqcst: synchronize with the fence during reclamation:
                // - if this fence comes first, the reclaiming thread will see our entry
                // - if their fence comes first, we will see the new values of any
                //   pointers being retired by that thread
                atomic::fence(Ordering::SeqCst);

                (*entry.value.get()).assume_init_ref()
            }
        }
    }

    // Iterate over all initialized values.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            tls: self,
            bucket: 0,
            index: 0,
        }
    }
}

impl<T: Send> Drop for ThreadLocal<T> {
    fn drop(&mut self) {
        for (i, bucket) in self.buckets.iter_mut().enumerate() {
            let bucket_ptr = *bucket.get_mut();

            if bucket_ptr.is_null() {
                continue;
            }

            unsafe {
                let _ = Box::from_raw(ptr::slice_from_raw_parts_mut(bucket_ptr, 1 << i));
            }
        }
    }
}

pub struct Iter<'a, T: Send> {
    tls: &'a ThreadLocal<T>,
    bucket: usize,
    index: usize,
}

impl<'a, T: Send> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        while self.bucket < BUCKETS {
            let bucket_ptr = self.tls.buckets[self.bucket].load(Ordering::Acquire);

            if bucket_ptr.is_null() {
                // buckets are allocated on first use by a thread in their id
                // range, so later buckets may still be live
                self.bucket += 1;
                self.index = 0;
                continue;
            }

            let len = 1 << self.bucket;
            while self.index < len {
                let entry = unsafe { &*bucket_ptr.add(self.index) };
                self.index += 1;

                if entry.present.load(Ordering::Acquire) {
                    // safety: the present flag is only set after the value
                    // is fully initialized
                    return Some(unsafe { (*entry.value.get()).assume_init_ref() });
                }
            }

            self.bucket += 1;
            self.index = 0;
        }

        None
    }
}

// The bucket and intra-bucket index for a thread id.
//
// Bucket `b` has length `1 << b` and holds ids in `(2^b - 1)..(2^(b+1) - 1)`.
#[inline]
fn location(id: usize) -> (usize, usize) {
    let bucket = (usize::BITS - (id + 1).leading_zeros() - 1) as usize;
    let index = id + 1 - (1 << bucket);
    (bucket, index)
}

#[inline]
fn bucket_len(id: usize) -> usize {
    1 << location(id).0
}

fn allocate_bucket<T>(len: usize) -> *mut Entry<T> {
    let entries = (0..len)
        .map(|_| Entry::<T> {
            present: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
        .collect::<Box<[Entry<T>]>>();

    Box::into_raw(entries).cast::<Entry<T>>()
}

// Process-wide reusable thread ids.
//
// Ids of exited threads are recycled so long-running programs that spawn
// short-lived threads do not grow per-thread state without bound.
pub mod thread_id {
    use super::Mutex;
    use std::cell::Cell;

    struct Registry {
        next: usize,
        free: Vec<usize>,
    }

    static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
        next: 0,
        free: Vec::new(),
    });

    struct ThreadId(usize);

    impl Drop for ThreadId {
        fn drop(&mut self) {
            REGISTRY.lock().unwrap().free.push(self.0);
        }
    }

    thread_local! {
        static THREAD_ID: ThreadId = ThreadId(allocate());
        static CACHED: Cell<Option<usize>> = const { Cell::new(None) };
    }

    fn allocate() -> usize {
        let mut registry = REGISTRY.lock().unwrap();
        match registry.free.pop() {
            Some(id) => id,
            None => {
                let id = registry.next;
                registry.next += 1;
                id
            }
        }
    }

    // The id of the current thread.
    #[inline]
    pub fn get() -> usize {
        CACHED.with(|cached| match cached.get() {
            Some(id) => id,
            None => {
                let id = THREAD_ID.with(|t| t.0);
                cached.set(Some(id));
                id
            }
        })
    }
}
