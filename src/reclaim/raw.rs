use super::tls::ThreadLocal;
use super::utils::CachePadded;

use std::cell::{Cell, UnsafeCell};
use std::sync::atomic::{self, AtomicU64, Ordering};

// Classic epoch-based reclamation.
//
// Every thread entering a critical section announces the global epoch it
// observed. An object retired under epoch `e` may be freed once every active
// thread has announced an epoch greater than `e`: at that point no critical
// section that could have observed the object is still running. The epoch
// is advanced opportunistically, every `advance_frequency` retires, and only
// when all active threads have caught up to the current value, so a stalled
// reader pins both the epoch and the garbage behind it.
pub struct Collector {
    // The global epoch value.
    pub(crate) epoch: CachePadded<AtomicU64>,
    // Per-thread epoch announcements.
    reservations: ThreadLocal<CachePadded<Reservation>>,
    // Per-thread deferred-free lists.
    bags: ThreadLocal<UnsafeCell<CachePadded<Bag>>>,
    // The number of retires between attempts to advance the epoch.
    pub(crate) advance_frequency: u64,
}

// A per-thread announcement slot.
pub struct Reservation {
    // The epoch this thread entered its current critical section in,
    // or `INACTIVE`.
    epoch: AtomicU64,
    // The number of active guards for this thread.
    guards: Cell<u64>,
}

// The thread has no active guards and is not accessing any pointers.
const INACTIVE: u64 = u64::MAX;

impl Default for Reservation {
    fn default() -> Reservation {
        Reservation {
            epoch: AtomicU64::new(INACTIVE),
            guards: Cell::new(0),
        }
    }
}

// Reservations are only written by their owning thread; other threads
// read the epoch announcement.
unsafe impl Sync for Reservation {}

// An object whose destruction has been deferred.
struct Deferred {
    ptr: *mut u8,
    reclaim: unsafe fn(*mut u8),
    epoch: u64,
}

// A thread-local list of deferred objects.
#[derive(Default)]
pub struct Bag {
    deferred: Vec<Deferred>,
    retires: u64,
}

unsafe impl Send for Bag {}

impl Collector {
    pub fn with_threads(threads: usize, advance_frequency: u64) -> Collector {
        Collector {
            epoch: CachePadded {
                value: AtomicU64::new(1),
            },
            reservations: ThreadLocal::with_capacity(threads),
            bags: ThreadLocal::with_capacity(threads),
            advance_frequency,
        }
    }

    // Mark the current thread as active.
    pub fn enter(&self) -> &Reservation {
        let reservation = self.reservations.get_or(Default::default);

        // calls to `enter` may be reentrant, so we need to keep track of
        // the number of active guards for the current thread
        let guards = reservation.value.guards.get();
        reservation.value.guards.set(guards + 1);

        if guards == 0 {
            // announce the epoch we are entering under. if the epoch advances
            // while we publish the announcement, re-announce: the reclaimer
            // must never observe us active in an epoch older than the pointers
            // we are about to load.
            //
            // seqcst: establish a total order between this store and the fence
            // during retirement
            // - if our store comes first, the retiring thread will see that we
            //   are active in this epoch
            // - if the fence comes first, we will see the new values of any
            //   pointers unlinked by that thread
            let mut epoch = self.epoch.value.load(Ordering::Relaxed);
            loop {
                reservation.value.epoch.store(epoch, Ordering::SeqCst);

                let current = self.epoch.value.load(Ordering::SeqCst);
                if current == epoch {
                    break;
                }

                epoch = current;
            }
        }

        &reservation.value
    }

    // Mark the current thread as inactive.
    pub fn leave(&self, reservation: &Reservation) {
        let guards = reservation.guards.get();
        reservation.guards.set(guards - 1);

        if guards == 1 {
            // release: exit the critical section, ordering all loads of
            // protected pointers before the reclaimer sees us inactive
            reservation.epoch.store(INACTIVE, Ordering::Release);
        }
    }

    // Defer destruction of an object until no active thread can observe it.
    //
    // # Safety
    //
    // The object must already be unreachable from the shared structure, and
    // must not be retired twice.
    pub unsafe fn add(&self, ptr: *mut u8, reclaim: unsafe fn(*mut u8)) {
        // safety: bags are only accessed by the current thread
        let bag = unsafe { &mut (*self.bags.get_or(Default::default).get()).value };

        // seqcst: order the unlinking store (performed by our caller) before
        // any active thread's announcement load. a thread that announces an
        // epoch newer than the one we record here is guaranteed to see the
        // object unlinked and can never acquire a reference to it.
        atomic::fence(Ordering::SeqCst);

        let epoch = self.epoch.value.load(Ordering::Relaxed);
        bag.deferred.push(Deferred {
            ptr,
            reclaim,
            epoch,
        });

        bag.retires += 1;
        if bag.retires % self.advance_frequency == 0 {
            self.try_advance();
            self.try_reclaim(bag);
        }
    }

    // Free any deferred objects in the current thread's bag that are no
    // longer reachable by an active thread.
    pub fn flush(&self) {
        // safety: bags are only accessed by the current thread
        let bag = unsafe { &mut (*self.bags.get_or(Default::default).get()).value };
        self.try_advance();
        self.try_reclaim(bag);
    }

    // Advance the global epoch if every active thread has caught up to it.
    fn try_advance(&self) {
        let epoch = self.epoch.value.load(Ordering::SeqCst);

        for reservation in self.reservations.iter() {
            let announced = reservation.value.epoch.load(Ordering::SeqCst);

            // a thread is still running a critical section it entered under
            // an older epoch; advancing past it would let its pointers be
            // freed underneath it
            if announced != INACTIVE && announced < epoch {
                return;
            }
        }

        let _ = self.epoch.value.compare_exchange(
            epoch,
            epoch + 1,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    // Free everything in `bag` retired under an epoch older than the oldest
    // active announcement.
    fn try_reclaim(&self, bag: &mut Bag) {
        if bag.deferred.is_empty() {
            return;
        }

        // seqcst: any thread whose announcement we miss here entered after
        // this fence, and the enter protocol guarantees it sees the objects
        // in this bag as unlinked
        atomic::fence(Ordering::SeqCst);

        let mut min = u64::MAX;
        for reservation in self.reservations.iter() {
            let announced = reservation.value.epoch.load(Ordering::SeqCst);
            if announced != INACTIVE {
                min = min.min(announced);
            }
        }

        bag.deferred.retain(|deferred| {
            if deferred.epoch < min {
                // safety: retired under an epoch no active thread announces,
                // so no reference to it can still exist
                unsafe { (deferred.reclaim)(deferred.ptr) };
                false
            } else {
                true
            }
        });
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        // no thread can hold a guard anymore, so everything deferred
        // can be freed immediately
        for bag in self.bags.iter() {
            // safety: we have &mut self
            let bag = unsafe { &mut (*bag.get()).value };

            for deferred in bag.deferred.drain(..) {
                // safety: the objects were unlinked when retired and no
                // readers remain
                unsafe { (deferred.reclaim)(deferred.ptr) };
            }
        }
    }
}
