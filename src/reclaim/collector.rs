use super::raw::{self, Reservation};
use super::tls::thread_id;

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// Epoch-based memory reclamation.
///
/// A collector defers destruction of retired objects until every thread that
/// could observe them has exited its critical section. Threads open a
/// critical section with [`Collector::enter`] and access shared pointers
/// through the returned [`Guard`].
///
/// Collectors are cheap to clone; clones share the same state, so several
/// maps can pool their reclamation. Deferred objects that are still pending
/// are freed when the last clone drops.
pub struct Collector {
    raw: Arc<raw::Collector>,
}

impl Collector {
    const DEFAULT_ADVANCE_FREQUENCY: u64 = 64;

    /// Creates a new collector.
    pub fn new() -> Collector {
        Collector {
            raw: Arc::new(raw::Collector::with_threads(
                std::thread::available_parallelism()
                    .map(usize::from)
                    .unwrap_or(1),
                Collector::DEFAULT_ADVANCE_FREQUENCY,
            )),
        }
    }

    /// Marks the current thread as active, returning a guard that allows
    /// protecting loads of atomic pointers.
    ///
    /// Any pointer loaded through the guard remains valid until the guard is
    /// dropped. `enter` is reentrant: the thread stays active until its last
    /// guard is dropped. Note that holding a guard for a long time pins the
    /// epoch and prevents all reclamation, by every thread.
    #[inline]
    pub fn enter(&self) -> Guard<'_> {
        Guard {
            collector: self,
            reservation: self.raw.enter(),
            thread: thread_id::get(),
            _not_send: PhantomData,
        }
    }

    /// Retires a value, running `reclaim` on it once no thread holds a
    /// reference to it.
    ///
    /// Retirement is non-blocking; the actual free is deferred.
    ///
    /// # Safety
    ///
    /// The pointer must be valid, unreachable from the shared structure
    /// (with a release operation ordering the unlink), and retired only once.
    #[inline]
    pub unsafe fn retire<T>(&self, ptr: *mut T, reclaim: unsafe fn(*mut u8)) {
        debug_assert!(!ptr.is_null(), "attempted to retire a null pointer");

        // safety: guaranteed by the caller
        unsafe { self.raw.add(ptr.cast::<u8>(), reclaim) }
    }

    /// Returns `true` if both references point to the same collector.
    pub fn ptr_eq(this: &Collector, other: &Collector) -> bool {
        Arc::ptr_eq(&this.raw, &other.raw)
    }
}

impl Clone for Collector {
    fn clone(&self) -> Collector {
        Collector {
            raw: Arc::clone(&self.raw),
        }
    }
}

impl Default for Collector {
    fn default() -> Collector {
        Collector::new()
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("epoch", &self.raw.epoch.value)
            .field("advance_frequency", &self.raw.advance_frequency)
            .finish()
    }
}

/// A guard that keeps the current thread marked as active, enabling
/// protected loads of atomic pointers.
///
/// See [`Collector::enter`] for details.
pub struct Guard<'a> {
    collector: &'a Collector,
    reservation: &'a Reservation,
    thread: usize,
    // a guard announces for the thread that created it and must be
    // dropped there
    _not_send: PhantomData<*mut ()>,
}

impl Guard<'_> {
    /// Protects the load of an atomic pointer.
    ///
    /// The announcement made in [`Collector::enter`] covers the entire
    /// critical section, so this is a plain load: the value read cannot be
    /// freed until this guard is dropped.
    #[inline]
    pub fn protect<T>(&self, ptr: &AtomicPtr<T>, ordering: Ordering) -> *mut T {
        ptr.load(ordering)
    }

    /// Retires a value, running `reclaim` on it once no thread (including
    /// this one, via this guard) holds a reference to it.
    ///
    /// # Safety
    ///
    /// Same contract as [`Collector::retire`].
    #[inline]
    pub unsafe fn retire<T>(&self, ptr: *mut T, reclaim: unsafe fn(*mut u8)) {
        // safety: guaranteed by the caller. the current thread's own
        // announcement keeps the value alive until the guard drops.
        unsafe { self.collector.retire(ptr, reclaim) }
    }

    /// Returns the collector this guard was created from.
    #[inline]
    pub fn collector(&self) -> &Collector {
        self.collector
    }

    /// A dense id for the current thread, stable for the thread's lifetime.
    #[inline]
    pub fn thread_id(&self) -> usize {
        self.thread
    }

    /// Attempt to reclaim the current thread's deferred objects.
    ///
    /// Objects retired through this guard are not eligible until it drops;
    /// this only flushes garbage left over from earlier critical sections.
    pub fn flush(&mut self) {
        self.collector.raw.flush();
    }
}

impl Drop for Guard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.collector.raw.leave(self.reservation);
    }
}

impl fmt::Debug for Guard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guard").finish()
    }
}
