use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicPtr, AtomicUsize};
use std::sync::Mutex;

use super::list::Node;

// A hash table laid out in a single allocation.
#[repr(transparent)]
pub struct RawTable(u8);

// The table allocation's layout.
#[allow(unused)]
#[repr(C)]
struct TableLayout {
    len: usize,
    state: ResizeState,
    buckets: [AtomicPtr<()>; 0],
}

// State for an in-progress migration to a successor table.
#[derive(Default)]
pub struct ResizeState {
    // The successor table, twice this table's length.
    pub next: AtomicPtr<RawTable>,
    // A lock acquired to allocate the successor.
    pub allocating: Mutex<()>,
    // The number of buckets claimed by migrators, in chunks.
    pub claim: AtomicUsize,
    // The number of buckets that have been fully forwarded.
    pub copied: AtomicUsize,
}

// Manages a table allocation.
pub struct Table<E> {
    // the number of buckets, always a power of two
    pub len: usize,
    // the raw table pointer
    pub raw: *mut RawTable,
    _e: PhantomData<E>,
}

impl<E> Copy for Table<E> {}

impl<E> Clone for Table<E> {
    fn clone(&self) -> Table<E> {
        *self
    }
}

impl<E> Table<E> {
    pub fn alloc(len: usize) -> Table<E> {
        debug_assert!(len.is_power_of_two());

        unsafe {
            let layout = Table::<E>::layout(len);
            let ptr = alloc::alloc(layout);

            if ptr.is_null() {
                alloc::handle_alloc_error(layout);
            }

            ptr.cast::<TableLayout>().write(TableLayout {
                len,
                state: ResizeState::default(),
                buckets: [],
            });

            // null pointers, so every bucket starts out empty
            ptr.add(mem::size_of::<TableLayout>())
                .cast::<usize>()
                .write_bytes(0, len);

            Table {
                len,
                raw: ptr.cast::<RawTable>(),
                _e: PhantomData,
            }
        }
    }

    // # Safety
    //
    // The pointer must come from `Table::alloc` for the same slot type.
    pub unsafe fn from_raw(raw: *mut RawTable) -> Table<E> {
        let layout = unsafe { &*raw.cast::<TableLayout>() };

        Table {
            raw,
            len: layout.len,
            _e: PhantomData,
        }
    }

    // The cell holding bucket `i`'s state and list head.
    #[inline]
    pub fn bucket(&self, i: usize) -> &AtomicPtr<Node<E>> {
        debug_assert!(i < self.len);

        unsafe {
            &*self
                .raw
                .cast::<u8>()
                .add(mem::size_of::<TableLayout>() + i * mem::size_of::<AtomicPtr<Node<E>>>())
                .cast::<AtomicPtr<Node<E>>>()
        }
    }

    #[inline]
    pub fn state(&self) -> &ResizeState {
        unsafe { &(*self.raw.cast::<TableLayout>()).state }
    }

    // # Safety
    //
    // The allocation must not be referenced afterwards. Bucket lists are not
    // freed here; their nodes are owned by the reclamation layer.
    pub unsafe fn dealloc(table: Table<E>) {
        let layout = Table::<E>::layout(table.len);
        unsafe {
            // run the header's destructor (the allocation mutex)
            std::ptr::drop_in_place(table.raw.cast::<TableLayout>());
            alloc::dealloc(table.raw.cast::<u8>(), layout)
        }
    }

    fn layout(len: usize) -> Layout {
        let size = mem::size_of::<TableLayout>() + len * mem::size_of::<AtomicPtr<Node<E>>>();
        Layout::from_size_align(size, mem::align_of::<TableLayout>()).unwrap()
    }
}

#[test]
fn layout() {
    unsafe {
        let table: Table<(usize, usize)> = Table::alloc(4);
        let table: Table<(usize, usize)> = Table::from_raw(table.raw);
        assert_eq!(table.len, 4);
        for i in 0..4 {
            assert!(table
                .bucket(i)
                .load(std::sync::atomic::Ordering::Relaxed)
                .is_null());
        }
        Table::dealloc(table);
    }
}
