// circular buffer part of a channel.

use crate::error::SizeOutOfRangeError;
use std::{
    alloc::{alloc, dealloc, handle_alloc_error, Layout},
    ptr::{drop_in_place, NonNull},
};


// fixed-capacity circular buffer of typed slots.
//
// `sendx` is the slot the next push writes and `recvx` the slot the next
// pop reads; both advance modulo `capacity`. storage is a single raw
// allocation sized at construction. when `capacity` is zero or `T` is
// zero-sized there is no allocation and `buf` is dangling but well-aligned,
// which is all a zero-sized access requires.
pub(crate) struct Ring<T> {
    buf: NonNull<T>,
    capacity: usize,
    count: usize,
    sendx: usize,
    recvx: usize,
}

impl<T> Ring<T> {
    // construct empty with the given capacity.
    //
    // fails if `capacity * size_of::<T>()` overflows or exceeds the largest
    // supported single allocation.
    pub(crate) fn new(capacity: usize) -> Result<Self, SizeOutOfRangeError> {
        let layout = Layout::array::<T>(capacity).map_err(|_| SizeOutOfRangeError)?;
        let buf = if layout.size() == 0 {
            // zero capacity or zero-sized elements: nothing to allocate
            NonNull::dangling()
        } else {
            let Some(ptr) = NonNull::new(unsafe { alloc(layout) } as *mut T)
                else { handle_alloc_error(layout) };
            ptr
        };
        Ok(Ring { buf, capacity, count: 0, sendx: 0, recvx: 0 })
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    // note: a zero-capacity ring is simultaneously empty and full.
    pub(crate) fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    // current (sendx, recvx), for locked observations.
    #[allow(dead_code)]
    pub(crate) fn indices(&self) -> (usize, usize) {
        (self.sendx, self.recvx)
    }

    // pointer to slot i.
    fn slot(&self, i: usize) -> *mut T {
        debug_assert!(i < self.capacity);
        // for zero-sized T the offset collapses to zero and the dangling
        // base pointer is returned, which is valid for a zero-sized access.
        unsafe { self.buf.as_ptr().add(i) }
    }

    // write `elem` to the back slot and advance `sendx`.
    //
    // UB if the ring is full.
    pub(crate) unsafe fn push(&mut self, elem: T) {
        debug_assert!(!self.is_full(), "UB");
        self.slot(self.sendx).write(elem);
        self.sendx += 1;
        if self.sendx == self.capacity {
            self.sendx = 0;
        }
        self.count += 1;
    }

    // move the front slot's element out and advance `recvx`. moving out is
    // what clears the slot: the buffer keeps no reference that could extend
    // the element's lifetime.
    //
    // UB if the ring is empty.
    pub(crate) unsafe fn pop(&mut self) -> T {
        debug_assert!(!self.is_empty(), "UB");
        let elem = self.slot(self.recvx).read();
        self.recvx += 1;
        if self.recvx == self.capacity {
            self.recvx = 0;
        }
        self.count -= 1;
        elem
    }

    // on a full ring, move the front element out and refill the vacated
    // slot with `elem` in one step. the vacated front is simultaneously the
    // open back, so `recvx` advances, `sendx` lands on the same slot, and
    // `count` is unchanged.
    //
    // UB if the ring is not full or the capacity is zero.
    pub(crate) unsafe fn rotate(&mut self, elem: T) -> T {
        debug_assert!(self.capacity > 0, "UB");
        debug_assert!(self.is_full(), "UB");
        let front = self.slot(self.recvx).read();
        self.slot(self.recvx).write(elem);
        self.recvx += 1;
        if self.recvx == self.capacity {
            self.recvx = 0;
        }
        self.sendx = self.recvx;
        front
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        unsafe {
            // drop live elements front to back
            let mut i = self.recvx;
            for _ in 0..self.count {
                drop_in_place(self.slot(i));
                i += 1;
                if i == self.capacity {
                    i = 0;
                }
            }
            let layout = Layout::array::<T>(self.capacity).unwrap();
            if layout.size() != 0 {
                dealloc(self.buf.as_ptr() as *mut u8, layout);
            }
        }
    }
}

unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Sync> Sync for Ring<T> {}
