// waiter records and the linked queue part of a channel.

use crate::task::Task;
use std::{
    cell::{Cell, UnsafeCell},
    ptr::NonNull,
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{Acquire, Release},
        },
        Arc,
    },
};


// one parked send or receive operation.
//
// the record lives in the blocked operation's stack frame. the channel
// borrows it through the queue links while it is linked, and the frame
// cannot unwind until the owning task is unparked, which the waking party
// does only after it is done touching the record. every field a foreign
// task touches is interior-mutable, so shared aliasing of the record is
// sound.
pub(crate) struct Waiter<T> {
    // the parked task, marked runnable by the waking party.
    task: Arc<Task>,
    // transfer slot: `Some` source for sends, `None` destination for
    // receives. written and taken only under the channel lock while the
    // waiter is linked; read by the owner only after wake.
    slot: UnsafeCell<Option<T>>,
    // set by the waking party: true for a value transfer, false when the
    // wake-up came from close.
    success: AtomicBool,
    // the waiter was enrolled by a multi-way select; a dequeuer must win
    // the task's select claim before delivering to it.
    in_select: bool,
    // queue links. `linked` is cleared on removal, which is how the owner
    // detects on wake that it was properly unlinked.
    linked: Cell<bool>,
    to_front: Cell<Option<NonNull<Waiter<T>>>>,
    to_back: Cell<Option<NonNull<Waiter<T>>>>,
}

impl<T> Waiter<T> {
    pub(crate) fn new(task: Arc<Task>, slot: Option<T>, in_select: bool) -> Self {
        Waiter {
            task,
            slot: UnsafeCell::new(slot),
            success: AtomicBool::new(false),
            in_select,
            linked: Cell::new(false),
            to_front: Cell::new(None),
            to_back: Cell::new(None),
        }
    }

    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.task
    }

    // take the slot value.
    //
    // UB unless called either under the channel lock while the waiter is
    // linked, or by the owner after wake.
    pub(crate) unsafe fn take_slot(&self) -> Option<T> {
        (*self.slot.get()).take()
    }

    // fill the slot.
    //
    // UB unless called under the channel lock, on a waiter just dequeued
    // whose task has not yet been unparked.
    pub(crate) unsafe fn put_slot(&self, elem: T) {
        *self.slot.get() = Some(elem);
    }

    // publish the outcome of the operation. release pairs with the acquire
    // in `succeeded` on the woken side.
    pub(crate) fn set_success(&self, success: bool) {
        self.success.store(success, Release);
    }

    pub(crate) fn succeeded(&self) -> bool {
        self.success.load(Acquire)
    }

    pub(crate) fn is_linked(&self) -> bool {
        self.linked.get()
    }
}

// the queue never touches a record outside the channel lock, and a record
// only crosses threads while its owner is parked.
unsafe impl<T: Send> Send for Waiter<T> {}
unsafe impl<T: Send> Sync for Waiter<T> {}


// FIFO queue of parked operations, linked through the waiter records
// themselves.
pub(crate) struct WaitQueue<T> {
    // front and back of queue, unless queue is empty.
    front_back: Option<(NonNull<Waiter<T>>, NonNull<Waiter<T>>)>,
    len: usize,
}

impl<T> WaitQueue<T> {
    pub(crate) fn new() -> Self {
        WaitQueue { front_back: None, len: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    // link the waiter at the back of this queue.
    //
    // UB if:
    //
    // - the waiter is already linked.
    // - the waiter's frame does not stay live while linked.
    pub(crate) unsafe fn enqueue(&mut self, waiter: NonNull<Waiter<T>>) {
        let w = waiter.as_ref();
        debug_assert!(!w.linked.get(), "UB");
        debug_assert!(w.to_front.get().is_none());
        debug_assert!(w.to_back.get().is_none());
        w.linked.set(true);
        if let Some((_, back)) = &mut self.front_back {
            // waiter becomes new back, and new to_back of previous back
            let back_w = back.as_ref();
            debug_assert!(back_w.to_back.get().is_none());
            back_w.to_back.set(Some(waiter));
            w.to_front.set(Some(*back));
            *back = waiter;
        } else {
            // edge case: waiter becomes only waiter in queue
            self.front_back = Some((waiter, waiter));
        }
        self.len += 1;
    }

    // unlink and return the waiter at the front of this queue.
    //
    // a waiter enrolled by a select may already have been claimed through
    // another participating channel; such a waiter loses the claim race,
    // stays dequeued, and the next one is considered. links are cleared on
    // removal so the owner can detect it was unlinked.
    pub(crate) unsafe fn dequeue(&mut self) -> Option<NonNull<Waiter<T>>> {
        loop {
            let (front, _) = self.front_back?;
            let w = front.as_ref();
            debug_assert!(w.linked.get());
            if let Some(next) = w.to_back.get() {
                next.as_ref().to_front.set(None);
                self.front_back.as_mut().unwrap().0 = next;
            } else {
                // edge case: waiter was only waiter in queue
                self.front_back = None;
            }
            w.to_back.set(None);
            w.to_front.set(None);
            w.linked.set(false);
            self.len -= 1;

            if w.in_select && !w.task.try_claim_select() {
                // another case already won this task; skip the waiter.
                continue;
            }
            return Some(front);
        }
    }
}

// queue contents are only reachable under the channel lock.
unsafe impl<T: Send> Send for WaitQueue<T> {}
unsafe impl<T: Send> Sync for WaitQueue<T> {}


#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Arc<Task> {
        Arc::new(Task::new())
    }

    #[test]
    fn dequeue_is_fifo() {
        let t = task();
        let a = Waiter::<u32>::new(t.clone(), None, false);
        let b = Waiter::<u32>::new(t.clone(), None, false);
        let c = Waiter::<u32>::new(t, None, false);
        let mut q = WaitQueue::new();
        unsafe {
            q.enqueue(NonNull::from(&a));
            q.enqueue(NonNull::from(&b));
            q.enqueue(NonNull::from(&c));
            assert_eq!(q.len(), 3);
            assert_eq!(q.dequeue(), Some(NonNull::from(&a)));
            assert_eq!(q.dequeue(), Some(NonNull::from(&b)));
            assert_eq!(q.dequeue(), Some(NonNull::from(&c)));
            assert_eq!(q.dequeue(), None);
            assert_eq!(q.len(), 0);
        }
    }

    #[test]
    fn dequeue_clears_links() {
        let t = task();
        let a = Waiter::<u32>::new(t.clone(), None, false);
        let b = Waiter::<u32>::new(t, None, false);
        let mut q = WaitQueue::new();
        unsafe {
            q.enqueue(NonNull::from(&a));
            q.enqueue(NonNull::from(&b));
            q.dequeue();
        }
        assert!(!a.is_linked());
        assert!(a.to_front.get().is_none());
        assert!(a.to_back.get().is_none());
        assert!(b.is_linked());
    }

    #[test]
    fn claimed_select_waiters_are_skipped() {
        let claimed = task();
        let open = task();
        claimed.begin_select();
        open.begin_select();
        // another case already won this task
        assert!(claimed.try_claim_select());

        let a = Waiter::<u32>::new(claimed, None, true);
        let b = Waiter::<u32>::new(open, None, true);
        let mut q = WaitQueue::new();
        unsafe {
            q.enqueue(NonNull::from(&a));
            q.enqueue(NonNull::from(&b));
            // the claimed waiter is skipped and left dequeued
            assert_eq!(q.dequeue(), Some(NonNull::from(&b)));
            assert!(!a.is_linked());
            assert_eq!(q.dequeue(), None);
        }
    }

    #[test]
    fn slot_round_trips_through_the_record() {
        let w = Waiter::new(task(), Some(7u32), false);
        unsafe {
            assert_eq!(w.take_slot(), Some(7));
            assert_eq!(w.take_slot(), None);
            w.put_slot(8);
            assert_eq!(w.take_slot(), Some(8));
        }
    }
}
