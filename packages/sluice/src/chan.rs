// the channel object and the send / receive / close protocols.
//
// invariants:
//
// - at least one of the two waiter queues is empty, except transiently
//   when a multi-way select enrolls one task on both queues of the same
//   channel.
// - for buffered channels: a non-empty ring implies no parked receivers,
//   and a non-full ring implies no parked senders.
// - once closed, both queues are empty from the moment close returns, and
//   stay empty.

use crate::{
    error::{CloseOfClosedError, SendOnClosedError, SizeOutOfRangeError},
    ring::Ring,
    task,
    waitq::{WaitQueue, Waiter},
};
use smallvec::SmallVec;
use std::{
    ptr::NonNull,
    sync::{
        atomic::{
            AtomicBool, AtomicUsize,
            Ordering::{Acquire, Relaxed, Release},
        },
        Arc, Mutex,
    },
};


/// Handle to a channel
///
/// Cloning the handle clones the reference, not the channel.
pub struct Chan<T>(Arc<Shared<T>>);

// channel shared state.
struct Shared<T> {
    // buffer capacity. immutable after construction; zero means
    // unbuffered.
    capacity: usize,
    // published mirror of the ring length. written only inside locked
    // critical sections, read by the unlocked fast paths and `len`.
    count: AtomicUsize,
    // single-shot closed flag. transitions false -> true exactly once,
    // under the lock.
    closed: AtomicBool,
    // published mirrors of the waiter queue lengths, maintained in the
    // same critical sections that link and unlink waiters. these are the
    // single word-sized loads the unlocked fast paths are allowed.
    send_waiting: AtomicUsize,
    recv_waiting: AtomicUsize,
    // mutex around lockable state.
    lockable: Mutex<Lockable<T>>,
}

// channel lockable state.
struct Lockable<T> {
    // buffered elements.
    ring: Ring<T>,
    // parked send operations, FIFO.
    send_waiters: WaitQueue<T>,
    // parked receive operations, FIFO.
    recv_waiters: WaitQueue<T>,
}

/// Outcome of a non-blocking receive
#[derive(Debug, Eq, PartialEq)]
pub enum TryRecv<T> {
    /// No value was ready and the channel is not closed
    NotReady,
    /// The channel is closed and drained
    Closed,
    /// A value was received
    Value(T),
}

/// Construct a channel with the given buffer capacity (zero = unbuffered)
pub fn make<T>(capacity: usize) -> Result<Chan<T>, SizeOutOfRangeError> {
    let ring = Ring::new(capacity)?;
    trace!(capacity, "make channel");
    Ok(Chan(Arc::new(Shared {
        capacity,
        count: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        send_waiting: AtomicUsize::new(0),
        recv_waiting: AtomicUsize::new(0),
        lockable: Mutex::new(Lockable {
            ring,
            send_waiters: WaitQueue::new(),
            recv_waiters: WaitQueue::new(),
        }),
    })))
}

impl<T> Shared<T> {
    // whether a send would block: no parked receiver for unbuffered
    // channels, ring at capacity for buffered ones. a single word-sized
    // relaxed load of mutable state, so the answer is instantaneously true
    // but may be stale by the time the caller acts on it.
    fn full(&self) -> bool {
        if self.capacity == 0 {
            self.recv_waiting.load(Relaxed) == 0
        } else {
            self.count.load(Relaxed) == self.capacity
        }
    }

    // whether a receive would block: no parked sender for unbuffered
    // channels, empty ring for buffered ones. acquire pairs with the
    // release publishes inside the locked critical sections; see the
    // fast-path comment in recv_inner.
    fn empty(&self) -> bool {
        if self.capacity == 0 {
            self.send_waiting.load(Acquire) == 0
        } else {
            self.count.load(Acquire) == 0
        }
    }
}

impl<T> Chan<T> {
    /// Send a value, parking the current task until it is delivered
    ///
    /// Fails if the channel is closed, or becomes closed while the task is
    /// parked; the undelivered message rides back in the error.
    pub fn send(&self, msg: T) -> Result<(), SendOnClosedError<T>> {
        let sent = self.send_inner(msg, true)?;
        debug_assert!(sent);
        Ok(())
    }

    /// Send without blocking
    ///
    /// `Ok(false)` means the operation would have had to park. Sending to
    /// a closed channel is an error even without blocking.
    pub fn try_send(&self, msg: T) -> Result<bool, SendOnClosedError<T>> {
        self.send_inner(msg, false)
    }

    fn send_inner(&self, msg: T, blocking: bool) -> Result<bool, SendOnClosedError<T>> {
        let shared = &*self.0;

        // fast path: report a failed non-blocking send without taking the
        // lock.
        //
        // after observing the channel not closed, observe it not ready for
        // sending; each is a single word-sized load. a closed channel
        // cannot become ready for sending again, so even if it is closed
        // between the two loads there was a moment at which it was both
        // open and full, and the send reports as of that moment. relaxed
        // loads suffice for that argument.
        if !blocking && !shared.closed.load(Relaxed) && shared.full() {
            return Ok(false);
        }

        let mut lock = shared.lockable.lock().unwrap();

        if shared.closed.load(Relaxed) {
            drop(lock);
            return Err(SendOnClosedError { msg });
        }

        // a receiver is parked: hand the value straight to it, bypassing
        // the ring.
        //
        // safety: a dequeued waiter's frame stays pinned until `complete`
        // unparks its task, and the slot write happens under the lock.
        if let Some(receiver) = unsafe { lock.recv_waiters.dequeue() } {
            shared.recv_waiting.store(lock.recv_waiters.len(), Release);
            unsafe { receiver.as_ref().put_slot(msg) };
            drop(lock);
            self.complete(receiver, true);
            return Ok(true);
        }

        // room in the ring: enqueue.
        //
        // safety: not full, checked above (a zero-capacity ring is always
        // full, so unbuffered sends never land here).
        if !lock.ring.is_full() {
            unsafe { lock.ring.push(msg) };
            shared.count.store(lock.ring.len(), Release);
            drop(lock);
            return Ok(true);
        }

        if !blocking {
            drop(lock);
            return Ok(false);
        }

        // park until a receiver or close completes the operation. the
        // waiter and the message live in this frame; the channel borrows
        // them only while the waiter is linked.
        //
        // safety: park_then returns only after the waking party has
        // unlinked the waiter and unparked this task, so the frame
        // outlives the link.
        let waiter = Waiter::new(task::current(), Some(msg), false);
        unsafe { lock.send_waiters.enqueue(NonNull::from(&waiter)) };
        shared.send_waiting.store(lock.send_waiters.len(), Release);
        waiter.task().park_then(move || drop(lock));

        // woken. whoever woke us must have unlinked the waiter first.
        if waiter.is_linked() {
            panic!("channel waiter list is corrupted");
        }
        if waiter.succeeded() {
            // the receiver took the message out of the slot.
            debug_assert!(unsafe { waiter.take_slot() }.is_none());
            return Ok(true);
        }
        if !shared.closed.load(Relaxed) {
            // woken with no transfer while the channel is still open.
            panic!("spurious wakeup during channel send");
        }
        // closed while parked; the message was never taken, reclaim it.
        //
        // safety: the waiter is unlinked, so this frame owns the slot
        // again.
        let msg = unsafe { waiter.take_slot() }.expect("no message in failed send waiter");
        Err(SendOnClosedError { msg })
    }

    /// Receive a value, parking the current task until one is available
    ///
    /// `None` means the channel is closed and drained; this is a normal
    /// outcome, not an error.
    pub fn recv(&self) -> Option<T> {
        match self.recv_inner(true) {
            TryRecv::Value(v) => Some(v),
            TryRecv::Closed => None,
            TryRecv::NotReady => panic!("blocking receive returned without an event"),
        }
    }

    /// Receive without blocking
    pub fn try_recv(&self) -> TryRecv<T> {
        self.recv_inner(false)
    }

    fn recv_inner(&self, blocking: bool) -> TryRecv<T> {
        let shared = &*self.0;

        // fast path: report a failed non-blocking receive without taking
        // the lock.
        //
        // the order of loads is load-bearing: emptiness first, closed
        // second, both acquire. draining and closing happen in distinct
        // locked critical sections, so "empty then still open" proves a
        // moment at which the receive had nothing to take, and "empty,
        // closed, still empty" proves the channel is closed and drained
        // for good. a weaker ordering could see an open non-empty channel
        // close and drain, and misreport it as open and empty.
        if !blocking && shared.empty() {
            if !shared.closed.load(Acquire) {
                return TryRecv::NotReady;
            }
            if shared.empty() {
                return TryRecv::Closed;
            }
        }

        let mut lock = shared.lockable.lock().unwrap();

        if shared.closed.load(Relaxed) && lock.ring.is_empty() {
            drop(lock);
            return TryRecv::Closed;
        }

        // a sender is parked: take its value, through the ring if there is
        // one.
        //
        // safety: the sender's frame stays pinned until `complete` unparks
        // its task, and all slot access happens under the lock.
        if let Some(sender) = unsafe { lock.send_waiters.dequeue() } {
            shared.send_waiting.store(lock.send_waiters.len(), Release);
            let elem = unsafe { sender.as_ref().take_slot() }
                .expect("no message in parked send waiter");
            let value = if shared.capacity == 0 {
                // unbuffered: direct hand-off.
                elem
            } else {
                // a sender parks on a buffered channel only when the ring
                // is full: the receiver takes the oldest buffered value
                // and the sender's value takes the vacated slot, keeping
                // FIFO across ring and queue.
                //
                // safety: full, per the invariant above.
                unsafe { lock.ring.rotate(elem) }
            };
            drop(lock);
            self.complete(sender, true);
            return TryRecv::Value(value);
        }

        if !lock.ring.is_empty() {
            // safety: not empty, checked above.
            let value = unsafe { lock.ring.pop() };
            shared.count.store(lock.ring.len(), Release);
            drop(lock);
            return TryRecv::Value(value);
        }

        if !blocking {
            drop(lock);
            return TryRecv::NotReady;
        }

        // park until a sender or close completes the operation.
        //
        // safety: as in send_inner, the frame outlives the link.
        let waiter = Waiter::new(task::current(), None, false);
        unsafe { lock.recv_waiters.enqueue(NonNull::from(&waiter)) };
        shared.recv_waiting.store(lock.recv_waiters.len(), Release);
        waiter.task().park_then(move || drop(lock));

        // woken. whoever woke us must have unlinked the waiter first.
        if waiter.is_linked() {
            panic!("channel waiter list is corrupted");
        }
        if waiter.succeeded() {
            // safety: the waiter is unlinked, so this frame owns the slot
            // again.
            let value = unsafe { waiter.take_slot() }.expect("no message in woken receive waiter");
            TryRecv::Value(value)
        } else {
            // woken by close; the slot was never filled, which is the
            // zero-value outcome.
            debug_assert!(shared.closed.load(Relaxed));
            TryRecv::Closed
        }
    }

    /// Close the channel
    ///
    /// Parked receivers are woken to observe the closed outcome; parked
    /// senders are woken to fail with [`SendOnClosedError`]. Closing an
    /// already-closed channel is an error.
    pub fn close(&self) -> Result<(), CloseOfClosedError> {
        let shared = &*self.0;
        let mut lock = shared.lockable.lock().unwrap();

        if shared.closed.load(Relaxed) {
            drop(lock);
            return Err(CloseOfClosedError);
        }
        shared.closed.store(true, Release);
        trace!("close channel");

        // unlink every parked operation while the lock is held, then wake
        // them all only after it is released, so a wake-up can never
        // observe intermediate state.
        //
        // safety: every collected frame stays pinned until its task is
        // unparked in the loop below.
        let mut wake = SmallVec::<[NonNull<Waiter<T>>; 8]>::new();
        // receivers are left with an empty slot, which they report as the
        // zero-value outcome.
        while let Some(w) = unsafe { lock.recv_waiters.dequeue() } {
            wake.push(w);
        }
        shared.recv_waiting.store(0, Release);
        // senders keep their message in the slot; each reclaims it into
        // the error it fails with.
        while let Some(w) = unsafe { lock.send_waiters.dequeue() } {
            wake.push(w);
        }
        shared.send_waiting.store(0, Release);
        drop(lock);

        for w in wake {
            self.complete(w, false);
        }
        Ok(())
    }

    /// Number of buffered elements
    ///
    /// A snapshot; it may be stale by the time the caller reads it.
    pub fn len(&self) -> usize {
        self.0.count.load(Relaxed)
    }

    /// Buffer capacity; zero for unbuffered channels
    pub fn capacity(&self) -> usize {
        self.0.capacity
    }

    // finish waking a dequeued waiter: publish the outcome, then mark its
    // task runnable. the channel lock must already be released.
    fn complete(&self, waiter: NonNull<Waiter<T>>, success: bool) {
        // safety: the owning task is still parked (it can only resume via
        // the unpark below), so the frame holding the waiter is pinned.
        // the waiter must not be touched after unpark: that is the moment
        // the owning frame may resume and unwind, so the task handle is
        // cloned out first.
        let task = unsafe { waiter.as_ref().task().clone() };
        unsafe { waiter.as_ref().set_success(success) };
        task.unpark();
    }

    #[cfg(test)]
    pub(crate) fn debug_ring_state(&self) -> (usize, usize, usize) {
        let lock = self.0.lockable.lock().unwrap();
        let (sendx, recvx) = lock.ring.indices();
        (lock.ring.len(), sendx, recvx)
    }
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Chan(Arc::clone(&self.0))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[allow(dead_code)]
    #[allow(unreachable_code)]
    fn ensure_chan_is_send_sync() -> impl Send + Sync {
        panic!();
        make::<Vec<u8>>(1).unwrap()
    }

    #[test]
    fn fresh_channel_is_open_and_empty() {
        let ch = make::<u8>(4).unwrap();
        assert_eq!(ch.len(), 0);
        assert_eq!(ch.capacity(), 4);
        assert_eq!(ch.debug_ring_state(), (0, 0, 0));
    }

    #[test]
    fn unbuffered_handoff() {
        let ch = make::<i32>(0).unwrap();
        let tx = ch.clone();
        let sender = thread::spawn(move || tx.send(42).unwrap());
        assert_eq!(ch.recv(), Some(42));
        sender.join().unwrap();
    }

    #[test]
    fn buffered_fifo_and_wraparound() {
        let ch = make::<i32>(2).unwrap();
        ch.send(1).unwrap();
        ch.send(2).unwrap();
        assert_eq!(ch.recv(), Some(1));
        assert_eq!(ch.recv(), Some(2));
        assert_eq!(ch.len(), 0);
        // both indices wrapped back to the start
        assert_eq!(ch.debug_ring_state(), (0, 0, 0));
    }

    #[test]
    fn nonblocking_send_full_then_after_drain() {
        let ch = make::<i32>(1).unwrap();
        ch.send(7).unwrap();
        assert!(!ch.try_send(8).unwrap());
        assert_eq!(ch.recv(), Some(7));
        assert!(ch.try_send(8).unwrap());
    }

    #[test]
    fn nonblocking_recv_on_closed_unbuffered() {
        let ch = make::<i32>(0).unwrap();
        ch.close().unwrap();
        assert_eq!(ch.try_recv(), TryRecv::Closed);
    }

    #[test]
    fn close_drains_buffer_before_reporting_closed() {
        let ch = make::<i32>(1).unwrap();
        ch.send(99).unwrap();
        ch.close().unwrap();
        assert_eq!(ch.recv(), Some(99));
        assert_eq!(ch.recv(), None);
    }

    #[test]
    fn concurrent_senders_deliver_every_value_exactly_once() {
        const N: usize = 16;
        let ch = make::<usize>(0).unwrap();
        let senders: Vec<_> = (0..N)
            .map(|i| {
                let tx = ch.clone();
                thread::spawn(move || tx.send(i).unwrap())
            })
            .collect();
        let mut seen = vec![false; N];
        for _ in 0..N {
            let v = ch.recv().unwrap();
            assert!(!seen[v], "value {v} delivered twice");
            seen[v] = true;
        }
        for sender in senders {
            sender.join().unwrap();
        }
        assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn single_producer_single_consumer_preserves_order() {
        let ch = make::<u32>(4).unwrap();
        let tx = ch.clone();
        let producer = thread::spawn(move || {
            for i in 0..1000 {
                tx.send(i).unwrap();
            }
        });
        for i in 0..1000 {
            assert_eq!(ch.recv(), Some(i));
        }
        producer.join().unwrap();
    }

    #[test]
    fn close_wakes_parked_sender_with_its_message() {
        let ch = make::<String>(0).unwrap();
        let tx = ch.clone();
        let sender = thread::spawn(move || tx.send(String::from("undelivered")));
        // give the sender a chance to park first; the outcome is the same
        // either way.
        thread::sleep(Duration::from_millis(50));
        ch.close().unwrap();
        let err = sender.join().unwrap().unwrap_err();
        assert_eq!(err.msg, "undelivered");
    }

    #[test]
    fn close_wakes_parked_receiver_with_closed_outcome() {
        let ch = make::<i32>(0).unwrap();
        let rx = ch.clone();
        let receiver = thread::spawn(move || rx.recv());
        thread::sleep(Duration::from_millis(50));
        ch.close().unwrap();
        assert_eq!(receiver.join().unwrap(), None);
    }

    #[test]
    fn send_on_closed_reports_error_and_returns_message() {
        let ch = make::<i32>(1).unwrap();
        ch.close().unwrap();
        assert_eq!(ch.send(5).unwrap_err().msg, 5);
        assert_eq!(ch.try_send(6).unwrap_err().msg, 6);
    }

    #[test]
    fn close_of_closed_is_an_error() {
        let ch = make::<i32>(0).unwrap();
        ch.close().unwrap();
        assert_eq!(ch.close(), Err(CloseOfClosedError));
    }

    #[test]
    fn parked_sender_value_rotates_through_full_buffer() {
        let ch = make::<i32>(1).unwrap();
        ch.send(1).unwrap();
        let tx = ch.clone();
        let sender = thread::spawn(move || tx.send(2).unwrap());
        thread::sleep(Duration::from_millis(50));
        // the parked sender's value must land behind the buffered one
        assert_eq!(ch.recv(), Some(1));
        sender.join().unwrap();
        assert_eq!(ch.recv(), Some(2));
        assert_eq!(ch.len(), 0);
    }

    #[test]
    fn nonblocking_ops_on_an_open_idle_channel() {
        let ch = make::<i32>(0).unwrap();
        assert_eq!(ch.try_recv(), TryRecv::NotReady);
        // unbuffered with no parked receiver: nothing to hand off to
        assert!(!ch.try_send(1).unwrap());
    }

    #[test]
    fn nonblocking_send_reaches_a_parked_receiver() {
        let ch = make::<i32>(0).unwrap();
        let rx = ch.clone();
        let receiver = thread::spawn(move || rx.recv());
        // retry until the receiver is observably parked
        while !ch.try_send(11).unwrap() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(receiver.join().unwrap(), Some(11));
    }

    #[test]
    fn length_is_bounded_by_capacity() {
        let ch = make::<u8>(3).unwrap();
        for i in 0..3 {
            ch.send(i).unwrap();
        }
        assert!(!ch.try_send(9).unwrap());
        assert_eq!(ch.len(), 3);
        assert!(ch.len() <= ch.capacity());
        assert_eq!(ch.recv(), Some(0));
        assert_eq!(ch.len(), 2);
    }

    #[test]
    fn dropping_a_channel_drops_buffered_values() {
        let payload = Arc::new(());
        let ch = make::<Arc<()>>(2).unwrap();
        ch.send(payload.clone()).unwrap();
        ch.send(payload.clone()).unwrap();
        assert_eq!(Arc::strong_count(&payload), 3);
        drop(ch);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn zero_sized_elements_move_through_both_shapes() {
        let buffered = make::<()>(2).unwrap();
        buffered.send(()).unwrap();
        assert_eq!(buffered.recv(), Some(()));

        let unbuffered = make::<()>(0).unwrap();
        let tx = unbuffered.clone();
        let sender = thread::spawn(move || tx.send(()).unwrap());
        assert_eq!(unbuffered.recv(), Some(()));
        sender.join().unwrap();
    }
}
