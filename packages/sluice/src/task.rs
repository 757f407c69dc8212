// the park/wake seam between channels and the scheduler.
//
// the channel core relies on exactly three scheduler capabilities: obtain a
// handle to the currently running task, park that task with a deferred
// unlock of the channel mutex, and mark a parked task runnable again. a
// task parks through a small state machine (mutex + condvar) that makes
// wake-ups sticky: an unpark that lands before the task finishes parking
// is not lost, and a parked task resumes only on a real unpark, never on a
// bare condvar wakeup.

use std::sync::{
    atomic::{
        AtomicBool,
        Ordering::{AcqRel, Acquire, Relaxed},
    },
    Arc, Condvar, Mutex,
};


// park state of a task.
enum ParkState {
    // running, no pending notification.
    Empty,
    // an unpark arrived while the task was not waiting; the next park
    // consumes it and returns immediately.
    Notified,
    // the task is blocked in `park_then`, waiting to be notified.
    Waiting,
}

/// Handle to a task as known to the channel core
pub struct Task {
    state: Mutex<ParkState>,
    cond: Condvar,
    // select claim. a waiter enrolled by a multi-way select can be woken
    // through any participating channel; the first waking party to flip
    // this flag wins the task and the rest skip the waiter.
    select_claimed: AtomicBool,
}

thread_local! {
    static CURRENT: Arc<Task> = Arc::new(Task::new());
}

/// Handle to the task running on the current thread
pub fn current() -> Arc<Task> {
    CURRENT.with(Arc::clone)
}

impl Task {
    pub(crate) fn new() -> Self {
        Task {
            state: Mutex::new(ParkState::Empty),
            cond: Condvar::new(),
            select_claimed: AtomicBool::new(false),
        }
    }

    // park the current task.
    //
    // `commit` runs after the task is recorded as waiting and before the
    // task actually blocks; the channel passes the closure that releases
    // its lock. a waking party can only find the waiter once that lock is
    // released, at which point the park is already committed, so `unpark`
    // cannot observe a running task. returns once `unpark` has been
    // called.
    pub(crate) fn park_then(&self, commit: impl FnOnce()) {
        let mut state = self.state.lock().unwrap();
        if let ParkState::Notified = *state {
            // a wake-up already arrived; consume it and do not block.
            *state = ParkState::Empty;
            drop(state);
            commit();
            return;
        }
        debug_assert!(matches!(*state, ParkState::Empty));
        *state = ParkState::Waiting;
        commit();
        while let ParkState::Waiting = *state {
            state = self.cond.wait(state).unwrap();
        }
        debug_assert!(matches!(*state, ParkState::Notified));
        *state = ParkState::Empty;
    }

    // mark a parked task runnable. must not be called while holding a
    // channel lock.
    pub(crate) fn unpark(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            ParkState::Notified => (),
            ParkState::Empty => *state = ParkState::Notified,
            ParkState::Waiting => {
                *state = ParkState::Notified;
                self.cond.notify_one();
            }
        }
    }

    // park with no one holding a way to wake us. blocking operations on a
    // nil channel deadlock by contract (a multi-way select disables
    // branches this way); this must not be rewritten as an error.
    pub(crate) fn park_forever(&self) -> ! {
        trace!("parking forever on nil channel");
        let mut state = self.state.lock().unwrap();
        loop {
            *state = ParkState::Waiting;
            while let ParkState::Waiting = *state {
                state = self.cond.wait(state).unwrap();
            }
        }
    }

    /// Enroll the task in a new multi-way select, clearing any previous
    /// claim
    pub fn begin_select(&self) {
        self.select_claimed.store(false, Relaxed);
    }

    /// Race to claim a select-enrolled task
    ///
    /// The first caller since [`begin_select`](Self::begin_select) wins. A
    /// waking party that loses the race skips the task's waiter.
    pub fn try_claim_select(&self) -> bool {
        self.select_claimed
            .compare_exchange(false, true, AcqRel, Acquire)
            .is_ok()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicBool, Ordering::SeqCst},
        thread,
        time::Duration,
    };

    #[test]
    fn unpark_before_park_is_not_lost() {
        let task = Task::new();
        task.unpark();
        let mut committed = false;
        task.park_then(|| committed = true);
        assert!(committed);
    }

    #[test]
    fn park_blocks_until_unpark() {
        let task = Arc::new(Task::new());
        let committed = Arc::new(AtomicBool::new(false));
        let handle = {
            let task = Arc::clone(&task);
            let committed = Arc::clone(&committed);
            thread::spawn(move || task.park_then(|| committed.store(true, SeqCst)))
        };
        // the commit runs before the task blocks
        while !committed.load(SeqCst) {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        task.unpark();
        handle.join().unwrap();
    }

    #[test]
    fn select_claim_is_won_exactly_once_per_enrollment() {
        let task = Task::new();
        task.begin_select();
        assert!(task.try_claim_select());
        assert!(!task.try_claim_select());
        task.begin_select();
        assert!(task.try_claim_select());
    }

    #[test]
    fn current_is_stable_within_a_thread() {
        let a = current();
        let b = current();
        assert!(Arc::ptr_eq(&a, &b));
        let other = thread::spawn(current).join().unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
