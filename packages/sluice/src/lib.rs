#![allow(unsafe_op_in_unsafe_fn)]

// implementation of the runtime channel core.
//
// a channel is the synchronization primitive tasks of the cooperative
// runtime use to move typed values between each other. the basic
// architecture is as such:
//
// channel handles wrap around Arc<shared state>
//                                    |
//          /-------------------------/
//          v
//       shared state
//          |
//          |------ it contains a few atomics (closed flag, buffered count,
//          |       waiter counts) published from inside locked critical
//          |       sections. these are the only mutable state the unlocked
//          |       fast paths are allowed to read.
//          |
//          \------ it contains a mutex around the lockable state:
//                     |
//                     |------ a ring::Ring<T>, the fixed circular buffer
//                     |       holding up to `capacity` elements
//                     |
//                     |------ a "send waiter queue": a linked FIFO of
//                     |       records, each corresponding to one parked
//                     |       send operation. the record lives in the
//                     |       parked operation's stack frame; the queue
//                     |       borrows it through a pointer that is only
//                     |       dereferenced under the mutex or while the
//                     |       owning task is provably still parked.
//                     |
//                     \------ a "recv waiter queue", the same idea for
//                             parked receive operations.
//
// blocking is built on the task module's parker: a parked operation is
// resumed by whichever side (a counterparty operation or close) dequeues
// its waiter, publishes the outcome, and unparks its task.
//
// the organization of these modules is as such:
//
//      These are used like
//      library utilities:
//    /--------------------\
//
//      ring <-----------------chan: the channel object and the send /
//                   |               receive / close protocols. panicky on
//      waitq <------|               internal contract violations, defensive
//                   |               about everything a caller can do.
//      task <-------|
//                   |
//                   \---------entry: the operations the code generator
//                                    lowers channel expressions onto,
//                                    including nil-channel semantics.
//
// there is also the error module, which contains the relevant error types.

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod chan;
mod ring;
mod waitq;

pub mod entry;
pub mod error;
pub mod task;

pub use crate::chan::{make, Chan, TryRecv};
