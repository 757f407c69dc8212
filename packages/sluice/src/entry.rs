// entry points the code generator lowers channel expressions onto.
//
// every operation takes `Option<&Chan<T>>`; `None` is the nil channel.
// blocking operations on nil park the task forever by contract (a
// multi-way select disables branches this way), non-blocking ones report
// "not ready", close of nil is an error, and length and capacity of nil
// are zero. the lowerings that must materialize the element type's zero
// value carry a `Default` bound; every compiler-lowered element type has
// one.

use crate::{
    chan::{make, Chan, TryRecv},
    error::{CloseError, CloseOfNilError, SendOnClosedError, SizeOutOfRangeError},
    task,
};

/// Lowering of `ch <- v`
///
/// May park the current task. Fails once the channel is closed, with the
/// undelivered message in the error.
pub fn send_blocking<T>(ch: Option<&Chan<T>>, msg: T) -> Result<(), SendOnClosedError<T>> {
    match ch {
        Some(ch) => ch.send(msg),
        None => task::current().park_forever(),
    }
}

/// Lowering of the send arm of a single-case select with a `default`
/// branch
///
/// `Ok(false)` means the default branch runs.
pub fn send_nonblocking<T>(ch: Option<&Chan<T>>, msg: T) -> Result<bool, SendOnClosedError<T>> {
    match ch {
        Some(ch) => ch.try_send(msg),
        None => Ok(false),
    }
}

/// Lowering of `<-ch` and `dst = <-ch`
///
/// Returns the received value, or the zero value once the channel is
/// closed and drained.
pub fn recv_blocking<T: Default>(ch: Option<&Chan<T>>) -> T {
    recv_value_blocking(ch).0
}

/// Lowering of `dst, ok = <-ch`
///
/// The flag is false exactly when the value is the zero value delivered
/// because the channel is closed and drained.
pub fn recv_value_blocking<T: Default>(ch: Option<&Chan<T>>) -> (T, bool) {
    match ch {
        Some(ch) => match ch.recv() {
            Some(v) => (v, true),
            None => (T::default(), false),
        },
        None => task::current().park_forever(),
    }
}

/// Lowering of the receive arm of a single-case select with a `default`
/// branch: `(selected, received, value)`
///
/// `selected` is true iff a channel event was consumed; `received` is true
/// iff the value is a real transfer rather than the zero value of a closed
/// channel.
pub fn recv_nonblocking<T: Default>(ch: Option<&Chan<T>>) -> (bool, bool, T) {
    match ch {
        Some(ch) => match ch.try_recv() {
            TryRecv::Value(v) => (true, true, v),
            TryRecv::Closed => (true, false, T::default()),
            TryRecv::NotReady => (false, false, T::default()),
        },
        None => (false, false, T::default()),
    }
}

/// Lowering of `close(ch)`
pub fn close_chan<T>(ch: Option<&Chan<T>>) -> Result<(), CloseError> {
    match ch {
        Some(ch) => ch.close().map_err(CloseError::from),
        None => Err(CloseOfNilError.into()),
    }
}

/// Lowering of `len(ch)`
pub fn chan_len<T>(ch: Option<&Chan<T>>) -> usize {
    ch.map(Chan::len).unwrap_or(0)
}

/// Lowering of `cap(ch)`
pub fn chan_cap<T>(ch: Option<&Chan<T>>) -> usize {
    ch.map(Chan::capacity).unwrap_or(0)
}

/// Construction from a wider integer, as lowered for 64-bit capacity
/// expressions on narrower targets
///
/// Negative capacities and capacities that do not fit `usize` are
/// rejected.
pub fn make_i64<T>(capacity: i64) -> Result<Chan<T>, SizeOutOfRangeError> {
    let capacity = usize::try_from(capacity).map_err(|_| SizeOutOfRangeError)?;
    make(capacity)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_channel_nonblocking_operations_report_nothing() {
        assert!(!send_nonblocking::<i32>(None, 1).unwrap());
        assert_eq!(recv_nonblocking::<i32>(None), (false, false, 0));
        assert_eq!(chan_len::<i32>(None), 0);
        assert_eq!(chan_cap::<i32>(None), 0);
    }

    #[test]
    fn close_of_nil_is_an_error() {
        assert_eq!(close_chan::<i32>(None), Err(CloseError::Nil(CloseOfNilError)));
    }

    #[test]
    fn recv_lowerings_materialize_the_zero_value_on_close() {
        let ch = make::<i32>(1).unwrap();
        ch.send(99).unwrap();
        ch.close().unwrap();
        assert_eq!(recv_value_blocking(Some(&ch)), (99, true));
        assert_eq!(recv_value_blocking(Some(&ch)), (0, false));
        assert_eq!(recv_nonblocking(Some(&ch)), (true, false, 0));
    }

    #[test]
    fn recv_blocking_collapses_the_flag() {
        let ch = make::<u64>(1).unwrap();
        ch.send(7).unwrap();
        assert_eq!(recv_blocking(Some(&ch)), 7);
        ch.close().unwrap();
        assert_eq!(recv_blocking(Some(&ch)), 0);
    }

    #[test]
    fn nonblocking_lowerings_round_trip_through_a_channel() {
        let ch = make::<i32>(1).unwrap();
        assert!(send_nonblocking(Some(&ch), 5).unwrap());
        assert!(!send_nonblocking(Some(&ch), 6).unwrap());
        assert_eq!(recv_nonblocking(Some(&ch)), (true, true, 5));
        assert_eq!(recv_nonblocking(Some(&ch)), (false, false, 0));
        assert_eq!(chan_len(Some(&ch)), 0);
        assert_eq!(chan_cap(Some(&ch)), 1);
    }

    #[test]
    fn wider_integer_construction_rejects_bad_capacities() {
        assert!(make_i64::<i32>(-1).is_err());
        assert!(make_i64::<u64>(i64::MAX).is_err());
        let ch = make_i64::<i32>(2).unwrap();
        assert_eq!(ch.capacity(), 2);
    }
}
