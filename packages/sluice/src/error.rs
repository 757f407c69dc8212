// channel error types.

use thiserror::Error;


// ==== base error types ====


/// Error for constructing a channel whose buffer cannot be represented
///
/// Returned when `capacity * size_of::<T>()` overflows, or exceeds the
/// largest single allocation the platform supports, or when a capacity
/// accepted from a wider integer is negative or does not fit `usize`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("make: size out of range")]
pub struct SizeOutOfRangeError;

/// Error for sending into a channel that has been closed
///
/// Carries the undelivered message back to the caller. The runtime lowering
/// aborts the sending task with this error.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("send on closed channel")]
pub struct SendOnClosedError<T> {
    /// The message that could not be sent
    pub msg: T,
}

/// Error for closing a nil channel
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("close of nil channel")]
pub struct CloseOfNilError;

/// Error for closing a channel that is already closed
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("close of closed channel")]
pub struct CloseOfClosedError;


// ==== compound error types ====


macro_rules! compound_from {
    ($compound:ident {$(
        $variant:ident($inner:ty),
    )*})=>{$(
        impl From<$inner> for $compound {
            fn from(inner: $inner) -> Self {
                Self::$variant(inner)
            }
        }
    )*};
}

/// Error for the close operation as lowered over a nullable channel handle
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
pub enum CloseError {
    /// The handle was nil
    #[error(transparent)]
    Nil(CloseOfNilError),
    /// The channel was already closed
    #[error(transparent)]
    Closed(CloseOfClosedError),
}

compound_from!(CloseError {
    Nil(CloseOfNilError),
    Closed(CloseOfClosedError),
});
