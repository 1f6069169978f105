//! The unified error code space shared by the queue, the facades and the wire
//! protocol.
//!
//! Every fallible operation in this crate returns [`SurfaceError`]. The same
//! code space travels across the IPC boundary as a little-endian `i32`, `0`
//! meaning success, so the producer proxy can reconstruct the server-side
//! error without a side channel.

/// Errors surfaced by the buffer queue and its facades.
///
/// The variants are grouped the way callers are expected to react to them:
/// validation errors are never retried, `NoBuffer` may be retried after the
/// producer's timeout, peer-absence errors trigger the proxy's self-heal
/// path, and protocol-state errors indicate a caller bug.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// A malformed request or flush config, or an out-of-range parameter.
    #[error("invalid arguments")]
    InvalidArguments,
    /// No free slot became available before the request timeout elapsed.
    #[error("no buffer available")]
    NoBuffer,
    /// Dirty buffers exist but none is due for presentation yet.
    #[error("no buffer ready for the expected present time")]
    NoBufferReady,
    /// No consumer listener is registered on the queue.
    #[error("no consumer is listening")]
    NoConsumer,
    /// The referenced sequence number is not in the cache.
    #[error("no such entry")]
    NoEntry,
    /// A bound was exceeded (queue size, user data count, attach timeout).
    #[error("out of range")]
    OutOfRange,
    /// The operation is incompatible with the slot's current state.
    #[error("buffer state invalid")]
    BufferStateInvalid,
    /// The buffer is already present in the slot cache.
    #[error("buffer is already in the cache")]
    BufferIsInCache,
    /// The buffer is not present in the slot cache.
    #[error("buffer is not in the cache")]
    BufferNotInCache,
    /// The slot cache is full and cannot take another buffer.
    #[error("buffer queue is full")]
    BufferQueueFull,
    /// The consumer died or the strict-disconnect latch is engaged.
    #[error("consumer is disconnected")]
    ConsumerDisconnected,
    /// A second consumer tried to connect.
    #[error("a consumer is already connected")]
    ConsumerIsConnected,
    /// The call came from a pid other than the connected producer.
    #[error("operation not permitted for this caller")]
    InvalidOperating,
    /// The IPC transport failed (parcel overflow, dead remote).
    #[error("ipc transport failure")]
    Binder,
    /// A queue-internal invariant was violated.
    #[error("internal error")]
    Internal,
    /// The display-buffer HAL rejected the call; carries the translated errno.
    #[error("hal call failed (errno {errno})")]
    ApiFailed {
        /// Errno-style detail translated from the HAL error code, see
        /// [`crate::buffer::HalError::errno`].
        errno: i32,
    },
    /// The operation is not wired on this side of the IPC boundary.
    #[error("not supported")]
    NotSupport,
    /// A lazily-initialized collaborator is not available yet.
    #[error("not initialized")]
    NotInit,
    /// A typed lookup (extra data, present timestamp) found another type.
    #[error("type mismatch")]
    TypeError,
    /// The proxy and the server disagree about the slot cache contents.
    #[error("unknown error")]
    Unknown,
}

/// `Result` alias used throughout the crate.
pub type SurfaceResult<T> = Result<T, SurfaceError>;

// Wire codes. Grouped in blocks of 1000 like the original error space so a
// code is recognizable in a log line without a lookup table.
const CODE_INVALID_ARGUMENTS: i32 = 40_001_000;
const CODE_NO_BUFFER: i32 = 40_002_000;
const CODE_NO_BUFFER_READY: i32 = 40_002_100;
const CODE_NO_CONSUMER: i32 = 40_003_000;
const CODE_NO_ENTRY: i32 = 40_004_000;
const CODE_OUT_OF_RANGE: i32 = 40_005_000;
const CODE_BUFFER_STATE_INVALID: i32 = 40_006_000;
const CODE_BUFFER_IS_INCACHE: i32 = 40_006_100;
const CODE_BUFFER_NOT_INCACHE: i32 = 40_006_200;
const CODE_BUFFER_QUEUE_FULL: i32 = 40_006_300;
const CODE_CONSUMER_DISCONNECTED: i32 = 40_007_000;
const CODE_CONSUMER_IS_CONNECTED: i32 = 40_007_100;
const CODE_INVALID_OPERATING: i32 = 40_008_000;
const CODE_BINDER: i32 = 50_001_000;
const CODE_INTERNAL: i32 = 50_002_000;
const CODE_API_FAILED: i32 = 50_003_000;
const CODE_NOT_SUPPORT: i32 = 50_004_000;
const CODE_NOT_INIT: i32 = 50_005_000;
const CODE_TYPE_ERROR: i32 = 50_006_000;
const CODE_UNKNOWN: i32 = 50_007_000;

// ApiFailed composites an errno into its code block; keep it below the next
// block so decoding stays unambiguous.
const API_FAILED_ERRNO_SPAN: i32 = 1000;

impl SurfaceError {
    /// The `i32` written as the first field of every reply parcel.
    pub fn code(&self) -> i32 {
        match self {
            SurfaceError::InvalidArguments => CODE_INVALID_ARGUMENTS,
            SurfaceError::NoBuffer => CODE_NO_BUFFER,
            SurfaceError::NoBufferReady => CODE_NO_BUFFER_READY,
            SurfaceError::NoConsumer => CODE_NO_CONSUMER,
            SurfaceError::NoEntry => CODE_NO_ENTRY,
            SurfaceError::OutOfRange => CODE_OUT_OF_RANGE,
            SurfaceError::BufferStateInvalid => CODE_BUFFER_STATE_INVALID,
            SurfaceError::BufferIsInCache => CODE_BUFFER_IS_INCACHE,
            SurfaceError::BufferNotInCache => CODE_BUFFER_NOT_INCACHE,
            SurfaceError::BufferQueueFull => CODE_BUFFER_QUEUE_FULL,
            SurfaceError::ConsumerDisconnected => CODE_CONSUMER_DISCONNECTED,
            SurfaceError::ConsumerIsConnected => CODE_CONSUMER_IS_CONNECTED,
            SurfaceError::InvalidOperating => CODE_INVALID_OPERATING,
            SurfaceError::Binder => CODE_BINDER,
            SurfaceError::Internal => CODE_INTERNAL,
            SurfaceError::ApiFailed { errno } => {
                CODE_API_FAILED + (*errno).clamp(0, API_FAILED_ERRNO_SPAN - 1)
            }
            SurfaceError::NotSupport => CODE_NOT_SUPPORT,
            SurfaceError::NotInit => CODE_NOT_INIT,
            SurfaceError::TypeError => CODE_TYPE_ERROR,
            SurfaceError::Unknown => CODE_UNKNOWN,
        }
    }

    /// Reconstructs an error from a wire code. `0` is not an error and maps
    /// to `None`; unrecognized codes decode as [`SurfaceError::Unknown`].
    pub fn from_code(code: i32) -> Option<SurfaceError> {
        if code == 0 {
            return None;
        }
        Some(match code {
            CODE_INVALID_ARGUMENTS => SurfaceError::InvalidArguments,
            CODE_NO_BUFFER => SurfaceError::NoBuffer,
            CODE_NO_BUFFER_READY => SurfaceError::NoBufferReady,
            CODE_NO_CONSUMER => SurfaceError::NoConsumer,
            CODE_NO_ENTRY => SurfaceError::NoEntry,
            CODE_OUT_OF_RANGE => SurfaceError::OutOfRange,
            CODE_BUFFER_STATE_INVALID => SurfaceError::BufferStateInvalid,
            CODE_BUFFER_IS_INCACHE => SurfaceError::BufferIsInCache,
            CODE_BUFFER_NOT_INCACHE => SurfaceError::BufferNotInCache,
            CODE_BUFFER_QUEUE_FULL => SurfaceError::BufferQueueFull,
            CODE_CONSUMER_DISCONNECTED => SurfaceError::ConsumerDisconnected,
            CODE_CONSUMER_IS_CONNECTED => SurfaceError::ConsumerIsConnected,
            CODE_INVALID_OPERATING => SurfaceError::InvalidOperating,
            CODE_BINDER => SurfaceError::Binder,
            CODE_INTERNAL => SurfaceError::Internal,
            CODE_NOT_SUPPORT => SurfaceError::NotSupport,
            CODE_NOT_INIT => SurfaceError::NotInit,
            CODE_TYPE_ERROR => SurfaceError::TypeError,
            c if (CODE_API_FAILED..CODE_API_FAILED + API_FAILED_ERRNO_SPAN).contains(&c) => {
                SurfaceError::ApiFailed { errno: c - CODE_API_FAILED }
            }
            _ => SurfaceError::Unknown,
        })
    }

    /// Encodes a whole `Result` the way reply parcels carry it.
    pub fn result_code(result: &SurfaceResult<()>) -> i32 {
        match result {
            Ok(()) => 0,
            Err(e) => e.code(),
        }
    }
}
