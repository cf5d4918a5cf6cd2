//! The completion and error-reporting capabilities.

use calque_wire::{FenceStatus, MapStatus};

/// Opaque user value threaded through a map request to its callback.
pub type Userdata = u64;

/// Data handed to a map callback.
#[derive(Debug)]
pub enum MapData<'a> {
    /// No data: the request failed, was cancelled, or never reached the
    /// server.
    None,
    /// A successful read mapping. The slice is owned by the decode pass and
    /// valid only for the duration of the callback; the same bytes stay
    /// reachable through [`ClientBuffer::mapped_range`] until unmap.
    ///
    /// [`ClientBuffer::mapped_range`]: crate::ClientBuffer::mapped_range
    Read(&'a [u8]),
    /// A successful write mapping of `len` zero-initialized bytes. The
    /// staging region itself is reached through
    /// [`ClientBuffer::mapped_range_mut`] and belongs to the caller until
    /// unmap.
    ///
    /// [`ClientBuffer::mapped_range_mut`]: crate::ClientBuffer::mapped_range_mut
    Write { len: u64 },
}

impl<'a> MapData<'a> {
    /// The read bytes, if this is a successful read mapping.
    pub fn read_bytes(&self) -> Option<&'a [u8]> {
        match self {
            MapData::Read(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Completion callback for `map_read_async` / `map_write_async`.
///
/// `FnOnce` is load-bearing: every request resolves its callback exactly
/// once, and the registry enforces it by consuming the slot before the
/// call.
pub type MapCallback = Box<dyn FnOnce(MapStatus, MapData<'_>, Userdata) + Send>;

/// Completion callback for `ClientFence::on_completion`.
///
/// Fires `Success` once the fence's completed value reaches the waited
/// value, `Error` on synchronous validation failure, `Unknown` on release
/// or wire teardown. Exactly once, like a map callback.
pub type FenceCallback = Box<dyn FnOnce(FenceStatus, Userdata) + Send>;

/// Sink for client-side validation errors.
///
/// Installed with `Device::set_error_callback`; the userdata given there
/// accompanies every report. Validation failures that can be decided
/// without a server round trip (fence signal/wait ordering) land here.
pub type ErrorCallback = Box<dyn FnMut(&str, Userdata) + Send>;
