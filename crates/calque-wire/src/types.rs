//! Statuses, map modes, and the buffer descriptor.

use bitflags::bitflags;

use crate::WireError;

/// Outcome of a map request, as delivered to the user callback.
///
/// `Unknown` is only ever synthesized locally on the client (cancellation,
/// release, wire teardown) and never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MapStatus {
    Success = 0,
    Error = 1,
    Unknown = 2,
}

impl MapStatus {
    /// Decode a status byte from a completion frame.
    ///
    /// Only `Success` and `Error` travel on the wire; everything else is a
    /// fatal decode error.
    pub fn from_wire(byte: u8) -> Result<Self, WireError> {
        match byte {
            0 => Ok(MapStatus::Success),
            1 => Ok(MapStatus::Error),
            other => Err(WireError::StatusOutOfRange(other)),
        }
    }

    /// The wire encoding of this status.
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for MapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapStatus::Success => write!(f, "success"),
            MapStatus::Error => write!(f, "error"),
            MapStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Direction of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    Read,
    Write,
}

/// Outcome of a fence on-completion request.
///
/// Fence completions cross the wire as plain completed-value updates, so
/// unlike [`MapStatus`] this never travels: `Success` and `Error` are
/// decided client-side or by the backend, and `Unknown` is synthesized
/// locally (release, wire teardown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FenceStatus {
    Success = 0,
    Error = 1,
    Unknown = 2,
}

impl std::fmt::Display for FenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FenceStatus::Success => write!(f, "success"),
            FenceStatus::Error => write!(f, "error"),
            FenceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

bitflags! {
    /// Declared usages of a buffer.
    ///
    /// Map requests are validated against `MAP_READ` / `MAP_WRITE` on the
    /// server; the remaining bits only matter to the backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const MAP_READ = 1 << 0;
        const MAP_WRITE = 1 << 1;
        const COPY_SRC = 1 << 2;
        const COPY_DST = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const UNIFORM = 1 << 6;
        const STORAGE = 1 << 7;
    }
}

/// Everything the server needs to create a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Size in bytes.
    pub size: u64,
    /// Declared usage mask.
    pub usage: BufferUsage,
    /// Optional debug label, carried on the wire as `{ u32 len, bytes }`.
    pub label: Option<String>,
}

impl BufferDescriptor {
    /// A descriptor with the given size and usage, no label.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            size,
            usage,
            label: None,
        }
    }
}

/// Everything the server needs to create a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FenceDescriptor {
    /// The fence's completed value at creation.
    pub initial_value: u64,
}

impl FenceDescriptor {
    pub fn new(initial_value: u64) -> Self {
        Self { initial_value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_byte() {
        assert_eq!(MapStatus::from_wire(0), Ok(MapStatus::Success));
        assert_eq!(MapStatus::from_wire(1), Ok(MapStatus::Error));
    }

    #[test]
    fn unknown_status_is_rejected_on_decode() {
        assert_eq!(
            MapStatus::from_wire(2),
            Err(WireError::StatusOutOfRange(2))
        );
        assert_eq!(
            MapStatus::from_wire(0xFF),
            Err(WireError::StatusOutOfRange(0xFF))
        );
    }
}
