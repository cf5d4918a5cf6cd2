//! Fatal wire errors.

/// Error decoding or encoding a frame.
///
/// The protocol is not self-synchronizing, so every variant is fatal:
/// the side that observes one tears the wire down, drains its pending
/// requests with `Unknown`, and sets its sticky errored flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The byte stream ended inside a header or a frame body.
    Truncated,
    /// A frame length that is not a multiple of 8, or smaller than a header.
    MisalignedLength(u16),
    /// A frame kind neither side defines.
    UnknownFrameKind(u16),
    /// A completion status byte outside the wire-legal range.
    StatusOutOfRange(u8),
    /// A frame body that cannot fit the 16-bit length field.
    FrameTooLarge(usize),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Truncated => write!(f, "truncated frame"),
            WireError::MisalignedLength(len) => write!(f, "misaligned frame length: {len}"),
            WireError::UnknownFrameKind(kind) => write!(f, "unknown frame kind: {kind}"),
            WireError::StatusOutOfRange(byte) => write!(f, "status byte out of range: {byte}"),
            WireError::FrameTooLarge(len) => write!(f, "frame too large: {len} bytes"),
        }
    }
}

impl std::error::Error for WireError {}
