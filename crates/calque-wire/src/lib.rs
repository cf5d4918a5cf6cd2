#![deny(unsafe_code)]

//! Wire-level types for the calque GPU command wire.
//!
//! Two frame families travel over the wire: [`Command`] frames (client to
//! server) and [`Completion`] frames (server to client). Every frame is
//! self-describing — a fixed 16-byte header followed by a fixed-layout,
//! little-endian body padded to 8 bytes. The protocol is not
//! self-synchronizing: any decode failure is fatal and tears the wire down.

mod codec;
mod error;
mod frame;
mod ids;
mod types;

pub use codec::{
    encode_command, encode_completion, FrameReader, HEADER_LEN, MAX_FRAME_LEN, MAX_MAP_PAYLOAD,
};
pub use error::WireError;
pub use frame::{Command, Completion};
pub use ids::{BufferId, FenceId, QueueId, RequestSerial};
pub use types::{
    BufferDescriptor, BufferUsage, FenceDescriptor, FenceStatus, MapMode, MapStatus,
};
