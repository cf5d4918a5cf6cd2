#![deny(unsafe_code)]

//! Client side of the calque GPU command wire.
//!
//! A [`Device`] records commands against proxy handles and hands the
//! encoded bytes to the embedder; completion frames flow back in through
//! [`Device::dispatch_completions`]. Two request/completion protocols
//! live here — buffer mapping and fence waits — and both follow the same
//! shape, sketched for mapping:
//!
//! ```text
//!  user ──map_read_async──▶ ClientBuffer ──────▶ MapRequestRegistry
//!                                │                     │
//!                          MapRead frame        (id, serial) slot
//!                                │                     │
//!                                ▼                     ▼
//!                          command queue ──▶ server ──▶ completion dispatch
//!                                                      │
//!                                           take slot, then callback
//! ```
//!
//! The cardinal rule: a pending slot is **removed** from the registry
//! before its callback runs. Cancellation (`unmap`, `release`) and
//! delivery race only over slot removal, so each request resolves exactly
//! once no matter how the wire and the user interleave, and a reentrant
//! `unmap`/`release` from inside a callback finds nothing left to resolve.
//!
//! All operations are meant to run on a single wire thread; the handles are
//! `Send` so embedders can post work to that thread through a mailbox.

mod buffer;
mod callback;
mod device;
mod dispatch;
mod fence;
mod handle_table;
mod queue;
mod registry;

pub use buffer::ClientBuffer;
pub use callback::{ErrorCallback, FenceCallback, MapCallback, MapData, Userdata};
pub use device::Device;
pub use fence::ClientFence;
pub use queue::ClientQueue;

pub use calque_wire::{
    BufferDescriptor, BufferId, BufferUsage, FenceDescriptor, FenceId, FenceStatus, MapMode,
    MapStatus, QueueId, RequestSerial, WireError,
};
