#![deny(unsafe_code)]

//! Server side of the calque GPU command wire.
//!
//! A [`WireServer`] re-executes decoded command frames against a [`Gpu`]
//! backend and produces completion frames for the return direction. Native
//! map completions are queued by the backend (possibly from inside the map
//! call itself) and reconciled on the wire thread: a completion whose
//! serial no longer matches the buffer's active request is dropped without
//! a frame, because an unmap arrived in between and the client has already
//! accounted for the request.
//!
//! Fence signals follow the same queue: the backend settles a
//! [`FenceDone`] when the native fence reaches its value, and the pump
//! turns it into a completed-value frame for the client.
//!
//! Released native buffers go through the [`FencedDeleter`]: release
//! returns immediately, destruction waits until the GPU has signalled past
//! the resource's last-use fence. Fences and queues are destroyed
//! directly on release.

mod deleter;
mod gpu;
mod server;

pub use deleter::FencedDeleter;
pub use gpu::{
    FenceDone, Gpu, MapDone, NativeCompletionQueue, NativeEvent, NativeFenceEvent, NativeMapEvent,
};
pub use server::WireServer;

pub use calque_wire::{
    BufferDescriptor, BufferId, BufferUsage, FenceDescriptor, FenceId, FenceStatus, MapMode,
    MapStatus, QueueId, RequestSerial, WireError,
};
