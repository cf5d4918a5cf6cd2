//! The two frame families.
//!
//! Kind values are wire-significant and disjoint per direction; direction
//! itself disambiguates the families.

use crate::{BufferDescriptor, BufferId, FenceId, MapStatus, QueueId, RequestSerial};

pub(crate) mod command_kind {
    pub const CREATE_BUFFER: u16 = 1;
    pub const MAP_READ: u16 = 2;
    pub const MAP_WRITE: u16 = 3;
    pub const UNMAP: u16 = 4;
    pub const RELEASE: u16 = 5;
    pub const CREATE_QUEUE: u16 = 6;
    pub const CREATE_FENCE: u16 = 7;
    pub const QUEUE_SIGNAL: u16 = 8;
    pub const FENCE_RELEASE: u16 = 9;
    pub const QUEUE_RELEASE: u16 = 10;
}

pub(crate) mod completion_kind {
    pub const MAP_READ: u16 = 1;
    pub const MAP_WRITE: u16 = 2;
    pub const RELEASE_ACK: u16 = 3;
    pub const FENCE_COMPLETED_VALUE: u16 = 4;
}

/// A client-to-server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a buffer under a client-allocated id.
    CreateBuffer {
        id: BufferId,
        desc: BufferDescriptor,
    },
    /// Ask for an asynchronous read mapping of `[offset, offset + size)`.
    MapRead {
        id: BufferId,
        serial: RequestSerial,
        offset: u64,
        size: u64,
    },
    /// Ask for an asynchronous write mapping of `[offset, offset + size)`.
    MapWrite {
        id: BufferId,
        serial: RequestSerial,
        offset: u64,
        size: u64,
    },
    /// Unmap the buffer. For a write mapping the staging region's final
    /// bytes travel in the body and are written back before the native
    /// unmap.
    Unmap {
        id: BufferId,
        write_payload: Option<Vec<u8>>,
    },
    /// Drop the server buffer. Acknowledged with `Completion::ReleaseAck`.
    Release { id: BufferId },
    /// Create a queue under a client-allocated id.
    CreateQueue { id: QueueId },
    /// Create a fence with the given initial completed value.
    CreateFence { id: FenceId, initial_value: u64 },
    /// Signal a fence to `value` on a queue. The server answers with
    /// `Completion::FenceCompletedValue` once the native fence gets there.
    QueueSignal {
        queue: QueueId,
        fence: FenceId,
        value: u64,
    },
    /// Drop the server fence. Acknowledged with `Completion::ReleaseAck`.
    FenceRelease { id: FenceId },
    /// Drop the server queue. Acknowledged with `Completion::ReleaseAck`.
    QueueRelease { id: QueueId },
}

/// A server-to-client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Outcome of a read map request. `payload` is empty unless `status`
    /// is `Success`, in which case it holds exactly the mapped bytes.
    MapRead {
        id: BufferId,
        serial: RequestSerial,
        status: MapStatus,
        payload: Vec<u8>,
    },
    /// Outcome of a write map request. The client already owns the zeroed
    /// staging region, so no bytes travel.
    MapWrite {
        id: BufferId,
        serial: RequestSerial,
        status: MapStatus,
    },
    /// The server has dropped an object of any type; the client may reuse
    /// the handle table slot.
    ReleaseAck { id: u64 },
    /// The native fence reached `value`; the client updates its completed
    /// value and resolves satisfied on-completion requests.
    FenceCompletedValue { fence: FenceId, value: u64 },
}
