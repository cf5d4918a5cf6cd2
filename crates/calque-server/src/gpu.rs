//! The backend seam.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use calque_wire::{BufferDescriptor, BufferId, FenceId, FenceStatus, MapMode, MapStatus, RequestSerial};

/// A settled native map, queued by the backend.
#[derive(Debug)]
pub struct NativeMapEvent {
    pub id: BufferId,
    pub serial: RequestSerial,
    pub mode: MapMode,
    pub status: MapStatus,
    /// Mapped bytes for a successful read; empty otherwise.
    pub bytes: Vec<u8>,
}

/// A native fence that reached a signaled value, queued by the backend.
#[derive(Debug)]
pub struct NativeFenceEvent {
    pub id: FenceId,
    pub value: u64,
    pub status: FenceStatus,
}

/// Anything the backend can settle asynchronously.
#[derive(Debug)]
pub enum NativeEvent {
    Map(NativeMapEvent),
    Fence(NativeFenceEvent),
}

/// Queue of settled native work, drained on the wire thread.
///
/// The backend may settle from inside the originating call or long after
/// it returned; either way the event lands here and is reconciled against
/// current object state during the next pump.
#[derive(Clone, Default)]
pub struct NativeCompletionQueue {
    inner: Arc<Mutex<VecDeque<NativeEvent>>>,
}

impl NativeCompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: NativeEvent) {
        self.inner.lock().push_back(event);
    }

    pub(crate) fn drain(&self) -> Vec<NativeEvent> {
        self.inner.lock().drain(..).collect()
    }
}

/// One-shot completion handle for a native async map.
///
/// Consumed by exactly one of [`success`](MapDone::success) /
/// [`error`](MapDone::error); dropping it without calling either models a
/// backend that never settles, which the protocol resolves through unmap
/// or release.
pub struct MapDone {
    queue: NativeCompletionQueue,
    id: BufferId,
    serial: RequestSerial,
    mode: MapMode,
}

impl MapDone {
    pub(crate) fn new(
        queue: NativeCompletionQueue,
        id: BufferId,
        serial: RequestSerial,
        mode: MapMode,
    ) -> Self {
        Self {
            queue,
            id,
            serial,
            mode,
        }
    }

    /// The native map succeeded. For a read map, `bytes` holds the mapped
    /// range; for a write map it is ignored by convention and empty.
    pub fn success(self, bytes: Vec<u8>) {
        self.queue.push(NativeEvent::Map(NativeMapEvent {
            id: self.id,
            serial: self.serial,
            mode: self.mode,
            status: MapStatus::Success,
            bytes,
        }));
    }

    /// The native map failed validation or execution.
    pub fn error(self) {
        self.queue.push(NativeEvent::Map(NativeMapEvent {
            id: self.id,
            serial: self.serial,
            mode: self.mode,
            status: MapStatus::Error,
            bytes: Vec::new(),
        }));
    }
}

/// One-shot notification handle for a native fence reaching a value.
pub struct FenceDone {
    queue: NativeCompletionQueue,
    id: FenceId,
    value: u64,
}

impl FenceDone {
    pub(crate) fn new(queue: NativeCompletionQueue, id: FenceId, value: u64) -> Self {
        Self { queue, id, value }
    }

    /// The native fence reached the value; the client's completed value
    /// will advance.
    pub fn success(self) {
        self.queue.push(NativeEvent::Fence(NativeFenceEvent {
            id: self.id,
            value: self.value,
            status: FenceStatus::Success,
        }));
    }

    /// The native fence errored; no completed-value update is produced.
    pub fn error(self) {
        self.queue.push(NativeEvent::Fence(NativeFenceEvent {
            id: self.id,
            value: self.value,
            status: FenceStatus::Error,
        }));
    }
}

/// A GPU backend the wire server drives.
///
/// Implementations own the native representations; the wire layer never
/// inspects them. Backend-side errors surface either as `None` from the
/// create calls or through the one-shot handles.
pub trait Gpu {
    type Buffer;
    type Fence;
    type Queue;

    /// Create a native buffer, or `None` on creation failure.
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Option<Self::Buffer>;

    /// Begin an asynchronous read map. `done` must eventually be settled
    /// unless the buffer is unmapped or destroyed first.
    fn map_read_async(&mut self, buffer: &mut Self::Buffer, offset: u64, size: u64, done: MapDone);

    /// Begin an asynchronous write map.
    fn map_write_async(&mut self, buffer: &mut Self::Buffer, offset: u64, size: u64, done: MapDone);

    /// Write the client's unmap payload through an established write
    /// mapping, at the mapping's offset.
    fn write_mapped(&mut self, buffer: &mut Self::Buffer, offset: u64, bytes: &[u8]);

    /// Unmap the buffer. Called whether or not the native map has settled;
    /// native side effects settle regardless of client-side cancellation.
    fn unmap(&mut self, buffer: &mut Self::Buffer);

    /// Reclaim the native buffer. Called by the fenced deleter once the
    /// GPU has signalled past the resource's last use.
    fn destroy(&mut self, buffer: Self::Buffer);

    /// Create a native fence at the given completed value, or `None` on
    /// creation failure.
    fn create_fence(&mut self, initial_value: u64) -> Option<Self::Fence>;

    /// Create a native queue, or `None` on creation failure.
    fn create_queue(&mut self) -> Option<Self::Queue>;

    /// Signal `fence` to `value` on `queue` and settle `done` once the
    /// native fence gets there.
    fn queue_signal(
        &mut self,
        queue: &mut Self::Queue,
        fence: &mut Self::Fence,
        value: u64,
        done: FenceDone,
    );

    /// Reclaim a native fence.
    fn destroy_fence(&mut self, fence: Self::Fence);

    /// Reclaim a native queue.
    fn destroy_queue(&mut self, queue: Self::Queue);
}
