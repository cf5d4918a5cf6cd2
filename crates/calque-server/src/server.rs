//! Command dispatch against the backend.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use calque_wire::{
    encode_completion, BufferDescriptor, BufferId, BufferUsage, Command, Completion, FenceId,
    FenceStatus, FrameReader, MapMode, MapStatus, QueueId, RequestSerial, WireError,
    MAX_MAP_PAYLOAD,
};

use crate::deleter::FencedDeleter;
use crate::gpu::{
    FenceDone, Gpu, MapDone, NativeCompletionQueue, NativeEvent, NativeFenceEvent, NativeMapEvent,
};

struct ActiveMap {
    serial: RequestSerial,
    mode: MapMode,
    offset: u64,
}

struct MappedRange {
    mode: MapMode,
    offset: u64,
}

/// Server shim for one buffer.
struct ServerBuffer<B> {
    native: B,
    size: u64,
    usage: BufferUsage,
    /// At most one; a native map is only in flight while this is set.
    active: Option<ActiveMap>,
    mapped: Option<MappedRange>,
}

/// Server endpoint of the wire.
///
/// Commands for one object are processed in the order received; the
/// completion byte stream preserves production order, which is the FIFO
/// the client dispatch relies on.
pub struct WireServer<G: Gpu> {
    gpu: G,
    buffers: HashMap<BufferId, ServerBuffer<G::Buffer>>,
    fences: HashMap<FenceId, G::Fence>,
    queues: HashMap<QueueId, G::Queue>,
    native: NativeCompletionQueue,
    /// Encoded completion frames awaiting a flush.
    completions: Vec<u8>,
    deleter: FencedDeleter<G::Buffer>,
    /// Fence value stamped on releases; advanced by the embedder as work
    /// is submitted.
    fence: u64,
    wire_error: Option<WireError>,
}

impl<G: Gpu> WireServer<G> {
    pub fn new(gpu: G) -> Self {
        Self {
            gpu,
            buffers: HashMap::new(),
            fences: HashMap::new(),
            queues: HashMap::new(),
            native: NativeCompletionQueue::new(),
            completions: Vec::new(),
            deleter: FencedDeleter::new(),
            fence: 0,
            wire_error: None,
        }
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    /// Process a batch of command frames, then reconcile any native work
    /// that settled along the way.
    ///
    /// A decode failure is fatal: the sticky errored flag is set, active
    /// requests are abandoned, and every further call fails fast.
    pub fn handle_commands(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if let Some(err) = self.wire_error {
            return Err(err);
        }
        let mut reader = FrameReader::new(bytes);
        loop {
            match reader.next_command() {
                Ok(Some(cmd)) => self.handle_command(cmd),
                Ok(None) => break,
                Err(err) => {
                    self.tear_down(err);
                    return Err(err);
                }
            }
        }
        self.pump_native();
        Ok(())
    }

    /// Drain settled native work into completion frames.
    ///
    /// Also called by embedders whose backend settles outside of command
    /// processing.
    pub fn pump_native(&mut self) {
        for event in self.native.drain() {
            match event {
                NativeEvent::Map(event) => self.pump_map_event(event),
                NativeEvent::Fence(event) => self.pump_fence_event(event),
            }
        }
    }

    fn pump_map_event(&mut self, event: NativeMapEvent) {
        let Some(buffer) = self.buffers.get_mut(&event.id) else {
            trace!(id = %event.id, serial = %event.serial, "native completion for a released buffer; dropped");
            return;
        };
        match &buffer.active {
            Some(active) if active.serial == event.serial => {
                let offset = active.offset;
                buffer.active = None;
                if event.status == MapStatus::Success {
                    buffer.mapped = Some(MappedRange {
                        mode: event.mode,
                        offset,
                    });
                }
                let completion = match event.mode {
                    MapMode::Read => Completion::MapRead {
                        id: event.id,
                        serial: event.serial,
                        status: event.status,
                        payload: event.bytes,
                    },
                    MapMode::Write => Completion::MapWrite {
                        id: event.id,
                        serial: event.serial,
                        status: event.status,
                    },
                };
                self.push_completion(&completion);
            }
            _ => {
                // An unmap arrived before the native map settled; the
                // client has already accounted for this request.
                trace!(id = %event.id, serial = %event.serial, "stale native completion dropped");
            }
        }
    }

    fn pump_fence_event(&mut self, event: NativeFenceEvent) {
        if !self.fences.contains_key(&event.id) {
            trace!(id = %event.id, value = event.value, "native fence completion for a released fence; dropped");
            return;
        }
        if event.status != FenceStatus::Success {
            warn!(id = %event.id, value = event.value, "native fence errored; no completed-value update");
            return;
        }
        self.push_completion(&Completion::FenceCompletedValue {
            fence: event.id,
            value: event.value,
        });
    }

    /// Drain the outbound completion queue for a server flush.
    pub fn take_completions(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.completions)
    }

    /// The sticky wire error, if the wire has torn down.
    pub fn wire_error(&self) -> Option<WireError> {
        self.wire_error
    }

    /// Advance the fence stamped on subsequent releases. Returns the new
    /// value.
    pub fn advance_fence(&mut self) -> u64 {
        self.fence += 1;
        self.fence
    }

    /// The GPU signalled `value`; destroys every resource whose release
    /// fence has completed.
    pub fn complete_fence(&mut self, value: u64) {
        for native in self.deleter.drain_completed(value) {
            self.gpu.destroy(native);
        }
    }

    /// Native handles still awaiting their fence.
    pub fn pending_destructions(&self) -> usize {
        self.deleter.len()
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::CreateBuffer { id, desc } => self.handle_create(id, desc),
            Command::MapRead {
                id,
                serial,
                offset,
                size,
            } => self.handle_map(id, serial, MapMode::Read, offset, size),
            Command::MapWrite {
                id,
                serial,
                offset,
                size,
            } => self.handle_map(id, serial, MapMode::Write, offset, size),
            Command::Unmap { id, write_payload } => self.handle_unmap(id, write_payload),
            Command::Release { id } => self.handle_release(id),
            Command::CreateQueue { id } => self.handle_create_queue(id),
            Command::CreateFence { id, initial_value } => {
                self.handle_create_fence(id, initial_value)
            }
            Command::QueueSignal {
                queue,
                fence,
                value,
            } => self.handle_queue_signal(queue, fence, value),
            Command::FenceRelease { id } => self.handle_fence_release(id),
            Command::QueueRelease { id } => self.handle_queue_release(id),
        }
    }

    fn handle_create(&mut self, id: BufferId, desc: BufferDescriptor) {
        if self.buffers.contains_key(&id) {
            warn!(%id, "duplicate buffer creation ignored");
            return;
        }
        if desc.size == 0 {
            // A well-behaved client never sends this; map requests for
            // the id are answered with Error like any unknown buffer.
            warn!(%id, "zero-size buffer creation refused");
            return;
        }
        match self.gpu.create_buffer(&desc) {
            Some(native) => {
                debug!(%id, size = desc.size, "buffer created");
                self.buffers.insert(
                    id,
                    ServerBuffer {
                        native,
                        size: desc.size,
                        usage: desc.usage,
                        active: None,
                        mapped: None,
                    },
                );
            }
            None => {
                // Later map requests for this id are answered with Error.
                warn!(%id, "backend refused buffer creation");
            }
        }
    }

    fn handle_map(
        &mut self,
        id: BufferId,
        serial: RequestSerial,
        mode: MapMode,
        offset: u64,
        size: u64,
    ) {
        let Some(buffer) = self.buffers.get_mut(&id) else {
            debug!(%id, %serial, "map request for unknown buffer");
            self.refuse_map(id, serial, mode);
            return;
        };
        let usage_ok = match mode {
            MapMode::Read => buffer.usage.contains(BufferUsage::MAP_READ),
            MapMode::Write => buffer.usage.contains(BufferUsage::MAP_WRITE),
        };
        let range_ok = offset
            .checked_add(size)
            .map_or(false, |end| end <= buffer.size);
        let idle = buffer.active.is_none() && buffer.mapped.is_none();
        if !usage_ok || !range_ok || !idle || size > MAX_MAP_PAYLOAD {
            warn!(%id, %serial, offset, size, "map request failed validation");
            self.refuse_map(id, serial, mode);
            return;
        }

        buffer.active = Some(ActiveMap {
            serial,
            mode,
            offset,
        });
        let done = MapDone::new(self.native.clone(), id, serial, mode);
        match mode {
            MapMode::Read => self.gpu.map_read_async(&mut buffer.native, offset, size, done),
            MapMode::Write => self
                .gpu
                .map_write_async(&mut buffer.native, offset, size, done),
        }
    }

    /// A map request is never silently dropped: the client guarantees its
    /// user exactly one callback, and unmatched requests would hang it.
    fn refuse_map(&mut self, id: BufferId, serial: RequestSerial, mode: MapMode) {
        let completion = match mode {
            MapMode::Read => Completion::MapRead {
                id,
                serial,
                status: MapStatus::Error,
                payload: Vec::new(),
            },
            MapMode::Write => Completion::MapWrite {
                id,
                serial,
                status: MapStatus::Error,
            },
        };
        self.push_completion(&completion);
    }

    fn handle_unmap(&mut self, id: BufferId, write_payload: Option<Vec<u8>>) {
        let Some(buffer) = self.buffers.get_mut(&id) else {
            trace!(%id, "unmap for unknown buffer dropped");
            return;
        };
        if let (Some(bytes), Some(mapped)) = (&write_payload, &buffer.mapped) {
            if mapped.mode == MapMode::Write {
                self.gpu.write_mapped(&mut buffer.native, mapped.offset, bytes);
            }
        }
        // Unmap settles native state even if the async map has not yet
        // completed; the pending completion then reconciles as stale.
        self.gpu.unmap(&mut buffer.native);
        buffer.active = None;
        buffer.mapped = None;
    }

    fn handle_release(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.remove(&id) {
            if buffer.active.is_some() {
                trace!(%id, "released with a map request still active");
            }
            self.deleter.enqueue(self.fence, buffer.native);
        }
        // Ack unconditionally: the client tombstones its handle for every
        // announced object, including ones the backend refused to create.
        self.push_completion(&Completion::ReleaseAck { id: id.raw() });
    }

    fn handle_create_queue(&mut self, id: QueueId) {
        if self.queues.contains_key(&id) {
            warn!(%id, "duplicate queue creation ignored");
            return;
        }
        match self.gpu.create_queue() {
            Some(native) => {
                self.queues.insert(id, native);
            }
            None => warn!(%id, "backend refused queue creation"),
        }
    }

    fn handle_create_fence(&mut self, id: FenceId, initial_value: u64) {
        if self.fences.contains_key(&id) {
            warn!(%id, "duplicate fence creation ignored");
            return;
        }
        match self.gpu.create_fence(initial_value) {
            Some(native) => {
                debug!(%id, initial_value, "fence created");
                self.fences.insert(id, native);
            }
            None => warn!(%id, "backend refused fence creation"),
        }
    }

    fn handle_queue_signal(&mut self, queue_id: QueueId, fence_id: FenceId, value: u64) {
        let Some(queue) = self.queues.get_mut(&queue_id) else {
            warn!(%queue_id, %fence_id, value, "signal on unknown queue dropped");
            return;
        };
        let Some(fence) = self.fences.get_mut(&fence_id) else {
            warn!(%queue_id, %fence_id, value, "signal on unknown fence dropped");
            return;
        };
        let done = FenceDone::new(self.native.clone(), fence_id, value);
        self.gpu.queue_signal(queue, fence, value, done);
    }

    fn handle_fence_release(&mut self, id: FenceId) {
        if let Some(native) = self.fences.remove(&id) {
            self.gpu.destroy_fence(native);
        }
        self.push_completion(&Completion::ReleaseAck { id: id.raw() });
    }

    fn handle_queue_release(&mut self, id: QueueId) {
        if let Some(native) = self.queues.remove(&id) {
            self.gpu.destroy_queue(native);
        }
        self.push_completion(&Completion::ReleaseAck { id: id.raw() });
    }

    fn push_completion(&mut self, completion: &Completion) {
        if let Err(err) = encode_completion(completion, &mut self.completions) {
            warn!(%err, "unencodable completion; marking wire errored");
            if self.wire_error.is_none() {
                self.wire_error = Some(err);
            }
        }
    }

    fn tear_down(&mut self, err: WireError) {
        warn!(%err, "wire error; abandoning active requests");
        self.wire_error = Some(err);
        for buffer in self.buffers.values_mut() {
            buffer.active = None;
        }
        self.completions.clear();
    }
}

// WireServer behavior is covered end-to-end in calque-testkit, which owns
// the mock backend; keeping those tests there avoids a circular
// dev-dependency.
