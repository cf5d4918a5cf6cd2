//! The client device: proxy bookkeeping and the outbound command queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use calque_wire::{
    encode_command, BufferDescriptor, BufferId, Command, FenceDescriptor, FenceId, MapMode,
    MapStatus, QueueId, RequestSerial, WireError,
};

use crate::buffer::ClientBuffer;
use crate::callback::{ErrorCallback, Userdata};
use crate::fence::{ClientFence, FenceSlot};
use crate::handle_table::HandleTable;
use crate::queue::{ClientQueue, QueueSlot};
use crate::registry::MapRequestRegistry;

/// Longest descriptor label the client will put on the wire. Anything
/// longer fails client-side validation and yields an error-local buffer.
pub(crate) const MAX_LABEL_LEN: usize = 4096;

/// Proxy-side state of one buffer.
pub(crate) enum BufferState {
    Unmapped,
    /// A map request is in flight; `serial` is the buffer's tracked request.
    Mapping {
        serial: RequestSerial,
        mode: MapMode,
    },
    /// Mapped. `data` is the retained read view or the write staging region.
    Mapped {
        mode: MapMode,
        data: Vec<u8>,
    },
    /// The buffer never came to exist; map attempts complete `Error`
    /// locally and unmap is a no-op.
    Error,
}

pub(crate) struct BufferSlot {
    pub state: BufferState,
    pub next_serial: RequestSerial,
    /// Whether a create command was sent; governs release round-tripping.
    pub announced: bool,
}

impl BufferSlot {
    fn live() -> Self {
        Self {
            state: BufferState::Unmapped,
            next_serial: RequestSerial::new(0),
            announced: true,
        }
    }

    fn error() -> Self {
        Self {
            state: BufferState::Error,
            next_serial: RequestSerial::new(0),
            announced: false,
        }
    }
}

/// A completion synthesized client-side, delivered through the same
/// dispatch path (and with the same ordering guarantees) as a server frame.
pub(crate) struct LocalCompletion {
    pub id: BufferId,
    pub serial: RequestSerial,
    pub status: MapStatus,
}

/// Wire-thread state behind the device and proxy handles.
///
/// The lock is never held across a user callback; every delivery and
/// cancellation path removes what it needs, unlocks, then calls out.
pub(crate) struct DeviceInner {
    pub handles: HandleTable,
    pub registry: MapRequestRegistry,
    pub buffers: HashMap<BufferId, BufferSlot>,
    pub fences: HashMap<FenceId, FenceSlot>,
    pub queues: HashMap<QueueId, QueueSlot>,
    /// Encoded command frames awaiting a client flush.
    pub commands: Vec<u8>,
    /// Locally synthesized completions awaiting a server flush.
    pub local: VecDeque<LocalCompletion>,
    /// Sink for synchronous validation errors, with its bound userdata.
    pub error_callback: Option<(ErrorCallback, Userdata)>,
    /// Sticky: set on the first fatal wire error, never cleared.
    pub wire_error: Option<WireError>,
}

impl DeviceInner {
    pub fn push_command(&mut self, cmd: &Command) {
        if let Err(err) = encode_command(cmd, &mut self.commands) {
            warn!(%err, "unencodable command; marking wire errored");
            if self.wire_error.is_none() {
                self.wire_error = Some(err);
            }
        }
    }
}

/// Report a synchronous validation error through the installed sink.
///
/// The callback is taken out for the duration of the call so the device
/// lock is not held while user code runs; a replacement installed from
/// inside the callback wins over the one being restored.
pub(crate) fn report_validation_error(inner: &Arc<Mutex<DeviceInner>>, message: &str) {
    let taken = inner.lock().error_callback.take();
    let Some((mut callback, userdata)) = taken else {
        warn!(message, "validation error with no error callback installed");
        return;
    };
    debug!(message, "validation error");
    callback(message, userdata);
    let mut guard = inner.lock();
    if guard.error_callback.is_none() {
        guard.error_callback = Some((callback, userdata));
    }
}

/// Client endpoint of the wire.
///
/// Records commands against proxy handles; the embedder moves the encoded
/// bytes with [`take_commands`] and feeds completion frames back through
/// [`dispatch_completions`](Device::dispatch_completions).
///
/// [`take_commands`]: Device::take_commands
#[derive(Clone)]
pub struct Device {
    pub(crate) inner: Arc<Mutex<DeviceInner>>,
}

impl Device {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DeviceInner {
                handles: HandleTable::new(),
                registry: MapRequestRegistry::new(),
                buffers: HashMap::new(),
                fences: HashMap::new(),
                queues: HashMap::new(),
                commands: Vec::new(),
                local: VecDeque::new(),
                error_callback: None,
                wire_error: None,
            })),
        }
    }

    /// Create a buffer proxy and enqueue its creation on the wire.
    ///
    /// Client-side validation failures (oversized label, zero-size
    /// descriptor) short-circuit to an error-local buffer: no command is
    /// sent and every map attempt on the proxy completes with `Error`.
    pub fn create_buffer(&self, desc: &BufferDescriptor) -> ClientBuffer {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let id = BufferId::from(inner.handles.allocate());
        let label_ok = desc.label.as_ref().map_or(true, |l| l.len() <= MAX_LABEL_LEN);
        let size_ok = desc.size > 0;
        if !label_ok || !size_ok || inner.wire_error.is_some() {
            debug!(%id, "buffer failed client-side validation");
            inner.buffers.insert(id, BufferSlot::error());
        } else {
            inner.buffers.insert(id, BufferSlot::live());
            inner.push_command(&Command::CreateBuffer {
                id,
                desc: desc.clone(),
            });
        }
        ClientBuffer::new(id, self.inner.clone())
    }

    /// Create a proxy already in the error state, with no wire traffic.
    pub fn create_error_buffer(&self) -> ClientBuffer {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let id = BufferId::from(inner.handles.allocate());
        inner.buffers.insert(id, BufferSlot::error());
        ClientBuffer::new(id, self.inner.clone())
    }

    /// Create a fence proxy with the given initial completed value.
    pub fn create_fence(&self, desc: &FenceDescriptor) -> ClientFence {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let id = FenceId::from(inner.handles.allocate());
        let announced = inner.wire_error.is_none();
        inner
            .fences
            .insert(id, FenceSlot::new(desc.initial_value, announced));
        if announced {
            inner.push_command(&Command::CreateFence {
                id,
                initial_value: desc.initial_value,
            });
        }
        ClientFence::new(id, self.inner.clone())
    }

    /// Create a queue proxy.
    pub fn create_queue(&self) -> ClientQueue {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let id = QueueId::from(inner.handles.allocate());
        let announced = inner.wire_error.is_none();
        inner.queues.insert(id, QueueSlot { announced });
        if announced {
            inner.push_command(&Command::CreateQueue { id });
        }
        ClientQueue::new(id, self.inner.clone())
    }

    /// Install the sink for synchronous validation errors. The userdata
    /// accompanies every report.
    pub fn set_error_callback(&self, callback: ErrorCallback, userdata: Userdata) {
        self.inner.lock().error_callback = Some((callback, userdata));
    }

    /// Drain the outbound command queue for a client flush.
    pub fn take_commands(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().commands)
    }

    /// The sticky wire error, if the wire has torn down.
    pub fn wire_error(&self) -> Option<WireError> {
        self.inner.lock().wire_error
    }

    /// True once a fatal wire error has been observed.
    pub fn wire_errored(&self) -> bool {
        self.wire_error().is_some()
    }

    /// Number of map requests currently awaiting resolution.
    pub fn pending_maps(&self) -> usize {
        self.inner.lock().registry.len()
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}
