//! The client-side queue proxy.

use std::sync::Arc;

use parking_lot::Mutex;

use calque_wire::{Command, QueueId};

use crate::device::{report_validation_error, DeviceInner};
use crate::fence::ClientFence;

pub(crate) struct QueueSlot {
    /// Whether a create command was sent; governs release round-tripping.
    pub announced: bool,
}

/// A proxy for a server-side queue.
#[derive(Clone)]
pub struct ClientQueue {
    id: QueueId,
    inner: Arc<Mutex<DeviceInner>>,
}

impl ClientQueue {
    pub(crate) fn new(id: QueueId, inner: Arc<Mutex<DeviceInner>>) -> Self {
        Self { id, inner }
    }

    /// The wire id of this queue.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Signal `fence` to `value`.
    ///
    /// Validated synchronously: the value must strictly exceed everything
    /// already signaled on the fence. A failure reports through the
    /// device error callback and nothing reaches the wire. The fence's
    /// completed value advances once the server's completion frame is
    /// dispatched.
    pub fn signal(&self, fence: &ClientFence, value: u64) {
        let failure = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.wire_error.is_some() {
                return;
            }
            if !inner.queues.contains_key(&self.id) {
                Some("signal on a released queue")
            } else {
                match inner.fences.get_mut(&fence.id()) {
                    None => Some("signal on a released fence"),
                    Some(slot) if value <= slot.signaled_value => {
                        Some("fence signal value must exceed the last signaled value")
                    }
                    Some(slot) => {
                        slot.signaled_value = value;
                        inner.push_command(&Command::QueueSignal {
                            queue: self.id,
                            fence: fence.id(),
                            value,
                        });
                        None
                    }
                }
            }
        };
        if let Some(message) = failure {
            report_validation_error(&self.inner, message);
        }
    }

    /// Drop the proxy's external reference.
    pub fn release(self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(slot) = inner.queues.remove(&self.id) else {
            return;
        };
        if slot.announced && inner.wire_error.is_none() {
            inner.push_command(&Command::QueueRelease { id: self.id });
            // Tombstoned until the server's ack frame round-trips.
            inner.handles.release(self.id.raw());
        } else {
            inner.handles.free_local(self.id.raw());
        }
    }
}
