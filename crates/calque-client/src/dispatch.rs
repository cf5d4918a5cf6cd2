//! Completion dispatch: the delivery rules.
//!
//! Completions are dispatched FIFO per object in the order the server
//! produced them (one ordered byte stream per direction makes that global
//! FIFO). Locally synthesized completions drain first — they were
//! produced before anything the server has yet to say about the same
//! request could matter.

use tracing::{trace, warn};

use calque_wire::{
    BufferId, Completion, FenceId, FenceStatus, FrameReader, MapMode, MapStatus, RequestSerial,
    WireError,
};

use crate::callback::MapData;
use crate::device::{BufferState, Device};
use crate::fence::FenceRequest;
use crate::registry::PendingStatus;

impl Device {
    /// Dispatch a batch of completion frames to user callbacks.
    ///
    /// Returns the fatal [`WireError`] if decoding fails, after draining
    /// every pending request with `Unknown` and setting the sticky
    /// errored flag. Once errored, all further calls fail fast.
    pub fn dispatch_completions(&self, bytes: &[u8]) -> Result<(), WireError> {
        if let Some(err) = self.wire_error() {
            return Err(err);
        }

        loop {
            let next = self.inner.lock().local.pop_front();
            let Some(local) = next else { break };
            self.deliver(local.id, local.serial, local.status, &[]);
        }

        let mut reader = FrameReader::new(bytes);
        loop {
            match reader.next_completion() {
                Ok(Some(Completion::MapRead {
                    id,
                    serial,
                    status,
                    payload,
                })) => self.deliver(id, serial, status, &payload),
                Ok(Some(Completion::MapWrite { id, serial, status })) => {
                    self.deliver(id, serial, status, &[])
                }
                Ok(Some(Completion::ReleaseAck { id })) => {
                    self.inner.lock().handles.acknowledge(id);
                }
                Ok(Some(Completion::FenceCompletedValue { fence, value })) => {
                    self.deliver_fence_update(fence, value)
                }
                Ok(None) => return Ok(()),
                Err(err) => {
                    self.tear_down(err);
                    return Err(err);
                }
            }
        }
    }

    /// Apply the delivery rule for one map completion.
    ///
    /// 1. take the slot; absent means the request was already resolved
    ///    (cancelled or delivered) and the frame is dropped;
    /// 2. update the proxy only if this is the buffer's tracked request —
    ///    a redundant request's Error must not disturb a live mapping;
    /// 3. unlock, then invoke the callback. A reentrant unmap or release
    ///    inside the callback finds the slot already gone.
    fn deliver(&self, id: BufferId, serial: RequestSerial, status: MapStatus, payload: &[u8]) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(pending) = inner.registry.take(id, serial) else {
            trace!(%id, %serial, %status, "dropping completion with no pending slot");
            return;
        };
        if pending.status == PendingStatus::Cancelled {
            // The cancellation already produced the user-visible callback.
            trace!(%id, %serial, "dropping completion for a cancelled request");
            return;
        }

        if let Some(slot) = inner.buffers.get_mut(&id) {
            let tracked =
                matches!(slot.state, BufferState::Mapping { serial: s, .. } if s == serial);
            if tracked {
                slot.state = match (status, pending.mode) {
                    (MapStatus::Success, MapMode::Read) => BufferState::Mapped {
                        mode: MapMode::Read,
                        data: payload.to_vec(),
                    },
                    (MapStatus::Success, MapMode::Write) => BufferState::Mapped {
                        mode: MapMode::Write,
                        data: vec![0; pending.size as usize],
                    },
                    _ => BufferState::Unmapped,
                };
            }
        }

        let size = pending.size;
        let userdata = pending.userdata;
        let callback = pending.callback;
        let mode = pending.mode;
        drop(guard);

        match (status, mode) {
            (MapStatus::Success, MapMode::Read) => {
                callback(status, MapData::Read(payload), userdata)
            }
            (MapStatus::Success, MapMode::Write) => {
                callback(status, MapData::Write { len: size }, userdata)
            }
            _ => callback(status, MapData::None, userdata),
        }
    }

    /// Advance a fence's completed value and resolve the waits it
    /// satisfies, lowest wait value first.
    ///
    /// Requests are taken one at a time, with the lock released around
    /// each callback, so a reentrant release inside a callback simply
    /// ends the drain.
    fn deliver_fence_update(&self, fence: FenceId, value: u64) {
        {
            let mut guard = self.inner.lock();
            let Some(slot) = guard.fences.get_mut(&fence) else {
                trace!(%fence, value, "dropping completed-value update for a released fence");
                return;
            };
            if value > slot.completed_value {
                slot.completed_value = value;
            }
        }
        loop {
            let next = {
                let mut guard = self.inner.lock();
                guard
                    .fences
                    .get_mut(&fence)
                    .and_then(|slot| slot.take_next_satisfied())
            };
            let Some(request) = next else { break };
            (request.callback)(FenceStatus::Success, request.userdata);
        }
    }

    /// Fatal wire error: drain everything with `Unknown` and stick the flag.
    fn tear_down(&self, err: WireError) {
        let (drained_maps, drained_waits) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.wire_error.is_none() {
                inner.wire_error = Some(err);
            }
            inner.local.clear();
            // Dead-wire proxies behave like error buffers from here on.
            for slot in inner.buffers.values_mut() {
                slot.state = BufferState::Error;
            }
            let mut waits: Vec<FenceRequest> = Vec::new();
            for slot in inner.fences.values_mut() {
                waits.extend(slot.take_all());
            }
            (inner.registry.drain_all(), waits)
        };
        warn!(
            %err,
            maps = drained_maps.len(),
            waits = drained_waits.len(),
            "wire error; draining pending requests"
        );
        for pending in drained_maps {
            (pending.callback)(MapStatus::Unknown, MapData::None, pending.userdata);
        }
        for request in drained_waits {
            (request.callback)(FenceStatus::Unknown, request.userdata);
        }
    }
}
