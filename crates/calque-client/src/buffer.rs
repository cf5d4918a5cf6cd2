//! The client-side buffer proxy.

use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::debug;

use calque_wire::{BufferId, Command, MapMode, MapStatus};

use crate::callback::{MapCallback, MapData, Userdata};
use crate::device::{BufferState, DeviceInner, LocalCompletion};
use crate::registry::PendingMap;

/// A proxy for a server-side GPU buffer.
///
/// Map completions arrive asynchronously through the device's dispatch
/// path; each `map_*_async` call resolves its callback exactly once, no
/// matter how `unmap`, `release`, flushes, and wire teardown interleave.
#[derive(Clone)]
pub struct ClientBuffer {
    id: BufferId,
    inner: Arc<Mutex<DeviceInner>>,
}

impl ClientBuffer {
    pub(crate) fn new(id: BufferId, inner: Arc<Mutex<DeviceInner>>) -> Self {
        Self { id, inner }
    }

    /// The wire id of this buffer.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Request an asynchronous read mapping of `[offset, offset + size)`.
    ///
    /// The callback fires during a server flush (or earlier, synthesized,
    /// if the request is cancelled by `unmap`/`release` or the wire dies).
    pub fn map_read_async(
        &self,
        offset: u64,
        size: u64,
        callback: MapCallback,
        userdata: Userdata,
    ) {
        self.map_async(MapMode::Read, offset, size, callback, userdata);
    }

    /// Request an asynchronous write mapping of `[offset, offset + size)`.
    ///
    /// On success the buffer owns a zero-initialized staging region of
    /// `size` bytes, reachable through [`mapped_range_mut`] until `unmap`
    /// sends its final contents back to the server.
    ///
    /// [`mapped_range_mut`]: ClientBuffer::mapped_range_mut
    pub fn map_write_async(
        &self,
        offset: u64,
        size: u64,
        callback: MapCallback,
        userdata: Userdata,
    ) {
        self.map_async(MapMode::Write, offset, size, callback, userdata);
    }

    fn map_async(
        &self,
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: MapCallback,
        userdata: Userdata,
    ) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.wire_error.is_some() {
            // The registry was already drained; queueing would strand the
            // callback behind a flush that will never run.
            drop(guard);
            callback(MapStatus::Unknown, MapData::None, userdata);
            return;
        }
        let Some(slot) = inner.buffers.get_mut(&self.id) else {
            drop(guard);
            callback(MapStatus::Error, MapData::None, userdata);
            return;
        };

        let serial = slot.next_serial;
        slot.next_serial = serial.next();
        let local_error = matches!(slot.state, BufferState::Error);
        if matches!(slot.state, BufferState::Unmapped) {
            slot.state = BufferState::Mapping { serial, mode };
        }
        // A redundant map (state Mapping/Mapped) still gets a slot and a
        // request frame; the server's validation answers it with Error.
        inner.registry.insert(
            self.id,
            serial,
            PendingMap::new(mode, offset, size, callback, userdata),
        );
        if local_error {
            inner.local.push_back(LocalCompletion {
                id: self.id,
                serial,
                status: MapStatus::Error,
            });
        } else {
            let cmd = match mode {
                MapMode::Read => Command::MapRead {
                    id: self.id,
                    serial,
                    offset,
                    size,
                },
                MapMode::Write => Command::MapWrite {
                    id: self.id,
                    serial,
                    offset,
                    size,
                },
            };
            inner.push_command(&cmd);
        }
    }

    /// Unmap the buffer.
    ///
    /// Cancels an in-flight map request, synthesizing its `Unknown`
    /// callback before this call returns; then sends the unmap command.
    /// For a write mapping, the staging region's current bytes precede the
    /// unmap on the wire. Unmapping an error-local or already-unmapped
    /// buffer does nothing.
    pub fn unmap(&self) {
        let mut cancelled = None;
        // Some(write_payload) once there is anything to settle server-side.
        let mut send: Option<Option<Vec<u8>>> = None;
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.wire_error.is_some() {
                return;
            }
            let Some(slot) = inner.buffers.get_mut(&self.id) else {
                return;
            };
            match std::mem::replace(&mut slot.state, BufferState::Unmapped) {
                BufferState::Error => {
                    slot.state = BufferState::Error;
                }
                BufferState::Unmapped => {}
                BufferState::Mapping { serial, .. } => {
                    cancelled = inner.registry.cancel(self.id, serial);
                    send = Some(None);
                }
                BufferState::Mapped { mode, data } => {
                    send = Some(match mode {
                        MapMode::Write => Some(data),
                        MapMode::Read => None,
                    });
                }
            }
        }
        if let Some(pending) = cancelled {
            debug!(
                id = %self.id,
                userdata = pending.userdata,
                offset = pending.offset,
                size = pending.size,
                "unmap cancelled an in-flight map"
            );
            (pending.callback)(MapStatus::Unknown, MapData::None, pending.userdata);
        }
        if let Some(write_payload) = send {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            // The cancellation callback may have released the buffer.
            if inner.buffers.contains_key(&self.id) {
                inner.push_command(&Command::Unmap {
                    id: self.id,
                    write_payload,
                });
            }
        }
    }

    /// Drop the proxy's external reference.
    ///
    /// Every still-pending map request on this buffer completes with
    /// `Unknown`, locally, before the release frame is enqueued; after
    /// this returns, no callback for this buffer will ever fire.
    pub fn release(self) {
        let cancelled;
        let announced;
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let Some(slot) = inner.buffers.remove(&self.id) else {
                return;
            };
            announced = slot.announced;
            cancelled = inner.registry.cancel_all_for_buffer(self.id);
        }
        if !cancelled.is_empty() {
            debug!(id = %self.id, count = cancelled.len(), "release cancelled in-flight maps");
        }
        for pending in cancelled {
            (pending.callback)(MapStatus::Unknown, MapData::None, pending.userdata);
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if announced && inner.wire_error.is_none() {
            inner.push_command(&Command::Release { id: self.id });
            // Tombstoned until the server's ack frame round-trips.
            inner.handles.release(self.id.raw());
        } else {
            inner.handles.free_local(self.id.raw());
        }
    }

    /// The mapped bytes, while the buffer is mapped (read or write).
    ///
    /// The guard holds the device lock: drop it before calling any other
    /// device or buffer operation.
    pub fn mapped_range(&self) -> Option<MappedMutexGuard<'_, [u8]>> {
        MutexGuard::try_map(self.inner.lock(), |inner| {
            match inner.buffers.get_mut(&self.id) {
                Some(slot) => match &mut slot.state {
                    BufferState::Mapped { data, .. } => Some(data.as_mut_slice()),
                    _ => None,
                },
                None => None,
            }
        })
        .ok()
    }

    /// The write staging region, while the buffer is write-mapped.
    ///
    /// Bytes written here travel to the server with the next `unmap`. The
    /// guard holds the device lock: drop it before calling any other
    /// device or buffer operation.
    pub fn mapped_range_mut(&self) -> Option<MappedMutexGuard<'_, [u8]>> {
        MutexGuard::try_map(self.inner.lock(), |inner| {
            match inner.buffers.get_mut(&self.id) {
                Some(slot) => match &mut slot.state {
                    BufferState::Mapped {
                        mode: MapMode::Write,
                        data,
                    } => Some(data.as_mut_slice()),
                    _ => None,
                },
                None => None,
            }
        })
        .ok()
    }
}
