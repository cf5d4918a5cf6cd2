//! The client-side fence proxy.
//!
//! A fence carries two values: the last value the client asked a queue to
//! signal, and the last value known to have completed. Signals are
//! validated synchronously against the former; completion waits resolve
//! against the latter, which only advances when completed-value frames
//! are dispatched.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use calque_wire::{Command, FenceId, FenceStatus};

use crate::callback::{FenceCallback, Userdata};
use crate::device::{report_validation_error, DeviceInner};

/// One outstanding on-completion request.
pub(crate) struct FenceRequest {
    pub value: u64,
    pub callback: FenceCallback,
    pub userdata: Userdata,
    /// Registration order, for tie-breaking equal wait values.
    pub seq: u64,
}

/// Proxy-side state of one fence.
pub(crate) struct FenceSlot {
    /// Highest value a signal has been issued for.
    pub signaled_value: u64,
    /// Highest value known to have completed.
    pub completed_value: u64,
    pub requests: Vec<FenceRequest>,
    pub next_seq: u64,
    /// Whether a create command was sent; governs release round-tripping.
    pub announced: bool,
}

impl FenceSlot {
    pub fn new(initial_value: u64, announced: bool) -> Self {
        Self {
            signaled_value: initial_value,
            completed_value: initial_value,
            requests: Vec::new(),
            next_seq: 0,
            announced,
        }
    }

    /// Remove the next request satisfied by the completed value, lowest
    /// wait value first and registration order within a value.
    pub fn take_next_satisfied(&mut self) -> Option<FenceRequest> {
        let completed = self.completed_value;
        let mut best: Option<usize> = None;
        for (index, request) in self.requests.iter().enumerate() {
            if request.value > completed {
                continue;
            }
            let better = best.map_or(true, |b| {
                (request.value, request.seq) < (self.requests[b].value, self.requests[b].seq)
            });
            if better {
                best = Some(index);
            }
        }
        best.map(|index| self.requests.remove(index))
    }

    /// Remove every request, in registration order. Used by release and
    /// wire teardown.
    pub fn take_all(&mut self) -> Vec<FenceRequest> {
        let mut drained: Vec<FenceRequest> = self.requests.drain(..).collect();
        drained.sort_unstable_by_key(|request| request.seq);
        drained
    }
}

enum WaitResolution {
    Queued,
    Now(FenceStatus, FenceCallback),
    /// Synchronous validation failure: report through the device error
    /// callback, then fail the wait.
    Invalid(FenceCallback),
}

/// A proxy for a server-side fence.
///
/// Completion waits resolve exactly once: immediately when the outcome is
/// already decidable, during a server flush once the completed value
/// catches up, or with `Unknown` when the fence is released first.
#[derive(Clone)]
pub struct ClientFence {
    id: FenceId,
    inner: Arc<Mutex<DeviceInner>>,
}

impl ClientFence {
    pub(crate) fn new(id: FenceId, inner: Arc<Mutex<DeviceInner>>) -> Self {
        Self { id, inner }
    }

    /// The wire id of this fence.
    pub fn id(&self) -> FenceId {
        self.id
    }

    /// The highest fence value known to have completed. Advances only as
    /// completion frames are dispatched.
    pub fn completed_value(&self) -> u64 {
        self.inner
            .lock()
            .fences
            .get(&self.id)
            .map_or(0, |slot| slot.completed_value)
    }

    /// Wait for the fence to reach `value`.
    ///
    /// Fires immediately with `Success` if `value` has already completed.
    /// Waiting past the last signaled value is a synchronous validation
    /// error: the device error callback is reported and the wait fails
    /// with `Error`, immediately. Anything in between queues until the
    /// completed value catches up during a server flush.
    pub fn on_completion(&self, value: u64, callback: FenceCallback, userdata: Userdata) {
        let resolution = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.wire_error.is_some() {
                WaitResolution::Now(FenceStatus::Unknown, callback)
            } else {
                match inner.fences.get_mut(&self.id) {
                    None => WaitResolution::Now(FenceStatus::Error, callback),
                    Some(slot) => {
                        if value <= slot.completed_value {
                            WaitResolution::Now(FenceStatus::Success, callback)
                        } else if value > slot.signaled_value {
                            WaitResolution::Invalid(callback)
                        } else {
                            let seq = slot.next_seq;
                            slot.next_seq += 1;
                            slot.requests.push(FenceRequest {
                                value,
                                callback,
                                userdata,
                                seq,
                            });
                            WaitResolution::Queued
                        }
                    }
                }
            }
        };
        match resolution {
            WaitResolution::Queued => {}
            WaitResolution::Now(status, callback) => callback(status, userdata),
            WaitResolution::Invalid(callback) => {
                report_validation_error(
                    &self.inner,
                    "fence wait value exceeds the last signaled value",
                );
                callback(FenceStatus::Error, userdata);
            }
        }
    }

    /// Drop the proxy's external reference.
    ///
    /// Every still-pending wait completes with `Unknown`, locally, before
    /// the release frame is enqueued; after this returns, no callback for
    /// this fence will ever fire.
    pub fn release(self) {
        let drained;
        let announced;
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let Some(mut slot) = inner.fences.remove(&self.id) else {
                return;
            };
            announced = slot.announced;
            drained = slot.take_all();
        }
        if !drained.is_empty() {
            debug!(id = %self.id, count = drained.len(), "release cancelled pending fence waits");
        }
        for request in drained {
            (request.callback)(FenceStatus::Unknown, request.userdata);
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if announced && inner.wire_error.is_none() {
            inner.push_command(&Command::FenceRelease { id: self.id });
            // Tombstoned until the server's ack frame round-trips.
            inner.handles.release(self.id.raw());
        } else {
            inner.handles.free_local(self.id.raw());
        }
    }
}
