//! Pending map requests, keyed by `(buffer id, request serial)`.

use std::collections::HashMap;

use calque_wire::{BufferId, MapMode, RequestSerial};

use crate::callback::{MapCallback, Userdata};

/// Lifecycle of a pending map request.
///
/// The only transition is `InFlight -> Cancelled`, performed by the
/// cancelling call site as it removes the slot; the record never re-enters
/// the registry afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingStatus {
    InFlight,
    Cancelled,
}

/// One outstanding map request.
pub(crate) struct PendingMap {
    pub mode: MapMode,
    pub offset: u64,
    pub size: u64,
    pub callback: MapCallback,
    pub userdata: Userdata,
    pub status: PendingStatus,
    /// Registration order, for cancellation sweeps.
    seq: u64,
}

impl PendingMap {
    pub fn new(
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: MapCallback,
        userdata: Userdata,
    ) -> Self {
        Self {
            mode,
            offset,
            size,
            callback,
            userdata,
            status: PendingStatus::InFlight,
            seq: 0,
        }
    }
}

/// All pending map requests on the client, across buffers.
///
/// Owned by the wire thread; never locked across a callback.
#[derive(Default)]
pub(crate) struct MapRequestRegistry {
    slots: HashMap<(BufferId, RequestSerial), PendingMap>,
    next_seq: u64,
}

impl MapRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a pending request.
    ///
    /// # Panics
    ///
    /// Panics on `(id, serial)` collision: serials wrap at 2^32, so a
    /// collision means 2^32 requests are outstanding on one buffer, which
    /// is a caller bug and not a state this registry can represent.
    pub fn insert(&mut self, id: BufferId, serial: RequestSerial, mut pending: PendingMap) {
        pending.seq = self.next_seq;
        self.next_seq += 1;
        let previous = self.slots.insert((id, serial), pending);
        assert!(
            previous.is_none(),
            "map request serial reused while outstanding: {id} {serial}"
        );
    }

    /// Remove and return the slot for a matched completion.
    pub fn take(&mut self, id: BufferId, serial: RequestSerial) -> Option<PendingMap> {
        self.slots.remove(&(id, serial))
    }

    /// Remove the slot for a cancelled request.
    ///
    /// The returned record is marked `Cancelled` so the caller knows to
    /// synthesize an `Unknown` completion for it.
    pub fn cancel(&mut self, id: BufferId, serial: RequestSerial) -> Option<PendingMap> {
        self.slots.remove(&(id, serial)).map(|mut pending| {
            pending.status = PendingStatus::Cancelled;
            pending
        })
    }

    /// Remove every slot for `id`, in registration order. Used by release.
    pub fn cancel_all_for_buffer(&mut self, id: BufferId) -> Vec<PendingMap> {
        let mut serials: Vec<(u64, RequestSerial)> = self
            .slots
            .iter()
            .filter(|((slot_id, _), _)| *slot_id == id)
            .map(|((_, serial), pending)| (pending.seq, *serial))
            .collect();
        serials.sort_unstable();
        serials
            .into_iter()
            .filter_map(|(_, serial)| self.cancel(id, serial))
            .collect()
    }

    /// Remove every slot, in registration order. Used by wire teardown.
    pub fn drain_all(&mut self) -> Vec<PendingMap> {
        let mut drained: Vec<PendingMap> = self
            .slots
            .drain()
            .map(|(_, mut pending)| {
                pending.status = PendingStatus::Cancelled;
                pending
            })
            .collect();
        drained.sort_unstable_by_key(|pending| pending.seq);
        drained
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callback() -> MapCallback {
        Box::new(|_, _, _| {})
    }

    fn pending(userdata: Userdata) -> PendingMap {
        PendingMap::new(MapMode::Read, 0, 4, noop_callback(), userdata)
    }

    fn id(index: u32) -> BufferId {
        BufferId::from_parts(index, 0)
    }

    #[test]
    fn take_returns_the_inserted_record_once() {
        let mut registry = MapRequestRegistry::new();
        registry.insert(id(1), RequestSerial::new(0), pending(8653));

        let taken = registry.take(id(1), RequestSerial::new(0)).unwrap();
        assert_eq!(taken.userdata, 8653);
        assert_eq!(taken.status, PendingStatus::InFlight);
        assert!(registry.take(id(1), RequestSerial::new(0)).is_none());
    }

    #[test]
    fn cancel_marks_the_record_cancelled() {
        let mut registry = MapRequestRegistry::new();
        registry.insert(id(1), RequestSerial::new(3), pending(8657));

        let cancelled = registry.cancel(id(1), RequestSerial::new(3)).unwrap();
        assert_eq!(cancelled.status, PendingStatus::Cancelled);
        // A late completion for the same request finds nothing.
        assert!(registry.take(id(1), RequestSerial::new(3)).is_none());
    }

    #[test]
    fn cancel_all_yields_registration_order_for_one_buffer() {
        let mut registry = MapRequestRegistry::new();
        registry.insert(id(1), RequestSerial::new(0), pending(10));
        registry.insert(id(2), RequestSerial::new(0), pending(20));
        registry.insert(id(1), RequestSerial::new(1), pending(11));
        registry.insert(id(1), RequestSerial::new(2), pending(12));

        let cancelled = registry.cancel_all_for_buffer(id(1));
        let userdata: Vec<_> = cancelled.iter().map(|p| p.userdata).collect();
        assert_eq!(userdata, vec![10, 11, 12]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn drain_all_yields_registration_order_across_buffers() {
        let mut registry = MapRequestRegistry::new();
        registry.insert(id(2), RequestSerial::new(0), pending(20));
        registry.insert(id(1), RequestSerial::new(0), pending(10));
        registry.insert(id(3), RequestSerial::new(0), pending(30));

        let drained = registry.drain_all();
        let userdata: Vec<_> = drained.iter().map(|p| p.userdata).collect();
        assert_eq!(userdata, vec![20, 10, 30]);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn wrapped_serials_key_distinct_slots() {
        let mut registry = MapRequestRegistry::new();
        registry.insert(id(1), RequestSerial::new(u32::MAX), pending(1));
        registry.insert(id(1), RequestSerial::new(u32::MAX).next(), pending(2));

        assert_eq!(registry.take(id(1), RequestSerial::new(0)).unwrap().userdata, 2);
        assert_eq!(
            registry
                .take(id(1), RequestSerial::new(u32::MAX))
                .unwrap()
                .userdata,
            1
        );
    }

    #[test]
    #[should_panic(expected = "serial reused")]
    fn duplicate_insert_is_a_caller_bug() {
        let mut registry = MapRequestRegistry::new();
        registry.insert(id(1), RequestSerial::new(0), pending(1));
        registry.insert(id(1), RequestSerial::new(0), pending(2));
    }
}
