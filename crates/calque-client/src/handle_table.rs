//! Client handle allocation with tombstoned release.
//!
//! Ids are allocated densely from a free list, shared by every proxy type
//! (buffers, fences, queues), and packed as `(generation << 32) | index`.
//! A released slot is tombstoned — reserved but unallocatable — until the
//! server's release ack round-trips, so an in-flight completion can never
//! be delivered to a new object wearing the same index. Reuse bumps the
//! slot generation, which is part of the id.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Live,
    Tombstone,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
}

/// Maps client proxy ids to handle slots.
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

fn index_of(raw: u64) -> u32 {
    raw as u32
}

fn generation_of(raw: u64) -> u32 {
    (raw >> 32) as u32
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the most recently freed slot, or grow the table. The
    /// returned raw id is packed `(generation << 32) | index`; the caller
    /// wraps it in the proper typed id.
    pub fn allocate(&mut self) -> u64 {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.state = SlotState::Live;
            ((slot.generation as u64) << 32) | index as u64
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                state: SlotState::Live,
            });
            index as u64
        }
    }

    /// True while `raw` names the current occupant of a live slot.
    pub fn is_live(&self, raw: u64) -> bool {
        matches!(
            self.slots.get(index_of(raw) as usize),
            Some(slot) if slot.generation == generation_of(raw) && slot.state == SlotState::Live
        )
    }

    /// Mark `raw` released; the slot stays reserved until [`acknowledge`].
    ///
    /// [`acknowledge`]: HandleTable::acknowledge
    pub fn release(&mut self, raw: u64) {
        if let Some(slot) = self.current_slot(raw) {
            if slot.state == SlotState::Live {
                slot.state = SlotState::Tombstone;
            }
        }
    }

    /// The server acknowledged the release; the slot becomes reusable
    /// under a new generation.
    pub fn acknowledge(&mut self, raw: u64) {
        let index = index_of(raw);
        if let Some(slot) = self.current_slot(raw) {
            if slot.state == SlotState::Tombstone {
                slot.state = SlotState::Free;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
            }
        }
    }

    /// Free a slot that was never announced to the server. No round trip
    /// exists to wait for, so the slot is reusable immediately.
    pub fn free_local(&mut self, raw: u64) {
        let index = index_of(raw);
        if let Some(slot) = self.current_slot(raw) {
            if slot.state == SlotState::Live {
                slot.state = SlotState::Free;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
            }
        }
    }

    fn current_slot(&mut self, raw: u64) -> Option<&mut Slot> {
        self.slots
            .get_mut(index_of(raw) as usize)
            .filter(|slot| slot.generation == generation_of(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(index: u32, generation: u32) -> u64 {
        ((generation as u64) << 32) | index as u64
    }

    #[test]
    fn allocation_is_dense() {
        let mut table = HandleTable::new();
        assert_eq!(table.allocate(), pack(0, 0));
        assert_eq!(table.allocate(), pack(1, 0));
        assert_eq!(table.allocate(), pack(2, 0));
    }

    #[test]
    fn tombstone_blocks_reuse_until_acknowledged() {
        let mut table = HandleTable::new();
        let first = table.allocate();
        table.release(first);

        // Slot 0 is reserved; a fresh allocation must not reuse it.
        assert_eq!(table.allocate(), pack(1, 0));

        table.acknowledge(first);
        let reused = table.allocate();
        assert_eq!(reused, pack(0, 1));
        assert_ne!(reused, first);
    }

    #[test]
    fn released_id_is_no_longer_live() {
        let mut table = HandleTable::new();
        let raw = table.allocate();
        assert!(table.is_live(raw));
        table.release(raw);
        assert!(!table.is_live(raw));
    }

    #[test]
    fn stale_generation_does_not_touch_the_new_occupant() {
        let mut table = HandleTable::new();
        let old = table.allocate();
        table.release(old);
        table.acknowledge(old);
        let new = table.allocate();

        // Operations addressed with the stale id must not affect the slot.
        table.release(old);
        assert!(table.is_live(new));
    }

    #[test]
    fn local_free_skips_the_round_trip() {
        let mut table = HandleTable::new();
        let raw = table.allocate();
        table.free_local(raw);
        assert_eq!(table.allocate(), pack(0, 1));
    }
}
