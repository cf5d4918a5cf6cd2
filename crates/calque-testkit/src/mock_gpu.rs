//! A scripted in-memory GPU backend.

use std::collections::{HashMap, VecDeque};

use calque_server::{FenceDone, Gpu, MapDone};
use calque_wire::BufferDescriptor;

/// Scripted reply for the next map request reaching the backend.
///
/// With an empty script the backend settles every map successfully from
/// inside the map call, which matches the common immediate-completion
/// path.
#[derive(Debug, Clone, Copy)]
pub enum MapReply {
    Success,
    Error,
    /// Keep the completion handle; the test settles it later through
    /// [`MockGpu::settle_held`] or [`MockGpu::fail_held`].
    Hold,
}

/// Backing store for one native buffer.
#[derive(Debug)]
pub struct MockBuffer {
    pub data: Vec<u8>,
    pub mapped: bool,
    pub unmap_calls: usize,
}

struct HeldMap {
    handle: u64,
    offset: u64,
    size: u64,
    read: bool,
    done: MapDone,
}

/// In-memory [`Gpu`] with scriptable creation failures and map replies.
///
/// Fence signals settle successfully from inside the signal call, the
/// immediate-completion path a real backend takes when the queue is
/// already drained.
#[derive(Default)]
pub struct MockGpu {
    next_handle: u64,
    buffers: HashMap<u64, MockBuffer>,
    fences: HashMap<u64, u64>,
    queues: HashMap<u64, ()>,
    last_created: Option<u64>,
    create_script: VecDeque<bool>,
    map_script: VecDeque<MapReply>,
    held: Vec<HeldMap>,
    destroyed: Vec<u64>,
    destroyed_fences: Vec<u64>,
    destroyed_queues: Vec<u64>,
    signals: Vec<(u64, u64, u64)>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_buffer` call fail.
    pub fn fail_next_create(&mut self) {
        self.create_script.push_back(false);
    }

    /// Script the reply for the next map request.
    pub fn expect_map(&mut self, reply: MapReply) {
        self.map_script.push_back(reply);
    }

    /// Handle of the most recently created object.
    pub fn last_created(&self) -> u64 {
        self.last_created.expect("no object created yet")
    }

    /// Backing bytes of a native buffer.
    pub fn data(&self, handle: u64) -> &[u8] {
        &self.buffers[&handle].data
    }

    /// Mutable backing bytes, for seeding server-side contents.
    pub fn data_mut(&mut self, handle: u64) -> &mut [u8] {
        &mut self
            .buffers
            .get_mut(&handle)
            .expect("unknown mock buffer")
            .data
    }

    /// Native unmap calls observed on a buffer.
    pub fn unmap_calls(&self, handle: u64) -> usize {
        self.buffers[&handle].unmap_calls
    }

    /// Buffer handles destroyed through the fenced deleter, in order.
    pub fn destroyed(&self) -> &[u64] {
        &self.destroyed
    }

    /// Fence handles destroyed on release, in order.
    pub fn destroyed_fences(&self) -> &[u64] {
        &self.destroyed_fences
    }

    /// Queue handles destroyed on release, in order.
    pub fn destroyed_queues(&self) -> &[u64] {
        &self.destroyed_queues
    }

    /// Every `(queue, fence, value)` signal observed, in order.
    pub fn signals(&self) -> &[(u64, u64, u64)] {
        &self.signals
    }

    /// True while a map request is held unsettled.
    pub fn has_held_maps(&self) -> bool {
        !self.held.is_empty()
    }

    /// Settle every held map successfully.
    pub fn settle_held(&mut self) {
        for held in std::mem::take(&mut self.held) {
            let bytes = if held.read {
                let data = &self.buffers[&held.handle].data;
                data[held.offset as usize..(held.offset + held.size) as usize].to_vec()
            } else {
                Vec::new()
            };
            if let Some(buffer) = self.buffers.get_mut(&held.handle) {
                buffer.mapped = true;
            }
            held.done.success(bytes);
        }
    }

    /// Fail every held map.
    pub fn fail_held(&mut self) {
        for held in std::mem::take(&mut self.held) {
            held.done.error();
        }
    }

    fn fresh_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.last_created = Some(handle);
        handle
    }

    fn map(&mut self, handle: u64, offset: u64, size: u64, read: bool, done: MapDone) {
        let reply = self.map_script.pop_front().unwrap_or(MapReply::Success);
        match reply {
            MapReply::Success => {
                let bytes = if read {
                    let data = &self.buffers[&handle].data;
                    data[offset as usize..(offset + size) as usize].to_vec()
                } else {
                    Vec::new()
                };
                self.buffers
                    .get_mut(&handle)
                    .expect("unknown mock buffer")
                    .mapped = true;
                done.success(bytes);
            }
            MapReply::Error => done.error(),
            MapReply::Hold => self.held.push(HeldMap {
                handle,
                offset,
                size,
                read,
                done,
            }),
        }
    }
}

impl Gpu for MockGpu {
    type Buffer = u64;
    type Fence = u64;
    type Queue = u64;

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Option<Self::Buffer> {
        if !self.create_script.pop_front().unwrap_or(true) {
            return None;
        }
        let handle = self.fresh_handle();
        self.buffers.insert(
            handle,
            MockBuffer {
                data: vec![0; desc.size as usize],
                mapped: false,
                unmap_calls: 0,
            },
        );
        Some(handle)
    }

    fn map_read_async(&mut self, buffer: &mut Self::Buffer, offset: u64, size: u64, done: MapDone) {
        self.map(*buffer, offset, size, true, done);
    }

    fn map_write_async(
        &mut self,
        buffer: &mut Self::Buffer,
        offset: u64,
        size: u64,
        done: MapDone,
    ) {
        self.map(*buffer, offset, size, false, done);
    }

    fn write_mapped(&mut self, buffer: &mut Self::Buffer, offset: u64, bytes: &[u8]) {
        let data = &mut self
            .buffers
            .get_mut(buffer)
            .expect("unknown mock buffer")
            .data;
        data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
    }

    fn unmap(&mut self, buffer: &mut Self::Buffer) {
        let entry = self
            .buffers
            .get_mut(buffer)
            .expect("unknown mock buffer");
        entry.mapped = false;
        entry.unmap_calls += 1;
    }

    fn destroy(&mut self, buffer: Self::Buffer) {
        self.buffers.remove(&buffer);
        self.destroyed.push(buffer);
    }

    fn create_fence(&mut self, initial_value: u64) -> Option<Self::Fence> {
        let handle = self.fresh_handle();
        self.fences.insert(handle, initial_value);
        Some(handle)
    }

    fn create_queue(&mut self) -> Option<Self::Queue> {
        let handle = self.fresh_handle();
        self.queues.insert(handle, ());
        Some(handle)
    }

    fn queue_signal(
        &mut self,
        queue: &mut Self::Queue,
        fence: &mut Self::Fence,
        value: u64,
        done: FenceDone,
    ) {
        self.signals.push((*queue, *fence, value));
        self.fences.insert(*fence, value);
        done.success();
    }

    fn destroy_fence(&mut self, fence: Self::Fence) {
        self.fences.remove(&fence);
        self.destroyed_fences.push(fence);
    }

    fn destroy_queue(&mut self, queue: Self::Queue) {
        self.queues.remove(&queue);
        self.destroyed_queues.push(queue);
    }
}
