//! Fixed-layout frame codec.
//!
//! Every frame is `{ kind: u16, size: u16, object_id: u64, serial: u32 }`
//! followed by a little-endian body, padded so `size` is a multiple of 8.
//! `size` counts the whole frame including the header. Strings are
//! `{ len: u32, bytes }`. The header id field carries whichever object the
//! frame addresses (buffer, fence, or queue — the kind decides); commands
//! that carry no serial leave that field zero.

use crate::frame::{command_kind, completion_kind};
use crate::{
    BufferDescriptor, BufferId, BufferUsage, Command, Completion, FenceId, MapStatus, QueueId,
    RequestSerial, WireError,
};

/// Frame header length in bytes.
pub const HEADER_LEN: usize = 16;

/// Largest encodable frame: the 16-bit length field, rounded down to the
/// 8-byte alignment grain.
pub const MAX_FRAME_LEN: usize = 65528;

/// Largest byte payload a read completion can carry. Map requests above
/// this are answered with a validation error instead of an unencodable
/// completion.
pub const MAX_MAP_PAYLOAD: u64 = (MAX_FRAME_LEN - HEADER_LEN - 16) as u64;

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn pad_frame(out: &mut Vec<u8>, frame_start: usize) {
    while (out.len() - frame_start) % 8 != 0 {
        out.push(0);
    }
}

/// Patch the header once the body length is known.
fn finish_frame(
    out: &mut Vec<u8>,
    frame_start: usize,
    kind: u16,
    id: u64,
    serial: u32,
) -> Result<(), WireError> {
    pad_frame(out, frame_start);
    let len = out.len() - frame_start;
    if len > MAX_FRAME_LEN {
        out.truncate(frame_start);
        return Err(WireError::FrameTooLarge(len));
    }
    out[frame_start..frame_start + 2].copy_from_slice(&kind.to_le_bytes());
    out[frame_start + 2..frame_start + 4].copy_from_slice(&(len as u16).to_le_bytes());
    out[frame_start + 4..frame_start + 12].copy_from_slice(&id.to_le_bytes());
    out[frame_start + 12..frame_start + 16].copy_from_slice(&serial.to_le_bytes());
    Ok(())
}

/// Append one command frame to `out`.
pub fn encode_command(cmd: &Command, out: &mut Vec<u8>) -> Result<(), WireError> {
    let start = out.len();
    out.extend_from_slice(&[0u8; HEADER_LEN]);
    let (kind, id, serial) = match cmd {
        Command::CreateBuffer { id, desc } => {
            put_u64(out, desc.size);
            put_u32(out, desc.usage.bits());
            let label = desc.label.as_deref().unwrap_or("");
            put_u32(out, label.len() as u32);
            out.extend_from_slice(label.as_bytes());
            (command_kind::CREATE_BUFFER, id.raw(), 0)
        }
        Command::MapRead {
            id,
            serial,
            offset,
            size,
        } => {
            put_u64(out, *offset);
            put_u64(out, *size);
            (command_kind::MAP_READ, id.raw(), serial.raw())
        }
        Command::MapWrite {
            id,
            serial,
            offset,
            size,
        } => {
            put_u64(out, *offset);
            put_u64(out, *size);
            (command_kind::MAP_WRITE, id.raw(), serial.raw())
        }
        Command::Unmap { id, write_payload } => {
            if let Some(bytes) = write_payload {
                put_u64(out, bytes.len() as u64);
                out.extend_from_slice(bytes);
            }
            (command_kind::UNMAP, id.raw(), 0)
        }
        Command::Release { id } => (command_kind::RELEASE, id.raw(), 0),
        Command::CreateQueue { id } => (command_kind::CREATE_QUEUE, id.raw(), 0),
        Command::CreateFence { id, initial_value } => {
            put_u64(out, *initial_value);
            (command_kind::CREATE_FENCE, id.raw(), 0)
        }
        Command::QueueSignal {
            queue,
            fence,
            value,
        } => {
            put_u64(out, fence.raw());
            put_u64(out, *value);
            (command_kind::QUEUE_SIGNAL, queue.raw(), 0)
        }
        Command::FenceRelease { id } => (command_kind::FENCE_RELEASE, id.raw(), 0),
        Command::QueueRelease { id } => (command_kind::QUEUE_RELEASE, id.raw(), 0),
    };
    finish_frame(out, start, kind, id, serial)
}

/// Append one completion frame to `out`.
pub fn encode_completion(completion: &Completion, out: &mut Vec<u8>) -> Result<(), WireError> {
    let start = out.len();
    out.extend_from_slice(&[0u8; HEADER_LEN]);
    let (kind, id, serial) = match completion {
        Completion::MapRead {
            id,
            serial,
            status,
            payload,
        } => {
            out.push(status.to_wire());
            out.extend_from_slice(&[0u8; 7]);
            put_u64(out, payload.len() as u64);
            out.extend_from_slice(payload);
            (completion_kind::MAP_READ, id.raw(), serial.raw())
        }
        Completion::MapWrite { id, serial, status } => {
            out.push(status.to_wire());
            out.extend_from_slice(&[0u8; 7]);
            (completion_kind::MAP_WRITE, id.raw(), serial.raw())
        }
        Completion::ReleaseAck { id } => (completion_kind::RELEASE_ACK, *id, 0),
        Completion::FenceCompletedValue { fence, value } => {
            put_u64(out, *value);
            (completion_kind::FENCE_COMPLETED_VALUE, fence.raw(), 0)
        }
    };
    finish_frame(out, start, kind, id, serial)
}

struct RawFrame<'a> {
    kind: u16,
    id: u64,
    serial: u32,
    body: &'a [u8],
}

/// Bounds-checked cursor over a frame body.
struct Body<'a> {
    rest: &'a [u8],
}

impl<'a> Body<'a> {
    fn new(body: &'a [u8]) -> Self {
        Self { rest: body }
    }

    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.rest.len() < len {
            return Err(WireError::Truncated);
        }
        let (taken, rest) = self.rest.split_at(len);
        self.rest = rest;
        Ok(taken)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn skip(&mut self, len: usize) -> Result<(), WireError> {
        self.bytes(len).map(|_| ())
    }
}

/// Walks a byte buffer frame by frame.
///
/// The caller picks the family per frame: the two directions of the wire
/// never share a buffer.
pub struct FrameReader<'a> {
    rest: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { rest: bytes }
    }

    /// True once every frame has been consumed.
    pub fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    fn next_raw(&mut self) -> Result<Option<RawFrame<'a>>, WireError> {
        if self.rest.is_empty() {
            return Ok(None);
        }
        if self.rest.len() < HEADER_LEN {
            return Err(WireError::Truncated);
        }
        let kind = u16::from_le_bytes([self.rest[0], self.rest[1]]);
        let size = u16::from_le_bytes([self.rest[2], self.rest[3]]);
        if size as usize % 8 != 0 || (size as usize) < HEADER_LEN {
            return Err(WireError::MisalignedLength(size));
        }
        if self.rest.len() < size as usize {
            return Err(WireError::Truncated);
        }
        let mut header = Body::new(&self.rest[4..HEADER_LEN]);
        let id = header.u64()?;
        let serial = header.u32()?;
        let body = &self.rest[HEADER_LEN..size as usize];
        self.rest = &self.rest[size as usize..];
        Ok(Some(RawFrame {
            kind,
            id,
            serial,
            body,
        }))
    }

    /// Decode the next command frame, or `None` at end of buffer.
    pub fn next_command(&mut self) -> Result<Option<Command>, WireError> {
        let Some(raw) = self.next_raw()? else {
            return Ok(None);
        };
        let mut body = Body::new(raw.body);
        let cmd = match raw.kind {
            command_kind::CREATE_BUFFER => {
                let size = body.u64()?;
                let usage = BufferUsage::from_bits_retain(body.u32()?);
                let label_len = body.u32()? as usize;
                let label_bytes = body.bytes(label_len)?;
                let label = if label_len == 0 {
                    None
                } else {
                    Some(String::from_utf8_lossy(label_bytes).into_owned())
                };
                Command::CreateBuffer {
                    id: BufferId::from(raw.id),
                    desc: BufferDescriptor { size, usage, label },
                }
            }
            command_kind::MAP_READ => Command::MapRead {
                id: BufferId::from(raw.id),
                serial: RequestSerial::new(raw.serial),
                offset: body.u64()?,
                size: body.u64()?,
            },
            command_kind::MAP_WRITE => Command::MapWrite {
                id: BufferId::from(raw.id),
                serial: RequestSerial::new(raw.serial),
                offset: body.u64()?,
                size: body.u64()?,
            },
            command_kind::UNMAP => {
                let write_payload = if body.is_empty() {
                    None
                } else {
                    let len = body.u64()? as usize;
                    Some(body.bytes(len)?.to_vec())
                };
                Command::Unmap {
                    id: BufferId::from(raw.id),
                    write_payload,
                }
            }
            command_kind::RELEASE => Command::Release {
                id: BufferId::from(raw.id),
            },
            command_kind::CREATE_QUEUE => Command::CreateQueue {
                id: QueueId::from(raw.id),
            },
            command_kind::CREATE_FENCE => Command::CreateFence {
                id: FenceId::from(raw.id),
                initial_value: body.u64()?,
            },
            command_kind::QUEUE_SIGNAL => Command::QueueSignal {
                queue: QueueId::from(raw.id),
                fence: FenceId::from(body.u64()?),
                value: body.u64()?,
            },
            command_kind::FENCE_RELEASE => Command::FenceRelease {
                id: FenceId::from(raw.id),
            },
            command_kind::QUEUE_RELEASE => Command::QueueRelease {
                id: QueueId::from(raw.id),
            },
            other => return Err(WireError::UnknownFrameKind(other)),
        };
        Ok(Some(cmd))
    }

    /// Decode the next completion frame, or `None` at end of buffer.
    pub fn next_completion(&mut self) -> Result<Option<Completion>, WireError> {
        let Some(raw) = self.next_raw()? else {
            return Ok(None);
        };
        let mut body = Body::new(raw.body);
        let completion = match raw.kind {
            completion_kind::MAP_READ => {
                let status = MapStatus::from_wire(body.u8()?)?;
                body.skip(7)?;
                let len = body.u64()? as usize;
                let payload = body.bytes(len)?.to_vec();
                Completion::MapRead {
                    id: BufferId::from(raw.id),
                    serial: RequestSerial::new(raw.serial),
                    status,
                    payload,
                }
            }
            completion_kind::MAP_WRITE => {
                let status = MapStatus::from_wire(body.u8()?)?;
                Completion::MapWrite {
                    id: BufferId::from(raw.id),
                    serial: RequestSerial::new(raw.serial),
                    status,
                }
            }
            completion_kind::RELEASE_ACK => Completion::ReleaseAck { id: raw.id },
            completion_kind::FENCE_COMPLETED_VALUE => Completion::FenceCompletedValue {
                fence: FenceId::from(raw.id),
                value: body.u64()?,
            },
            other => return Err(WireError::UnknownFrameKind(other)),
        };
        Ok(Some(completion))
    }
}
