//! Wire teardown: fatal decode errors drain everything with Unknown,
//! exactly once, and the errored flag sticks.

use calque_client::{BufferDescriptor, BufferUsage, MapStatus};
use calque_testkit::{mock_harness, CallbackSink, MapEvent, MapReply};
use calque_wire::{
    encode_command, encode_completion, BufferId, Command, Completion, RequestSerial, WireError,
};

#[test]
fn decode_error_drains_pending_maps_with_unknown_exactly_once() {
    let mut harness = mock_harness();
    let buffer = harness
        .device
        .create_buffer(&BufferDescriptor::new(64, BufferUsage::MAP_READ));
    harness.flush_client().unwrap();
    harness.server.gpu_mut().expect_map(MapReply::Hold);

    let sink = CallbackSink::new();
    buffer.map_read_async(0, 4, sink.callback(), 7);
    harness.flush_client().unwrap();

    // A 16-byte header whose length field is not 8-aligned.
    let mut garbage = vec![0u8; 16];
    garbage[0..2].copy_from_slice(&1u16.to_le_bytes());
    garbage[2..4].copy_from_slice(&21u16.to_le_bytes());
    let err = harness.inject_completions(&garbage).unwrap_err();
    assert_eq!(err, WireError::MisalignedLength(21));

    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Unknown,
            data: None,
            userdata: 7,
        }]
    );
    assert!(harness.device.wire_errored());
    assert_eq!(harness.device.pending_maps(), 0);

    // Sticky: every further dispatch fails fast with the original error.
    assert_eq!(harness.flush_server(), Err(WireError::MisalignedLength(21)));

    // New requests on the dead wire resolve Unknown at the call site.
    buffer.map_read_async(0, 4, sink.callback(), 8);
    assert_eq!(sink.len(), 2);
    assert_eq!(sink.events()[1].status, MapStatus::Unknown);
    assert_eq!(sink.events()[1].userdata, 8);

    // And unmap is a no-op that puts nothing on the wire.
    buffer.unmap();
    assert!(harness.device.take_commands().is_empty());
}

#[test]
fn teardown_drains_multiple_buffers_in_registration_order() {
    let mut harness = mock_harness();
    let first = harness
        .device
        .create_buffer(&BufferDescriptor::new(64, BufferUsage::MAP_READ));
    let second = harness
        .device
        .create_buffer(&BufferDescriptor::new(64, BufferUsage::MAP_READ));
    harness.flush_client().unwrap();
    harness.server.gpu_mut().expect_map(MapReply::Hold);
    harness.server.gpu_mut().expect_map(MapReply::Hold);

    let sink = CallbackSink::new();
    second.map_read_async(0, 4, sink.callback(), 20);
    first.map_read_async(0, 4, sink.callback(), 10);
    harness.flush_client().unwrap();

    let err = harness.inject_completions(&[5]).unwrap_err();
    assert_eq!(err, WireError::Truncated);

    let userdata: Vec<_> = sink.events().iter().map(|e| e.userdata).collect();
    assert_eq!(userdata, vec![20, 10]);
    assert!(sink
        .events()
        .iter()
        .all(|e| e.status == MapStatus::Unknown));
}

#[test]
fn truncated_completion_stream_is_fatal() {
    let mut harness = mock_harness();
    let err = harness.inject_completions(&[1, 0]).unwrap_err();
    assert_eq!(err, WireError::Truncated);
    assert!(harness.device.wire_errored());
}

#[test]
fn unknown_command_kind_poisons_the_server() {
    let mut harness = mock_harness();
    let mut bytes = Vec::new();
    encode_command(
        &Command::Release {
            id: BufferId::from_parts(0, 0),
        },
        &mut bytes,
    )
    .unwrap();
    bytes[0..2].copy_from_slice(&77u16.to_le_bytes());

    let err = harness.inject_commands(&bytes).unwrap_err();
    assert_eq!(err, WireError::UnknownFrameKind(77));
    assert_eq!(harness.server.wire_error(), Some(err));

    // Sticky: a later flush refuses to process anything.
    assert_eq!(harness.flush_client(), Err(err));
}

#[test]
fn frames_after_the_corrupt_one_are_never_processed() {
    let mut harness = mock_harness();
    let buffer = harness
        .device
        .create_buffer(&BufferDescriptor::new(64, BufferUsage::MAP_READ));
    harness.flush_client().unwrap();
    harness.server.gpu_mut().expect_map(MapReply::Hold);

    let sink = CallbackSink::new();
    buffer.map_read_async(0, 4, sink.callback(), 1);
    harness.flush_client().unwrap();

    // Garbage followed by a perfectly valid success frame for the pending
    // request: the corruption kills the wire first, so the request drains
    // as Unknown and the success is never seen.
    let mut bytes = vec![0u8; 16];
    bytes[2..4].copy_from_slice(&12u16.to_le_bytes());
    encode_completion(
        &Completion::MapRead {
            id: buffer.id(),
            serial: RequestSerial::new(0),
            status: MapStatus::Success,
            payload: vec![0; 4],
        },
        &mut bytes,
    )
    .unwrap();

    let err = harness.inject_completions(&bytes).unwrap_err();
    assert_eq!(err, WireError::MisalignedLength(12));

    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0].status, MapStatus::Unknown);
    assert_eq!(harness.flush_server(), Err(err));
    assert_eq!(sink.len(), 1);
}
