//! Buffer mapping end-to-end: request, completion, cancellation,
//! reentrancy. Each test alternates client and server flushes, so the
//! event order it asserts on is the only order that can occur.

use std::sync::Arc;

use parking_lot::Mutex;

use calque_client::{BufferDescriptor, BufferUsage, ClientBuffer, MapStatus};
use calque_testkit::{init_tracing, mock_harness, CallbackSink, MapEvent, MapReply, MockGpu, WireHarness};

const WORD: u32 = 31337;

/// Create a 64-byte buffer and flush its creation to the server.
fn new_buffer(harness: &mut WireHarness<MockGpu>, usage: BufferUsage) -> (ClientBuffer, u64) {
    let buffer = harness.device.create_buffer(&BufferDescriptor::new(64, usage));
    harness.flush_client().unwrap();
    (buffer, harness.server.gpu().last_created())
}

/// Seed the server-side word at offset 40.
fn seed_word(harness: &mut WireHarness<MockGpu>, handle: u64, word: u32) {
    harness.server.gpu_mut().data_mut(handle)[40..44].copy_from_slice(&word.to_le_bytes());
}

// Read mapping

#[test]
fn read_map_delivers_server_bytes_exactly_once() {
    init_tracing();
    let mut harness = mock_harness();
    let (buffer, handle) = new_buffer(&mut harness, BufferUsage::MAP_READ);
    seed_word(&mut harness, handle, WORD);

    let sink = CallbackSink::new();
    buffer.map_read_async(40, 4, sink.callback(), 8653);
    harness.flush_client().unwrap();
    // Callbacks only run during the server flush.
    assert!(sink.is_empty());
    harness.flush_server().unwrap();

    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Success,
            data: Some(WORD.to_le_bytes().to_vec()),
            userdata: 8653,
        }]
    );

    // The read view stays reachable until unmap.
    {
        let range = buffer.mapped_range().unwrap();
        assert_eq!(&range[..], WORD.to_le_bytes().as_slice());
    }

    buffer.unmap();
    harness.flush_client().unwrap();
    assert_eq!(harness.server.gpu().unmap_calls(handle), 1);
    assert!(buffer.mapped_range().is_none());

    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
}

#[test]
fn read_map_validation_error_delivers_error_without_data() {
    let mut harness = mock_harness();
    let (buffer, _) = new_buffer(&mut harness, BufferUsage::MAP_READ);
    harness.server.gpu_mut().expect_map(MapReply::Error);

    let sink = CallbackSink::new();
    buffer.map_read_async(40, 4, sink.callback(), 8654);
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();

    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Error,
            data: None,
            userdata: 8654,
        }]
    );
    assert!(buffer.mapped_range().is_none());
}

#[test]
fn read_map_on_error_buffer_synthesizes_error_with_no_wire_traffic() {
    let mut harness = mock_harness();
    let buffer = harness.device.create_error_buffer();

    let sink = CallbackSink::new();
    buffer.map_read_async(40, 4, sink.callback(), 8655);
    assert!(
        harness.device.take_commands().is_empty(),
        "error-local map must not reach the wire"
    );

    harness.flush_client().unwrap();
    harness.flush_server().unwrap();
    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Error,
            data: None,
            userdata: 8655,
        }]
    );

    // Unmap on an error buffer is a no-op with no frame.
    buffer.unmap();
    assert!(harness.device.take_commands().is_empty());
}

#[test]
fn map_on_a_zero_size_buffer_synthesizes_error_with_no_wire_traffic() {
    let mut harness = mock_harness();
    let buffer = harness
        .device
        .create_buffer(&BufferDescriptor::new(0, BufferUsage::MAP_READ));
    assert!(
        harness.device.take_commands().is_empty(),
        "zero-size creation must not reach the wire"
    );

    let sink = CallbackSink::new();
    buffer.map_read_async(0, 4, sink.callback(), 8658);
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();

    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Error,
            data: None,
            userdata: 8658,
        }]
    );

    buffer.unmap();
    assert!(harness.device.take_commands().is_empty());
}

#[test]
fn release_before_read_completion_synthesizes_unknown_before_returning() {
    let mut harness = mock_harness();
    let buffer = harness.device.create_error_buffer();

    let sink = CallbackSink::new();
    buffer.map_read_async(40, 4, sink.callback(), 8656);
    buffer.clone().release();

    // Synthesized before release returned, not at some later flush.
    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Unknown,
            data: None,
            userdata: 8656,
        }]
    );

    // The queued local completion finds its slot gone and is dropped.
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
}

#[test]
fn unmap_racing_a_successful_read_completion_wins() {
    let mut harness = mock_harness();
    let (buffer, handle) = new_buffer(&mut harness, BufferUsage::MAP_READ);
    seed_word(&mut harness, handle, WORD);

    let sink = CallbackSink::new();
    buffer.map_read_async(40, 4, sink.callback(), 8657);
    harness.flush_client().unwrap();
    // The success frame is sitting in the inbound queue...
    assert!(harness.inbound_len() > 0);

    // ...but the user unmaps first.
    buffer.unmap();
    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Unknown,
            data: None,
            userdata: 8657,
        }]
    );

    // The late frame is dropped; no second callback.
    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);

    harness.flush_client().unwrap();
    assert_eq!(harness.server.gpu().unmap_calls(handle), 1);
}

#[test]
fn read_map_error_while_already_mapped_leaves_the_mapping_intact() {
    let mut harness = mock_harness();
    let (buffer, handle) = new_buffer(&mut harness, BufferUsage::MAP_READ);
    seed_word(&mut harness, handle, WORD);

    let sink = CallbackSink::new();
    buffer.map_read_async(40, 4, sink.callback(), 34098);
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();

    // Second map while mapped: the server's validation answers Error.
    buffer.map_read_async(40, 4, sink.callback(), 34099);
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();

    assert_eq!(
        sink.events(),
        vec![
            MapEvent {
                status: MapStatus::Success,
                data: Some(WORD.to_le_bytes().to_vec()),
                userdata: 34098,
            },
            MapEvent {
                status: MapStatus::Error,
                data: None,
                userdata: 34099,
            },
        ]
    );
    // The redundant request's failure did not disturb the live mapping.
    assert!(buffer.mapped_range().is_some());
}

#[test]
fn unmap_inside_read_callback_sends_exactly_one_unmap() {
    let mut harness = mock_harness();
    let (buffer, handle) = new_buffer(&mut harness, BufferUsage::MAP_READ);
    seed_word(&mut harness, handle, WORD);

    let sink = CallbackSink::new();
    let reentrant = buffer.clone();
    buffer.map_read_async(40, 4, sink.callback_then(move || reentrant.unmap()), 2039);
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0].status, MapStatus::Success);

    harness.flush_client().unwrap();
    assert_eq!(harness.server.gpu().unmap_calls(handle), 1);

    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
}

#[test]
fn release_inside_read_callback_fires_no_second_callback() {
    let mut harness = mock_harness();
    let (buffer, handle) = new_buffer(&mut harness, BufferUsage::MAP_READ);
    seed_word(&mut harness, handle, WORD);

    let sink = CallbackSink::new();
    let reentrant = buffer.clone();
    buffer.map_read_async(40, 4, sink.callback_then(move || reentrant.release()), 2039);
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0].status, MapStatus::Success);

    harness.flush_client().unwrap();
    assert_eq!(harness.server.pending_destructions(), 1);

    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
}

// Write mapping

#[test]
fn write_map_round_trips_user_bytes_to_the_server() {
    init_tracing();
    let mut harness = mock_harness();
    let (buffer, handle) = new_buffer(&mut harness, BufferUsage::MAP_WRITE);
    seed_word(&mut harness, handle, WORD);

    let sink = CallbackSink::new();
    let probe = buffer.clone();
    let staging_zeroed = Arc::new(Mutex::new(None));
    let observed = staging_zeroed.clone();
    buffer.map_write_async(
        40,
        4,
        sink.callback_then(move || {
            // The staging region the callback sees is zero-initialized,
            // whatever the server holds.
            let range = probe.mapped_range_mut().unwrap();
            *observed.lock() = Some(range.iter().all(|byte| *byte == 0));
        }),
        8653,
    );
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();

    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Success,
            data: None,
            userdata: 8653,
        }]
    );
    assert_eq!(*staging_zeroed.lock(), Some(true));

    // Write through the staging region, then unmap carries it back.
    buffer
        .mapped_range_mut()
        .unwrap()
        .copy_from_slice(&4242u32.to_le_bytes());
    buffer.unmap();
    harness.flush_client().unwrap();

    assert_eq!(
        &harness.server.gpu().data(handle)[40..44],
        4242u32.to_le_bytes().as_slice()
    );
    assert_eq!(harness.server.gpu().unmap_calls(handle), 1);
}

#[test]
fn write_map_validation_error_delivers_error() {
    let mut harness = mock_harness();
    let (buffer, _) = new_buffer(&mut harness, BufferUsage::MAP_WRITE);
    harness.server.gpu_mut().expect_map(MapReply::Error);

    let sink = CallbackSink::new();
    buffer.map_write_async(40, 4, sink.callback(), 8654);
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();

    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Error,
            data: None,
            userdata: 8654,
        }]
    );
    assert!(buffer.mapped_range_mut().is_none());
}

#[test]
fn write_map_on_error_buffer_synthesizes_error_locally() {
    let mut harness = mock_harness();
    let buffer = harness.device.create_error_buffer();

    let sink = CallbackSink::new();
    buffer.map_write_async(40, 4, sink.callback(), 8655);
    assert!(harness.device.take_commands().is_empty());

    harness.flush_client().unwrap();
    harness.flush_server().unwrap();
    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Error,
            data: None,
            userdata: 8655,
        }]
    );

    buffer.unmap();
    assert!(harness.device.take_commands().is_empty());
}

#[test]
fn release_before_write_completion_synthesizes_unknown() {
    let mut harness = mock_harness();
    let buffer = harness.device.create_error_buffer();

    let sink = CallbackSink::new();
    buffer.map_write_async(40, 4, sink.callback(), 8656);
    buffer.release();

    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Unknown,
            data: None,
            userdata: 8656,
        }]
    );

    harness.flush_client().unwrap();
    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
}

#[test]
fn unmap_racing_a_successful_write_completion_wins() {
    let mut harness = mock_harness();
    let (buffer, _) = new_buffer(&mut harness, BufferUsage::MAP_WRITE);

    let sink = CallbackSink::new();
    buffer.map_write_async(40, 4, sink.callback(), 8657);
    harness.flush_client().unwrap();
    assert!(harness.inbound_len() > 0);

    buffer.unmap();
    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Unknown,
            data: None,
            userdata: 8657,
        }]
    );

    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
}

#[test]
fn unmap_inside_write_callback_sends_exactly_one_unmap() {
    let mut harness = mock_harness();
    let (buffer, handle) = new_buffer(&mut harness, BufferUsage::MAP_WRITE);

    let sink = CallbackSink::new();
    let reentrant = buffer.clone();
    buffer.map_write_async(40, 4, sink.callback_then(move || reentrant.unmap()), 2039);
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);

    harness.flush_client().unwrap();
    assert_eq!(harness.server.gpu().unmap_calls(handle), 1);

    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
}

#[test]
fn release_inside_write_callback_fires_no_second_callback() {
    let mut harness = mock_harness();
    let (buffer, _) = new_buffer(&mut harness, BufferUsage::MAP_WRITE);

    let sink = CallbackSink::new();
    let reentrant = buffer.clone();
    buffer.map_write_async(40, 4, sink.callback_then(move || reentrant.release()), 2039);
    harness.flush_client().unwrap();
    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);

    harness.flush_client().unwrap();
    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 1);
}

// Redundant requests

#[test]
fn map_while_a_request_is_in_flight_is_refused_but_still_resolves() {
    let mut harness = mock_harness();
    let (buffer, _) = new_buffer(&mut harness, BufferUsage::MAP_READ);
    harness.server.gpu_mut().expect_map(MapReply::Hold);

    let sink = CallbackSink::new();
    buffer.map_read_async(0, 4, sink.callback(), 1);
    buffer.map_read_async(0, 4, sink.callback(), 2);
    harness.flush_client().unwrap();

    // The redundant request was refused immediately.
    harness.flush_server().unwrap();
    assert_eq!(
        sink.events(),
        vec![MapEvent {
            status: MapStatus::Error,
            data: None,
            userdata: 2,
        }]
    );

    // The original request settles on its own schedule.
    harness.server.gpu_mut().settle_held();
    harness.pump_server();
    harness.flush_server().unwrap();
    assert_eq!(sink.len(), 2);
    assert_eq!(sink.events()[1].status, MapStatus::Success);
    assert_eq!(sink.events()[1].userdata, 1);
}
