#![deny(unsafe_code)]

//! Deterministic in-process pairing of a calque client and server.
//!
//! This crate is the semantic reference for the protocol: the harness
//! joins the two endpoints with plain in-memory queues, so a test that
//! alternates [`WireHarness::flush_client`] and
//! [`WireHarness::flush_server`] observes a total order on every event the
//! wire can produce. Anything a real embedding does must be explainable in
//! terms of what happens here.

mod harness;
mod mock_gpu;
mod recording;

pub use harness::{init_tracing, mock_harness, WireHarness};
pub use mock_gpu::{MapReply, MockBuffer, MockGpu};
pub use recording::{CallbackSink, ErrorSink, FenceEvent, FenceSink, MapEvent};
