//! The flush loop.

use std::sync::Once;

use calque_client::Device;
use calque_server::{Gpu, WireServer};
use calque_wire::WireError;

use crate::mock_gpu::MockGpu;

/// Client and server endpoints joined by in-process queues.
///
/// The flush primitives are the protocol's only blocking points; joined
/// in-process they are plain synchronous calls, which is exactly what
/// makes event order total and the tests deterministic.
pub struct WireHarness<G: Gpu> {
    pub device: Device,
    pub server: WireServer<G>,
    inbound: Vec<u8>,
}

impl<G: Gpu> WireHarness<G> {
    pub fn new(gpu: G) -> Self {
        Self {
            device: Device::new(),
            server: WireServer::new(gpu),
            inbound: Vec::new(),
        }
    }

    /// Drain buffered commands into the server. Completion frames the
    /// server produces while handling them (including immediately-settled
    /// native maps) are appended to the inbound queue before this returns.
    pub fn flush_client(&mut self) -> Result<(), WireError> {
        let commands = self.device.take_commands();
        let result = self.server.handle_commands(&commands);
        self.inbound.extend(self.server.take_completions());
        result
    }

    /// Dispatch every queued completion frame to user callbacks.
    pub fn flush_server(&mut self) -> Result<(), WireError> {
        let frames = std::mem::take(&mut self.inbound);
        self.device.dispatch_completions(&frames)
    }

    /// Reconcile native completions that settled outside command handling
    /// (a held mock map, a real backend's interrupt) into the inbound
    /// queue.
    pub fn pump_server(&mut self) {
        self.server.pump_native();
        self.inbound.extend(self.server.take_completions());
    }

    /// Bytes currently queued for the next server flush.
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Feed raw bytes to the server, as if the wire delivered them.
    pub fn inject_commands(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let result = self.server.handle_commands(bytes);
        self.inbound.extend(self.server.take_completions());
        result
    }

    /// Feed raw completion bytes to the client, as if the wire delivered
    /// them.
    pub fn inject_completions(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.device.dispatch_completions(bytes)
    }
}

/// A harness over the scripted mock backend.
pub fn mock_harness() -> WireHarness<MockGpu> {
    WireHarness::new(MockGpu::new())
}

static INIT_TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber, once per process.
/// Controlled with `RUST_LOG` as usual.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
