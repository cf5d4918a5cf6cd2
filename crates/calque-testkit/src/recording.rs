//! Recording callback sink.
//!
//! The production path forbids process-wide state, so tests inject one of
//! these per scenario and assert on the recorded invocations.

use std::sync::Arc;

use parking_lot::Mutex;

use calque_client::{
    ErrorCallback, FenceCallback, FenceStatus, MapCallback, MapStatus, Userdata,
};

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEvent {
    pub status: MapStatus,
    /// Snapshot of the delivered read bytes, if any.
    pub data: Option<Vec<u8>>,
    pub userdata: Userdata,
}

/// Collects every callback invocation, in delivery order.
#[derive(Clone, Default)]
pub struct CallbackSink {
    events: Arc<Mutex<Vec<MapEvent>>>,
}

impl CallbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh one-shot callback recording into this sink.
    pub fn callback(&self) -> MapCallback {
        let events = self.events.clone();
        Box::new(move |status, data, userdata| {
            events.lock().push(MapEvent {
                status,
                data: data.read_bytes().map(<[u8]>::to_vec),
                userdata,
            });
        })
    }

    /// Like [`callback`](CallbackSink::callback), but runs `action` after
    /// recording. Used for reentrancy scenarios: the action typically
    /// calls `unmap` or `release` on the buffer that is being delivered.
    pub fn callback_then(&self, action: impl FnOnce() + Send + 'static) -> MapCallback {
        let events = self.events.clone();
        Box::new(move |status, data, userdata| {
            events.lock().push(MapEvent {
                status,
                data: data.read_bytes().map(<[u8]>::to_vec),
                userdata,
            });
            action();
        })
    }

    /// Every invocation recorded so far, in order.
    pub fn events(&self) -> Vec<MapEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One recorded fence-wait resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceEvent {
    pub status: FenceStatus,
    pub userdata: Userdata,
}

/// Collects every fence callback invocation, in delivery order.
#[derive(Clone, Default)]
pub struct FenceSink {
    events: Arc<Mutex<Vec<FenceEvent>>>,
}

impl FenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh one-shot callback recording into this sink.
    pub fn callback(&self) -> FenceCallback {
        let events = self.events.clone();
        Box::new(move |status, userdata| {
            events.lock().push(FenceEvent { status, userdata });
        })
    }

    /// Every invocation recorded so far, in order.
    pub fn events(&self) -> Vec<FenceEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Collects device validation-error reports.
#[derive(Clone, Default)]
pub struct ErrorSink {
    reports: Arc<Mutex<Vec<(String, Userdata)>>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reusable callback recording into this sink, for
    /// `Device::set_error_callback`.
    pub fn callback(&self) -> ErrorCallback {
        let reports = self.reports.clone();
        Box::new(move |message, userdata| {
            reports.lock().push((message.to_string(), userdata));
        })
    }

    /// Every `(message, userdata)` report so far, in order.
    pub fn reports(&self) -> Vec<(String, Userdata)> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
