#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use uuid::Uuid;

use blelink::device::types::{CapabilitySlot, PeripheralRef};
use blelink::error::TransportError;
use blelink::transport::{Discovery, Transport, TransportLink};

pub fn peripheral(address: &str, name: &str) -> PeripheralRef {
    PeripheralRef {
        address: address.to_string(),
        display_name: Some(name.to_string()),
        advertisement: vec![0xff, 0x00, 0x01],
        rssi: Some(-48),
    }
}

/**
 * Discovery stand-in. Tests push advertisements through emit(); start/stop
 * calls are counted so tests can assert how often the backend was driven.
 */
pub struct MockDiscovery {
    fail_start: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    sender: Mutex<Option<UnboundedSender<PeripheralRef>>>,
}

impl MockDiscovery {
    pub fn new() -> MockDiscovery {
        MockDiscovery {
            fail_start: false,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            sender: Mutex::new(None),
        }
    }

    pub fn unavailable() -> MockDiscovery {
        MockDiscovery { fail_start: true, ..MockDiscovery::new() }
    }

    pub fn emit(&self, peripheral: PeripheralRef) {
        self.sender
            .lock()
            .expect("Failed to lock mock discovery sender")
            .as_ref()
            .expect("Discovery has not been started")
            .send(peripheral)
            .expect("Advertisement channel closed");
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn start_discovery(
        &self,
        results: UnboundedSender<PeripheralRef>,
    ) -> Result<(), TransportError> {
        if self.fail_start {
            return Err(TransportError::NoAdapter);
        }

        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sender.lock().expect("Failed to lock mock discovery sender") = Some(results);
        Ok(())
    }

    async fn stop_discovery(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().expect("Failed to lock mock discovery sender").take();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Opened { address: String },
    Resolved,
    Write { slot: Uuid, payload: Vec<u8> },
    Read { slot: Uuid },
    Closed,
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<LinkCall>>,
    fail_connects: AtomicUsize,
    fail_resolves: AtomicUsize,
    fail_writes: AtomicUsize,
    fail_reads: AtomicUsize,
    read_payload: Mutex<Vec<u8>>,
    connect_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockState {
    fn record(&self, call: LinkCall) {
        self.calls.lock().expect("Failed to lock mock call log").push(call);
    }
}

// spends one queued failure, if any
fn consume(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
        .is_ok()
}

/**
 * Transport stand-in. Records every link call so tests can assert exact write
 * payloads and that handles are released exactly once; failures are injected
 * per operation with the fail_next_* methods.
 */
pub struct MockTransport {
    slots: Vec<CapabilitySlot>,
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new(slots: Vec<CapabilitySlot>) -> MockTransport {
        MockTransport { slots, state: Arc::new(MockState::default()) }
    }

    pub fn fail_next_connect(&self) {
        self.state.fail_connects.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_next_resolve(&self) {
        self.state.fail_resolves.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_next_write(&self) {
        self.state.fail_writes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_next_read(&self) {
        self.state.fail_reads.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_read_payload(&self, payload: Vec<u8>) {
        *self.state.read_payload.lock().expect("Failed to lock mock read payload") = payload;
    }

    /**
     * Makes the next open() block until the returned sender fires, so a test
     * can hold the session in Connecting for as long as it needs.
     */
    pub fn hold_connect(&self) -> oneshot::Sender<()> {
        let (gate_tx, gate_rx) = oneshot::channel();
        *self.state.connect_gate.lock().expect("Failed to lock mock connect gate") = Some(gate_rx);
        gate_tx
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.state.calls.lock().expect("Failed to lock mock call log").clone()
    }

    pub fn opened_count(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, LinkCall::Opened { .. })).count()
    }

    pub fn closed_count(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, LinkCall::Closed)).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, peripheral: &PeripheralRef) -> Result<Box<dyn TransportLink>, TransportError> {
        let gate = self.state.connect_gate.lock().expect("Failed to lock mock connect gate").take();
        if let Some(gate) = gate {
            // a dropped gate sender releases the connect as well
            let _ = gate.await;
        }

        if consume(&self.state.fail_connects) {
            return Err(TransportError::Deadline { millis: 10_000 });
        }

        self.state.record(LinkCall::Opened { address: peripheral.address.clone() });
        Ok(Box::new(MockLink {
            slots: self.slots.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockLink {
    slots: Vec<CapabilitySlot>,
    state: Arc<MockState>,
}

#[async_trait]
impl TransportLink for MockLink {
    async fn resolve_capabilities(&mut self) -> Result<Vec<CapabilitySlot>, TransportError> {
        if consume(&self.state.fail_resolves) {
            return Err(TransportError::Deadline { millis: 2_000 });
        }

        self.state.record(LinkCall::Resolved);
        Ok(self.slots.clone())
    }

    async fn write(&mut self, slot: Uuid, payload: &[u8]) -> Result<(), TransportError> {
        if consume(&self.state.fail_writes) {
            return Err(TransportError::Deadline { millis: 2_000 });
        }

        self.state.record(LinkCall::Write { slot, payload: payload.to_vec() });
        Ok(())
    }

    async fn read(&mut self, slot: Uuid) -> Result<Vec<u8>, TransportError> {
        if consume(&self.state.fail_reads) {
            return Err(TransportError::Deadline { millis: 2_000 });
        }

        self.state.record(LinkCall::Read { slot });
        Ok(self.state.read_payload.lock().expect("Failed to lock mock read payload").clone())
    }

    async fn close(self: Box<Self>) {
        self.state.record(LinkCall::Closed);
    }
}
