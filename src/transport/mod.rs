use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::device::types::{CapabilitySlot, PeripheralRef};
use crate::error::TransportError;

pub mod btle;

/**
 * Produces advertisement reports for nearby peripherals. Reports are pushed
 * into the sender handed to start_discovery until stop_discovery is called;
 * the scan controller pairs every start with a stop.
 */
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn start_discovery(
        &self,
        results: UnboundedSender<PeripheralRef>,
    ) -> Result<(), TransportError>;

    async fn stop_discovery(&self);
}

/**
 * Opens links to peripherals. A link is an exclusive connection handle; the
 * session controller owns at most one at a time.
 */
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, peripheral: &PeripheralRef) -> Result<Box<dyn TransportLink>, TransportError>;
}

/**
 * One open connection. Closing consumes the link, so a handle can never be
 * released twice.
 */
#[async_trait]
pub trait TransportLink: Send {
    async fn resolve_capabilities(&mut self) -> Result<Vec<CapabilitySlot>, TransportError>;

    async fn write(&mut self, slot: Uuid, payload: &[u8]) -> Result<(), TransportError>;

    async fn read(&mut self, slot: Uuid) -> Result<Vec<u8>, TransportError>;

    async fn close(self: Box<Self>);
}
