use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::{CONNECT_DEADLINE, READ_DEADLINE, WRITE_DEADLINE};
use crate::device::types::{CapabilitySlot, PeripheralRef};
use crate::error::TransportError;
use crate::transport::{Discovery, Transport, TransportLink};

async fn pick_adapter(manager: &Manager) -> Result<Adapter, TransportError> {
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

async fn with_deadline<T>(
    millis: u64,
    operation: impl Future<Output = Result<T, btleplug::Error>> + Send,
) -> Result<T, TransportError> {
    tokio::select! {
        _ = sleep(Duration::from_millis(millis)) => {
            Err(TransportError::Deadline { millis })
        },
        result = operation => {
            Ok(result?)
        },
    }
}

/**
 * Discovery over the first bluetooth adapter btleplug reports. Scans without a
 * service filter, so every nearby peripheral is reported.
 */
pub struct BtleDiscovery {
    manager: Manager,
    scan: Mutex<Option<ScanTask>>,
}

struct ScanTask {
    adapter: Adapter,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl BtleDiscovery {
    pub async fn new() -> Result<BtleDiscovery, TransportError> {
        let manager = Manager::new().await?;
        Ok(BtleDiscovery { manager, scan: Mutex::new(None) })
    }
}

#[async_trait]
impl Discovery for BtleDiscovery {
    async fn start_discovery(
        &self,
        results: UnboundedSender<PeripheralRef>,
    ) -> Result<(), TransportError> {
        let adapter = pick_adapter(&self.manager).await?;
        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        let events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;

        let cancel = CancellationToken::new();
        let pump = discovery_pump(cancel.clone(), adapter.clone(), events, results);
        *self.scan.lock().expect("Failed to lock discovery scan state") = Some(ScanTask { adapter, cancel, pump });

        Ok(())
    }

    async fn stop_discovery(&self) {
        let scan = self.scan.lock().expect("Failed to lock discovery scan state").take();
        let Some(scan) = scan else {
            return;
        };

        scan.cancel.cancel();
        if let Err(err) = scan.adapter.stop_scan().await {
            warn!("Failed to stop scanning: {:?}", err);
        }
        scan.pump.await.expect("Failed to join discovery pump task");
    }
}

fn discovery_pump(
    cancel: CancellationToken,
    adapter: Adapter,
    mut events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    results: UnboundedSender<PeripheralRef>,
) -> JoinHandle<()> {
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.next() => {
                    match event {
                        None => break 'mainloop,
                        Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                            match describe_peripheral(&adapter, &id).await {
                                Ok(Some(peripheral)) => {
                                    // receiver gone means the scan was stopped
                                    if results.send(peripheral).is_err() {
                                        break 'mainloop;
                                    }
                                },
                                Ok(None) => {},
                                Err(err) => {
                                    warn!("Could not query peripheral for properties: {:?}", err);
                                },
                            }
                        },
                        Some(_) => {},
                    }
                },
            }
        }
    })
}

async fn describe_peripheral(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Result<Option<PeripheralRef>, TransportError> {
    let peripheral = adapter.peripheral(id).await?;
    let properties = peripheral.properties().await?;

    let Some(properties) = properties else {
        debug!("Peripheral {:?} has no properties yet", id);
        return Ok(None);
    };

    let advertisement = advertisement_bytes(&properties);
    Ok(Some(PeripheralRef {
        address: properties.address.to_string(),
        display_name: properties.local_name,
        advertisement,
        rssi: properties.rssi,
    }))
}

// the advertisement payload stays opaque to callers, but keep it stable:
// manufacturer records ordered by company id, each id (LE) followed by its data
fn advertisement_bytes(properties: &PeripheralProperties) -> Vec<u8> {
    let mut records: Vec<(&u16, &Vec<u8>)> = properties.manufacturer_data.iter().collect();
    records.sort_by_key(|(company_id, _)| **company_id);

    let mut bytes = Vec::new();
    for (company_id, data) in records {
        bytes.extend_from_slice(&company_id.to_le_bytes());
        bytes.extend_from_slice(data);
    }
    bytes
}

/**
 * Opens connections over the first bluetooth adapter btleplug reports. The
 * peripheral must have been seen by a discovery session first, otherwise the
 * adapter does not know its address.
 */
pub struct BtleTransport {
    manager: Manager,
}

impl BtleTransport {
    pub async fn new() -> Result<BtleTransport, TransportError> {
        let manager = Manager::new().await?;
        Ok(BtleTransport { manager })
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn open(&self, target: &PeripheralRef) -> Result<Box<dyn TransportLink>, TransportError> {
        let adapter = pick_adapter(&self.manager).await?;
        let peripheral = find_peripheral(&adapter, &target.address).await?;

        with_deadline(CONNECT_DEADLINE, peripheral.connect()).await?;

        Ok(Box::new(BtleLink { peripheral }))
    }
}

async fn find_peripheral(adapter: &Adapter, address: &str) -> Result<Peripheral, TransportError> {
    let peripherals = match adapter.peripherals().await {
        Ok(v) => v,
        Err(err) => {
            warn!("Failed to query BLE adapter for peripherals: {}", err);
            return Err(TransportError::Btle { source: err });
        },
    };

    for peripheral in peripherals {
        let properties = match peripheral.properties().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Could not query peripheral for properties: {:?}", err);
                continue;
            },
        };

        if let Some(properties) = properties {
            if properties.address.to_string() == address {
                return Ok(peripheral);
            }
        }
    }

    Err(TransportError::UnknownPeripheral { address: address.to_string() })
}

struct BtleLink {
    peripheral: Peripheral,
}

impl BtleLink {
    fn find_slot(&self, slot: Uuid) -> Result<Characteristic, TransportError> {
        for service in self.peripheral.services() {
            for characteristic in &service.characteristics {
                if characteristic.uuid.eq(&slot) {
                    return Ok(characteristic.clone());
                }
            }
        }

        Err(TransportError::UnresolvedSlot { slot })
    }
}

#[async_trait]
impl TransportLink for BtleLink {
    async fn resolve_capabilities(&mut self) -> Result<Vec<CapabilitySlot>, TransportError> {
        debug!("Discovering services...");
        self.peripheral.discover_services().await?;

        let mut slots = Vec::new();
        for service in self.peripheral.services() {
            for characteristic in &service.characteristics {
                slots.push(CapabilitySlot {
                    uuid: characteristic.uuid,
                    service: service.uuid,
                    readable: characteristic.properties.contains(CharPropFlags::READ),
                    writable: characteristic.properties.intersects(
                        CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
                    ),
                });
            }
        }

        Ok(slots)
    }

    async fn write(&mut self, slot: Uuid, payload: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.find_slot(slot)?;
        let fut = self.peripheral.write(&characteristic, payload, WriteType::WithResponse);
        with_deadline(WRITE_DEADLINE, fut).await
    }

    async fn read(&mut self, slot: Uuid) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.find_slot(slot)?;
        with_deadline(READ_DEADLINE, self.peripheral.read(&characteristic)).await
    }

    async fn close(self: Box<Self>) {
        if let Err(err) = self.peripheral.disconnect().await {
            warn!("Failed to disconnect peripheral cleanly: {:?}", err);
        }
    }
}
