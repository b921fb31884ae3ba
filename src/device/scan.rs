use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::spawn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::registry::ScanRegistry;
use crate::device::types::{PeripheralRef, ScanEvent};
use crate::error::ScanError;
use crate::transport::Discovery;

/**
 * Runs timed discovery sessions and keeps the registry of peripherals heard
 * from during the current session.
 *
 * A session ends when stop() is called or when the timeout expires, whichever
 * comes first; both paths halt discovery and clear the registry, so results
 * never outlive the session that produced them. Observers follow along on the
 * event channel returned by new().
 */
pub struct ScanController {
    discovery: Arc<dyn Discovery>,
    registry: Arc<ScanRegistry>,
    timeout: Duration,
    events: UnboundedSender<ScanEvent>,
    scanning: Arc<AtomicBool>,
    pump: Option<ScanPump>,
}

struct ScanPump {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScanController {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        timeout: Duration,
    ) -> (ScanController, UnboundedReceiver<ScanEvent>) {
        let (events, events_rx) = unbounded_channel();

        let controller = ScanController {
            discovery,
            registry: Arc::new(ScanRegistry::new()),
            timeout,
            events,
            scanning: Arc::new(AtomicBool::new(false)),
            pump: None,
        };

        (controller, events_rx)
    }

    pub fn registry(&self) -> Arc<ScanRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /**
     * Begins a discovery session. A no-op while a session is already running.
     * Fails without becoming active when the discovery backend cannot start.
     */
    pub async fn start(&mut self) -> Result<(), ScanError> {
        if self.is_scanning() {
            return Ok(());
        }

        // a previous session that stopped on its own deadline leaves a
        // finished pump behind
        self.reap_pump().await;

        self.registry.clear();

        let (adverts_tx, adverts_rx) = unbounded_channel();
        self.discovery.start_discovery(adverts_tx).await?;

        self.scanning.store(true, Ordering::SeqCst);
        let _ = self.events.send(ScanEvent::Started);
        debug!("Scan started; stopping automatically after {:?}", self.timeout);

        let cancel = CancellationToken::new();
        let handle = scan_pump(
            cancel.clone(),
            Arc::clone(&self.discovery),
            Arc::clone(&self.registry),
            Arc::clone(&self.scanning),
            self.events.clone(),
            adverts_rx,
            Instant::now() + self.timeout,
        );
        self.pump = Some(ScanPump { cancel, handle });

        Ok(())
    }

    /**
     * Ends the current discovery session and discards its results. A no-op
     * when no session is running.
     */
    pub async fn stop(&mut self) {
        if !self.is_scanning() {
            return;
        }

        self.reap_pump().await;
    }

    async fn reap_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.cancel.cancel();
            pump.handle.await.expect("Failed to join scan pump task");
        }
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        if let Some(pump) = &self.pump {
            pump.cancel.cancel();
        }
    }
}

fn scan_pump(
    cancel: CancellationToken,
    discovery: Arc<dyn Discovery>,
    registry: Arc<ScanRegistry>,
    scanning: Arc<AtomicBool>,
    events: UnboundedSender<ScanEvent>,
    mut adverts: UnboundedReceiver<PeripheralRef>,
    deadline: Instant,
) -> JoinHandle<()> {
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                _ = sleep_until(deadline) => {
                    debug!("Scan deadline reached");
                    break 'mainloop;
                },
                advert = adverts.recv() => {
                    match advert {
                        // the discovery backend dropped its sender
                        None => break 'mainloop,
                        Some(peripheral) => {
                            registry.upsert(peripheral.clone());
                            let _ = events.send(ScanEvent::Advertisement(peripheral));
                        },
                    }
                },
            }
        }

        // one teardown for every way a session ends: explicit stop, deadline,
        // controller drop
        discovery.stop_discovery().await;
        registry.clear();
        scanning.store(false, Ordering::SeqCst);
        let _ = events.send(ScanEvent::Stopped);
    })
}
