use std::mem;
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{info, warn};
use tokio::spawn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::types::DeviceProfile;
use crate::device::codec::{Command, CommandCodec};
use crate::device::types::{
    CapabilitySlot, FailureKind, PeripheralRef, SessionEvent, SessionFault, SessionState,
};
use crate::error::{SessionError, TransportError};
use crate::transport::{Transport, TransportLink};

/**
 * Drives the lifecycle of one peripheral session: connect, resolve
 * capabilities, issue commands, read telemetry, disconnect. A controller owns
 * at most one session at a time; concurrent sessions take multiple
 * controllers.
 *
 * Every operation returns its precondition verdict at the call site.
 * Completion and failure of the transport work behind it arrive later on the
 * event channel returned by new(), because the transport is event driven.
 */
pub struct SessionController {
    requests: UnboundedSender<SessionRequest>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        profile: &DeviceProfile,
    ) -> (SessionController, UnboundedReceiver<SessionEvent>) {
        let (requests, requests_rx) = unbounded_channel();
        let (events, events_rx) = unbounded_channel();
        let cancel = CancellationToken::new();

        let task = SessionTask {
            transport,
            codec: CommandCodec::new(profile.output_range),
            control_service: profile.control_service,
            command_uuid: profile.command_slot,
            telemetry_uuid: profile.telemetry_slot,
            events,
            previous: None,
            machine: Machine::Idle,
        };
        let handle = spawn(task.run(cancel.clone(), requests_rx));

        let controller = SessionController {
            requests,
            cancel,
            task: Some(handle),
        };
        (controller, events_rx)
    }

    /**
     * Opens a session to the given peripheral. Rejected while another session
     * is open on this controller. The session surfaces as Ready, or as Failed
     * followed by Idle, on the event channel.
     */
    pub async fn connect(&self, peripheral: PeripheralRef) -> Result<(), SessionError> {
        self.submit(|verdict| SessionRequest::Connect { peripheral, verdict }).await
    }

    /**
     * Encodes the command and writes it to the bound command slot. Only valid
     * while the session is Ready; completion arrives as a CommandIssued event,
     * a failed write as a Fault event.
     */
    pub async fn send_command(&self, command: Command) -> Result<(), SessionError> {
        self.submit(|verdict| SessionRequest::SendCommand { command, verdict }).await
    }

    /**
     * Reads the bound telemetry slot. Only valid while the session is Ready;
     * the decoded value arrives as a Telemetry event.
     */
    pub async fn read_telemetry(&self) -> Result<(), SessionError> {
        self.submit(|verdict| SessionRequest::ReadTelemetry { verdict }).await
    }

    /**
     * Closes the open session, releasing its connection handle exactly once.
     * Safe to call in any state; calling it with no session open is a no-op.
     */
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.submit(|verdict| SessionRequest::Disconnect { verdict }).await
    }

    /**
     * Stops the owning task. An open session is disconnected and its handle
     * released before this resolves. Dropping the controller without calling
     * shutdown triggers the same teardown, minus the join.
     */
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await.expect("Failed to join session task");
        }
    }

    async fn submit(
        &self,
        request: impl FnOnce(oneshot::Sender<Result<(), SessionError>>) -> SessionRequest,
    ) -> Result<(), SessionError> {
        let (verdict_tx, verdict_rx) = oneshot::channel();
        self.requests.send(request(verdict_tx)).map_err(|_| SessionError::Closed)?;
        verdict_rx.await.map_err(|_| SessionError::Closed)?
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum SessionRequest {
    Connect {
        peripheral: PeripheralRef,
        verdict: oneshot::Sender<Result<(), SessionError>>,
    },
    SendCommand {
        command: Command,
        verdict: oneshot::Sender<Result<(), SessionError>>,
    },
    ReadTelemetry {
        verdict: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        verdict: oneshot::Sender<Result<(), SessionError>>,
    },
}

enum Machine {
    Idle,
    Connecting,
    Resolving,
    Ready {
        peripheral: PeripheralRef,
        link: Box<dyn TransportLink>,
        command_slot: Option<CapabilitySlot>,
        telemetry_slot: Option<CapabilitySlot>,
    },
    // a disconnect arrived while a connect or resolve was in flight; the
    // outcome still owns the handle and must be observed before the release
    Draining,
}

enum PhaseOutcome {
    LinkUp {
        peripheral: PeripheralRef,
        link: Box<dyn TransportLink>,
    },
    LinkFailed {
        peripheral: PeripheralRef,
        error: TransportError,
    },
    Resolved {
        peripheral: PeripheralRef,
        link: Box<dyn TransportLink>,
        slots: Vec<CapabilitySlot>,
    },
    ResolveFailed {
        peripheral: PeripheralRef,
        link: Box<dyn TransportLink>,
        error: TransportError,
    },
}

type PhaseFuture = BoxFuture<'static, PhaseOutcome>;

struct SessionTask {
    transport: Arc<dyn Transport>,
    codec: CommandCodec,
    control_service: Uuid,
    command_uuid: Uuid,
    telemetry_uuid: Uuid,
    events: UnboundedSender<SessionEvent>,
    previous: Option<SessionState>,
    machine: Machine,
}

impl SessionTask {
    async fn run(
        mut self,
        cancel: CancellationToken,
        mut requests: UnboundedReceiver<SessionRequest>,
    ) {
        let mut in_flight: Option<PhaseFuture> = None;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                // drive the connect/resolve phase, if one is in flight, while
                // still answering requests submitted in the meantime
                outcome = async { in_flight.as_mut().expect("No phase in flight").await }, if in_flight.is_some() => {
                    in_flight = None;
                    self.on_phase_outcome(outcome, &mut in_flight).await;
                },
                request = requests.recv() => {
                    match request {
                        None => break 'mainloop,
                        Some(request) => self.on_request(request, &mut in_flight).await,
                    }
                },
            }
        }

        self.teardown(in_flight).await;
    }

    async fn on_request(&mut self, request: SessionRequest, in_flight: &mut Option<PhaseFuture>) {
        match request {
            SessionRequest::Connect { peripheral, verdict } => {
                if !matches!(self.machine, Machine::Idle) {
                    let _ = verdict.send(Err(SessionError::ConnectionRejected));
                    return;
                }
                let _ = verdict.send(Ok(()));

                info!("Connecting to peripheral {}...", peripheral.address);
                self.machine = Machine::Connecting;
                self.notify_state(SessionState::Connecting);

                let transport = Arc::clone(&self.transport);
                *in_flight = Some(Box::pin(async move {
                    match transport.open(&peripheral).await {
                        Ok(link) => PhaseOutcome::LinkUp { peripheral, link },
                        Err(error) => PhaseOutcome::LinkFailed { peripheral, error },
                    }
                }));
            },
            SessionRequest::SendCommand { command, verdict } => {
                match &mut self.machine {
                    Machine::Ready { peripheral, link, command_slot: Some(slot), .. } => {
                        let payload = match self.codec.encode(command) {
                            Ok(payload) => payload,
                            Err(source) => {
                                let _ = verdict.send(Err(SessionError::Codec { source }));
                                return;
                            },
                        };
                        let _ = verdict.send(Ok(()));

                        match link.write(slot.uuid, &payload).await {
                            Ok(()) => {
                                let _ = self.events.send(SessionEvent::CommandIssued(command));
                            },
                            Err(err) => {
                                warn!("Failed to write command to {}: {}", peripheral.address, err);
                                let _ = self.events.send(SessionEvent::Fault(SessionFault::WriteFailed));
                            },
                        }
                    },
                    Machine::Ready { command_slot: None, .. } => {
                        let _ = verdict.send(Err(SessionError::CapabilityMissing { slot: self.command_uuid }));
                    },
                    _ => {
                        let _ = verdict.send(Err(SessionError::NotReady));
                    },
                }
            },
            SessionRequest::ReadTelemetry { verdict } => {
                match &mut self.machine {
                    Machine::Ready { peripheral, link, telemetry_slot: Some(slot), .. } => {
                        let _ = verdict.send(Ok(()));

                        match link.read(slot.uuid).await {
                            Ok(payload) => match self.codec.decode(&payload) {
                                Ok(value) => {
                                    let _ = self.events.send(SessionEvent::Telemetry(value));
                                },
                                Err(_) => {
                                    warn!(
                                        "Telemetry payload from {} is {} bytes, too short to decode",
                                        peripheral.address,
                                        payload.len(),
                                    );
                                    let _ = self.events.send(SessionEvent::Fault(
                                        SessionFault::MalformedTelemetry { len: payload.len() },
                                    ));
                                },
                            },
                            Err(err) => {
                                warn!("Failed to read telemetry from {}: {}", peripheral.address, err);
                                let _ = self.events.send(SessionEvent::Fault(SessionFault::ReadFailed));
                            },
                        }
                    },
                    Machine::Ready { telemetry_slot: None, .. } => {
                        let _ = verdict.send(Err(SessionError::CapabilityMissing { slot: self.telemetry_uuid }));
                    },
                    _ => {
                        let _ = verdict.send(Err(SessionError::NotReady));
                    },
                }
            },
            SessionRequest::Disconnect { verdict } => {
                let _ = verdict.send(Ok(()));
                self.disconnect().await;
            },
        }
    }

    async fn on_phase_outcome(&mut self, outcome: PhaseOutcome, in_flight: &mut Option<PhaseFuture>) {
        if matches!(self.machine, Machine::Draining) {
            // a disconnect came in mid-attempt; the session never surfaces
            match outcome {
                PhaseOutcome::LinkUp { link, .. }
                | PhaseOutcome::Resolved { link, .. }
                | PhaseOutcome::ResolveFailed { link, .. } => link.close().await,
                PhaseOutcome::LinkFailed { .. } => {},
            }
            self.machine = Machine::Idle;
            self.notify_state(SessionState::Idle);
            return;
        }

        match outcome {
            PhaseOutcome::LinkUp { peripheral, mut link } => {
                self.notify_state(SessionState::Connected);
                info!("Connected to {}; resolving capabilities...", peripheral.address);
                self.machine = Machine::Resolving;
                self.notify_state(SessionState::ResolvingCapabilities);

                *in_flight = Some(Box::pin(async move {
                    match link.resolve_capabilities().await {
                        Ok(slots) => PhaseOutcome::Resolved { peripheral, link, slots },
                        Err(error) => PhaseOutcome::ResolveFailed { peripheral, link, error },
                    }
                }));
            },
            PhaseOutcome::LinkFailed { peripheral, error } => {
                warn!("Connecting to {} failed: {}", peripheral.address, error);
                self.machine = Machine::Idle;
                self.notify_state(SessionState::Failed(FailureKind::LinkFailed));
                // no resources are held; the controller is immediately reusable
                self.notify_state(SessionState::Idle);
            },
            PhaseOutcome::Resolved { peripheral, link, slots } => {
                let command_slot = self.bind_slot(&slots, self.command_uuid);
                let telemetry_slot = self.bind_slot(&slots, self.telemetry_uuid);

                if let Some(slot) = &command_slot {
                    if !slot.writable {
                        warn!("Configured command slot {} is not writable", slot.uuid);
                    }
                }
                if let Some(slot) = &telemetry_slot {
                    if !slot.readable {
                        warn!("Configured telemetry slot {} is not readable", slot.uuid);
                    }
                }

                info!(
                    "Peripheral {} is ready ({} capability slots resolved)",
                    peripheral.address,
                    slots.len(),
                );
                self.machine = Machine::Ready { peripheral, link, command_slot, telemetry_slot };
                self.notify_state(SessionState::Ready);
            },
            PhaseOutcome::ResolveFailed { peripheral, link, error } => {
                warn!("Resolving capabilities on {} failed: {}", peripheral.address, error);
                // the link came up; release it before reporting the failure
                link.close().await;
                self.machine = Machine::Idle;
                self.notify_state(SessionState::Failed(FailureKind::ResolveFailed));
                self.notify_state(SessionState::Idle);
            },
        }
    }

    async fn disconnect(&mut self) {
        // nothing to release when no session is open; nothing further to do
        // when a previous disconnect is already draining the attempt
        if matches!(self.machine, Machine::Idle | Machine::Draining) {
            return;
        }

        if matches!(self.machine, Machine::Connecting | Machine::Resolving) {
            // the in-flight attempt cannot be cancelled; park until its
            // outcome arrives, then release whatever handle it yields
            self.machine = Machine::Draining;
            self.notify_state(SessionState::Disconnecting);
            return;
        }

        let Machine::Ready { peripheral, link, .. } = mem::replace(&mut self.machine, Machine::Idle) else {
            return;
        };
        self.notify_state(SessionState::Disconnecting);
        info!("Disconnecting from {}", peripheral.address);
        link.close().await;
        self.notify_state(SessionState::Idle);
    }

    async fn teardown(mut self, in_flight: Option<PhaseFuture>) {
        let open = !matches!(self.machine, Machine::Idle);
        if open {
            self.notify_state(SessionState::Disconnecting);
        }

        // observe any in-flight attempt so the handle it may yield cannot leak
        if let Some(phase) = in_flight {
            match phase.await {
                PhaseOutcome::LinkUp { link, .. }
                | PhaseOutcome::Resolved { link, .. }
                | PhaseOutcome::ResolveFailed { link, .. } => link.close().await,
                PhaseOutcome::LinkFailed { .. } => {},
            }
        }

        if let Machine::Ready { link, .. } = mem::replace(&mut self.machine, Machine::Idle) {
            link.close().await;
        }

        if open {
            self.notify_state(SessionState::Idle);
        }
    }

    fn bind_slot(&self, slots: &[CapabilitySlot], slot: Uuid) -> Option<CapabilitySlot> {
        // bindings go by configured uuid within the configured service, never
        // by discovery order
        slots
            .iter()
            .copied()
            .find(|capability| capability.uuid == slot && capability.service == self.control_service)
    }

    fn notify_state(&mut self, state: SessionState) {
        // state notifications are emitted on change only
        if self.previous == Some(state) {
            return;
        }
        self.previous = Some(state);
        let _ = self.events.send(SessionEvent::StateChanged(state));
    }
}
