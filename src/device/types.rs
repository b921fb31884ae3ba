use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRef {
    pub address: String,
    pub display_name: Option<String>,
    pub advertisement: Vec<u8>,
    pub rssi: Option<i16>, // dBm
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySlot {
    pub uuid: Uuid,
    pub service: Uuid,
    pub readable: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    ResolvingCapabilities,
    Ready,
    Disconnecting,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    LinkFailed,
    ResolveFailed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            FailureKind::LinkFailed => "the link could not be established",
            FailureKind::ResolveFailed => "capability resolution failed",
        };

        write!(f, "{}", result)
    }
}

// failures on an established link; the session stays Ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFault {
    WriteFailed,
    ReadFailed,
    MalformedTelemetry { len: usize },
}

impl std::fmt::Display for SessionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFault::WriteFailed => write!(f, "the command write failed"),
            SessionFault::ReadFailed => write!(f, "the telemetry read failed"),
            SessionFault::MalformedTelemetry { len } => {
                write!(f, "a telemetry payload of {} bytes is too short to decode", len)
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    Started,
    Advertisement(PeripheralRef),
    Stopped,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    CommandIssued(crate::device::codec::Command),
    Telemetry(u8),
    Fault(SessionFault),
}
