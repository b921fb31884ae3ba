use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;
use uuid::Uuid;

use crate::device::types::{FailureKind, SessionFault};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("Output selector {selector} is out of range 1..={max}")]
    InvalidArgument { selector: u8, max: u8 },

    #[error("Telemetry payload of {len} bytes is too short to decode")]
    MalformedPayload { len: usize },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Error communicating with peripheral (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Peripheral {address} is not known to the adapter")]
    UnknownPeripheral { address: String },

    #[error("Capability slot {slot} has not been resolved on this link")]
    UnresolvedSlot { slot: Uuid },

    #[error("Transport operation took longer than {millis} ms")]
    Deadline { millis: u64 },
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Discovery is unavailable: {source}")]
    DeviceUnavailable { #[from] source: TransportError },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A session is already open")]
    ConnectionRejected,

    #[error("The session is not ready to accept commands")]
    NotReady,

    #[error("The peripheral does not expose the configured capability slot {slot}")]
    CapabilityMissing { slot: Uuid },

    #[error("Failed to encode/decode a command payload: {source}")]
    Codec { #[from] source: CodecError },

    #[error("The session controller has been shut down")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to the profile file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on the profile file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode the profile as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write the profile file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build the profile file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to load/store the device profile: {source}")]
    Config { #[from] source: ConfigError },

    #[error("Discovery failed: {source}")]
    Scan { #[from] source: ScanError },

    #[error("Session request failed: {source}")]
    Session { #[from] source: SessionError },

    #[error("Transport setup failed: {source}")]
    Transport { #[from] source: TransportError },

    #[error("Peripheral {address} was not discovered before the scan stopped")]
    PeripheralNotFound { address: String },

    #[error("The connection attempt failed: {kind}")]
    LinkFailed { kind: FailureKind },

    #[error("The peripheral reported a fault: {fault}")]
    Fault { fault: SessionFault },
}
