use uuid::Uuid;

/**
 * How long (milliseconds) a discovery session may run before it stops itself.
 */
pub const SCAN_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) a connection attempt may take.
 */
pub const CONNECT_DEADLINE: u64 = 10_000;

/**
 * How long (milliseconds) a write to a capability slot may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) a read from a capability slot may take.
 */
pub const READ_DEADLINE: u64 = 2000;

/**
 * How many selectable outputs the paired firmware exposes. Selectors are
 * 1-based: 1..=OUTPUT_RANGE.
 */
pub const OUTPUT_RANGE: u8 = 3;

/**
 * Offset of the telemetry value within a read payload.
 */
pub const TELEMETRY_OFFSET: usize = 0;

/**
 * The UUID of the control service on the paired demo firmware.
 */
pub const CONTROL_SERVICE: &str = "0000fe40-cc7a-482a-984a-7f2ed5b3e58f";

/**
 * The UUID of the capability slot that accepts output commands.
 */
pub const COMMAND_SLOT: &str = "0000fe41-8e22-4541-9d4c-21edae82ed19";

/**
 * The UUID of the capability slot that holds the telemetry byte
 * (a click counter on the paired firmware).
 */
pub const TELEMETRY_SLOT: &str = "0000fe42-8e22-4541-9d4c-21edae82ed19";

pub fn make_control_service_uuid() -> Uuid {
    Uuid::parse_str(CONTROL_SERVICE).unwrap()
}

pub fn make_command_slot_uuid() -> Uuid {
    Uuid::parse_str(COMMAND_SLOT).unwrap()
}

pub fn make_telemetry_slot_uuid() -> Uuid {
    Uuid::parse_str(TELEMETRY_SLOT).unwrap()
}
