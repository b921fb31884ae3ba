use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{
    make_command_slot_uuid, make_control_service_uuid, make_telemetry_slot_uuid, OUTPUT_RANGE,
    SCAN_TIMEOUT,
};

/**
 * Describes the peripheral this tool pairs with: which service and capability
 * slots to bind after a connection, how many outputs the firmware exposes, and
 * how long a discovery session may run.
 *
 * The defaults match the demo firmware. Pairing with different firmware is a
 * matter of editing the profile file, not of rebuilding the tool.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub control_service: Uuid,
    pub command_slot: Uuid,
    pub telemetry_slot: Uuid,
    pub output_range: u8,
    pub scan_timeout_millis: u64,
}

impl DeviceProfile {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_millis)
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        DeviceProfile {
            control_service: make_control_service_uuid(),
            command_slot: make_command_slot_uuid(),
            telemetry_slot: make_telemetry_slot_uuid(),
            output_range: OUTPUT_RANGE,
            scan_timeout_millis: SCAN_TIMEOUT,
        }
    }
}
