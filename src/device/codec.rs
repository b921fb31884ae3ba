use crate::device::constants::TELEMETRY_OFFSET;
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetOutput(u8), // 1-based selector
}

/**
 * Encodes commands for, and decodes telemetry from, the paired firmware.
 * The wire conventions are fixed: an output command is a single byte equal
 * to the selector, telemetry is the byte at offset 0 of a read payload.
 */
#[derive(Debug, Clone, Copy)]
pub struct CommandCodec {
    output_range: u8,
}

impl CommandCodec {
    pub fn new(output_range: u8) -> CommandCodec {
        CommandCodec { output_range }
    }

    pub fn encode(&self, command: Command) -> Result<[u8; 1], CodecError> {
        match command {
            Command::SetOutput(selector) => {
                if selector == 0 || selector > self.output_range {
                    return Err(CodecError::InvalidArgument { selector, max: self.output_range });
                }

                Ok([selector])
            },
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<u8, CodecError> {
        match payload.get(TELEMETRY_OFFSET) {
            Some(value) => Ok(*value),
            None => Err(CodecError::MalformedPayload { len: payload.len() }),
        }
    }
}
