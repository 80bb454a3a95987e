//! Common types used throughout the protocol

use thiserror::Error;

/// GATT service exposed by the lamp
pub const SERVICE_UUID: &str = "44092840-0567-11e6-b862-0002a5d5c51b";

/// API endpoint characteristic (write commands, notify responses)
pub const API_ENDPOINT_UUID: &str = "44092842-0567-11e6-b862-0002a5d5c51b";

/// Current scene characteristic (read scene id)
pub const CURRENT_SCENE_UUID: &str = "44092844-0567-11e6-b862-0002a5d5c51b";

/// Fixed first byte of every command frame
pub const FRAME_PREFIX: u8 = 0xA0;

/// Status byte of a successful reply
pub const STATUS_OK: u8 = 0x00;

/// Scene id marking the end of the scene chain
pub const SCENE_CHAIN_END: u8 = 0xFF;

/// Scene the lamp treats as "off"
pub const SCENE_OFF: u8 = 0x00;

/// Scene the lamp falls back to when switched on without a scene
pub const SCENE_DEFAULT: u8 = 0xFF;

/// Downlight color temperature limits in Kelvin
pub const MIN_TEMPERATURE_K: u16 = 2700;
pub const MAX_TEMPERATURE_K: u16 = 4000;

/// Upper bound for any percentage field
pub const MAX_PERCENT: u8 = 100;

/// Errors decoding a reply frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Reply too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Unknown opcode: {0:#04X}")]
    UnknownOpcode(u8),

    #[error("Malformed reply: {0}")]
    Malformed(String),
}

/// Errors reported by the characteristic implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Connection lost")]
    ConnectionLost,
}

/// Protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Request timeout")]
    Timeout,

    #[error("Decode failure: {0}")]
    DecodeFailure(#[from] DecodeError),

    #[error("Device returned error code {code:#04X}")]
    DeviceError { code: u8 },

    #[error("Value out of device range: {0}")]
    InvalidRange(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Format bytes as space separated hex for logging
#[must_use]
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
