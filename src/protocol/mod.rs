//! Fixed request layout, operation codes, and wire status values
use crate::error::EngineError;

const FILE_DEVICE_UNKNOWN: u32 = 0x22;
const METHOD_BUFFERED: u32 = 0;
const FILE_SPECIAL_ACCESS: u32 = 0;

/// Device-type/function-number control-code encoding. The resulting values
/// are arbitrary but fixed for the lifetime of the protocol.
pub const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

pub const ATTACH_CODE: u32 = ctl_code(FILE_DEVICE_UNKNOWN, 0x775, METHOD_BUFFERED, FILE_SPECIAL_ACCESS);
pub const READ_CODE: u32 = ctl_code(FILE_DEVICE_UNKNOWN, 0x776, METHOD_BUFFERED, FILE_SPECIAL_ACCESS);
pub const WRITE_CODE: u32 = ctl_code(FILE_DEVICE_UNKNOWN, 0x777, METHOD_BUFFERED, FILE_SPECIAL_ACCESS);
pub const GETBASE_CODE: u32 = ctl_code(FILE_DEVICE_UNKNOWN, 0x778, METHOD_BUFFERED, FILE_SPECIAL_ACCESS);
pub const KEYSTATE_CODE: u32 = ctl_code(FILE_DEVICE_UNKNOWN, 0x779, METHOD_BUFFERED, FILE_SPECIAL_ACCESS);

// Wire status values reported with a completed request.
pub const STATUS_SUCCESS: u32 = 0x0000_0000;
pub const STATUS_INVALID_PARAMETER: u32 = 0xC000_000D;
pub const STATUS_INVALID_DEVICE_REQUEST: u32 = 0xC000_0010;
pub const STATUS_BUFFER_TOO_SMALL: u32 = 0xC000_0023;
pub const STATUS_INVALID_IMAGE_FORMAT: u32 = 0xC000_007B;
pub const STATUS_INSUFFICIENT_RESOURCES: u32 = 0xC000_009A;
pub const STATUS_NOT_FOUND: u32 = 0xC000_0225;

/// Map an operation outcome to its wire status.
pub fn status_of(result: &Result<(), EngineError>) -> u32 {
    match result {
        Ok(()) => STATUS_SUCCESS,
        Err(EngineError::InvalidParameter) => STATUS_INVALID_PARAMETER,
        Err(EngineError::NotFound(_)) => STATUS_NOT_FOUND,
        Err(EngineError::InvalidImageFormat(_)) => STATUS_INVALID_IMAGE_FORMAT,
        Err(EngineError::InsufficientResources) => STATUS_INSUFFICIENT_RESOURCES,
        Err(EngineError::BufferTooLarge) => STATUS_BUFFER_TOO_SMALL,
        Err(EngineError::InvalidDeviceRequest(_)) => STATUS_INVALID_DEVICE_REQUEST,
        // Host-side failures have no protocol expression beyond a generic
        // parameter fault.
        Err(_) => STATUS_INVALID_PARAMETER,
    }
}

/// Encoded size of a request: five u64 fields, one u32, one bool byte.
pub const REQUEST_SIZE: usize = 45;

/// The fixed-layout control request.
///
/// Field order and widths are part of the protocol and must not change.
/// `buffer_address` is the caller-owned payload pointer; the engine carries
/// it verbatim and never dereferences it — payload bytes travel as an
/// explicit slice beside the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub process_id: u64,
    pub target_address: u64,
    pub buffer_address: u64,
    pub bytes_to_read: u64,
    /// Output: bytes actually transferred. Less than `bytes_to_read` signals
    /// partial completion, not necessarily failure.
    pub bytes_read: u64,
    /// Auxiliary key-state query input.
    pub key: u32,
    /// Auxiliary key-state query output.
    pub is_down: bool,
}

impl Request {
    pub fn to_bytes(&self) -> [u8; REQUEST_SIZE] {
        let mut out = [0u8; REQUEST_SIZE];
        out[0..8].copy_from_slice(&self.process_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.target_address.to_le_bytes());
        out[16..24].copy_from_slice(&self.buffer_address.to_le_bytes());
        out[24..32].copy_from_slice(&self.bytes_to_read.to_le_bytes());
        out[32..40].copy_from_slice(&self.bytes_read.to_le_bytes());
        out[40..44].copy_from_slice(&self.key.to_le_bytes());
        out[44] = self.is_down as u8;
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, EngineError> {
        if raw.len() < REQUEST_SIZE {
            return Err(EngineError::InvalidParameter);
        }
        let u64_at = |at: usize| u64::from_le_bytes(raw[at..at + 8].try_into().unwrap());
        Ok(Request {
            process_id: u64_at(0),
            target_address: u64_at(8),
            buffer_address: u64_at(16),
            bytes_to_read: u64_at(24),
            bytes_read: u64_at(32),
            key: u32::from_le_bytes(raw[40..44].try_into().unwrap()),
            is_down: raw[44] != 0,
        })
    }
}
