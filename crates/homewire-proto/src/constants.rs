/// Leading byte of data, acknowledgement and discovery frames.
pub const FRAME_START_LONG: u8 = 0xFD;

/// Leading byte of system frames (one-byte destination).
pub const FRAME_START_SYSTEM: u8 = 0xFE;

/// The single byte a device answers a discovery frame with. Carries no CRC.
pub const FRAME_START_DISCOVERY_RESPONSE: u8 = 0xF8;

/// Escape marker. The byte that follows it had its high bit cleared.
pub const ESCAPE: u8 = 0xFC;

/// Largest payload a frame may carry, in bytes.
pub const MAX_PAYLOAD: usize = 132;

/// Largest raw frame accepted by the decoder, in bytes.
/// Anything longer is rejected before unescaping.
pub const MAX_FRAME: usize = 512;

/// CRC16 seed.
pub const CRC_SEED: u16 = 0xF1E2;

/// Number of fixed header bytes addressable through field indices below this value:
/// destination address (0..4), control byte (4), sender address (5..9).
pub const HEADER_FIELD_BYTES: u32 = 9;

/// Value of the length byte when a frame carries no payload (just the CRC).
pub const EMPTY_LENGTH: u8 = 2;
