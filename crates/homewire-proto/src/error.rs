use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtoError {
    #[error("empty frame")]
    Empty,
    #[error("frame too large: {0}")]
    FrameTooLarge(usize),
    #[error("frame too short for its header")]
    TooShort,
    #[error("length byte mismatch: frame holds {actual} bytes, length byte allows {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("crc mismatch: frame carries {actual:#06x}, computed {expected:#06x}")]
    BadCrc { expected: u16, actual: u16 },
    #[error("unknown frame start: {0:#04x}")]
    UnknownFrameStart(u8),
    #[error("payload too large: {0}")]
    PayloadTooLarge(usize),
    #[error("header fields cannot be written through field addressing")]
    HeaderFieldReadOnly,
    #[error("invalid field address (index {index}, size {size})")]
    BadFieldAddress { index: f64, size: f64 },
}
