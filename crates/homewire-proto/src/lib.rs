//! Framing layer of the wired home-automation bus.
//!
//! # Layout
//!
//! - [`packet`]: decoded frame with encode/decode and field access.
//! - [`field`]: real-number field addresses resolved to byte/bit/width.
//! - [`control`]: control byte flags and counters.
//! - [`crc`]: CRC16 over unescaped frames.
//! - [`escape`]: reserved-byte escaping.

pub mod constants;
pub mod control;
pub mod crc;
pub mod error;
pub mod escape;
pub mod field;
pub mod packet;

pub use control::Control;
pub use error::ProtoError;
pub use field::FieldPos;
pub use packet::{FrameKind, Packet, PacketBuilder};
