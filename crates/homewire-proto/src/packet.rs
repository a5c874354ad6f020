use std::fmt;

use strum::Display;
use tracing::{error, warn};

use crate::{
    constants::{
        EMPTY_LENGTH, FRAME_START_DISCOVERY_RESPONSE, FRAME_START_LONG, FRAME_START_SYSTEM,
        HEADER_FIELD_BYTES, MAX_FRAME, MAX_PAYLOAD,
    },
    control::Control,
    crc::crc16,
    error::ProtoError,
    escape::{escape, unescape},
    field::{BIT_MASK, FieldPos},
};

/// Frame classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FrameKind {
    /// Inert frame produced by a failed decode or an unset builder.
    #[default]
    None,
    /// I-message (0xFD family).
    Data,
    /// Acknowledgement (0xFD family).
    Ack,
    /// System frame (0xFE family).
    System,
    /// Discovery request (0xFD family, both low control bits set).
    Discovery,
    /// Single 0xF8 byte answering a discovery request.
    DiscoveryResponse,
}

/// A wired protocol frame.
///
/// Fields are kept decoded; the unescaped and escaped byte forms are cached
/// once built and dropped by every setter.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    kind: FrameKind,
    sender: Option<u32>,
    destination: u32,
    /// Explicit control byte. `None` means generate from the other fields.
    control: Option<u8>,
    sync: bool,
    sender_counter: u8,
    receiver_counter: u8,
    address_mask: u8,
    payload: Vec<u8>,
    crc: u16,
    raw: Vec<u8>,
    escaped: Vec<u8>,
}

impl Packet {
    pub fn builder(kind: FrameKind) -> PacketBuilder {
        PacketBuilder {
            packet: Packet {
                kind,
                ..Packet::default()
            },
        }
    }

    /// Decode an escaped wire frame.
    ///
    /// Malformed input is logged and yields a packet of kind [`FrameKind::None`].
    pub fn decode(bytes: &[u8]) -> Packet {
        match Self::try_decode(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(error = %err, frame = %hex::encode(bytes), "dropping malformed frame");
                Packet::default()
            }
        }
    }

    /// Decode an escaped wire frame, reporting why it was rejected.
    pub fn try_decode(bytes: &[u8]) -> Result<Packet, ProtoError> {
        if bytes.len() > MAX_FRAME {
            return Err(ProtoError::FrameTooLarge(bytes.len()));
        }
        let raw = unescape(bytes);
        let Some(&start) = raw.first() else {
            return Err(ProtoError::Empty);
        };

        let mut packet = match start {
            FRAME_START_LONG => Self::parse_long(raw)?,
            FRAME_START_SYSTEM => Self::parse_system(raw)?,
            FRAME_START_DISCOVERY_RESPONSE => {
                if raw.len() != 1 {
                    return Err(ProtoError::LengthMismatch {
                        expected: 1,
                        actual: raw.len(),
                    });
                }
                Packet {
                    kind: FrameKind::DiscoveryResponse,
                    raw,
                    ..Packet::default()
                }
            }
            other => return Err(ProtoError::UnknownFrameStart(other)),
        };
        packet.escaped = escape(&packet.raw);
        Ok(packet)
    }

    /// Frame layout (bytes, unescaped):
    /// - 0       0xFD
    /// - 1..5    destination (u32 BE)
    /// - 5       control
    /// - 6..10   sender (u32 BE), only when `HAS_SENDER` is set
    /// - next    length (payload + 2)
    /// - ...     payload
    /// - last 2  CRC16 (u16 BE), optional on input
    ///
    /// Discovery frames have no sender and always carry length 2.
    fn parse_long(raw: Vec<u8>) -> Result<Packet, ProtoError> {
        if raw.len() < 7 {
            return Err(ProtoError::TooShort);
        }
        let destination = read_u32_be(&raw, 1)?;
        let control = Control::from_bits_retain(raw[5]);

        if control.is_discovery() {
            if raw[6] != EMPTY_LENGTH {
                return Err(ProtoError::LengthMismatch {
                    expected: 9,
                    actual: raw.len(),
                });
            }
            let (raw, _, crc) = Self::split_crc(raw, 6)?;
            return Ok(Packet {
                kind: FrameKind::Discovery,
                destination,
                control: Some(control.bits()),
                address_mask: control.address_mask(),
                crc,
                raw,
                ..Packet::default()
            });
        }

        let (kind, sync, sender_counter) = if control.contains(Control::ACK) {
            (FrameKind::Ack, false, 0)
        } else {
            (
                FrameKind::Data,
                control.contains(Control::SYNC),
                control.sender_counter(),
            )
        };

        let (sender, length_at) = if control.contains(Control::HAS_SENDER) {
            (Some(read_u32_be(&raw, 6)?), 10)
        } else {
            (None, 6)
        };
        if raw.len() <= length_at {
            return Err(ProtoError::TooShort);
        }

        let (raw, payload, crc) = Self::split_crc(raw, length_at)?;
        Ok(Packet {
            kind,
            sender,
            destination,
            control: Some(control.bits()),
            sync,
            sender_counter,
            receiver_counter: control.receiver_counter(),
            payload,
            crc,
            raw,
            ..Packet::default()
        })
    }

    /// Frame layout (bytes, unescaped):
    /// - 0       0xFE
    /// - 1       destination
    /// - 2       control
    /// - 3       length (payload + 2)
    /// - ...     payload
    /// - last 2  CRC16 (u16 BE), optional on input
    fn parse_system(raw: Vec<u8>) -> Result<Packet, ProtoError> {
        if raw.len() < 4 {
            return Err(ProtoError::TooShort);
        }
        let destination = u32::from(raw[1]);
        let control = Control::from_bits_retain(raw[2]);
        let (raw, payload, crc) = Self::split_crc(raw, 3)?;
        Ok(Packet {
            kind: FrameKind::System,
            destination,
            control: Some(control.bits()),
            receiver_counter: control.receiver_counter(),
            payload,
            crc,
            raw,
            ..Packet::default()
        })
    }

    /// Validate the length byte at `length_at` against the frame size, verify or
    /// append the CRC, and cut out the payload.
    ///
    /// A frame either ends with its CRC (`len == length_at + 1 + length`) or
    /// stops right before it (`len == length_at + 1 + length - 2`), in which case
    /// the CRC is computed and appended.
    fn split_crc(
        mut raw: Vec<u8>,
        length_at: usize,
    ) -> Result<(Vec<u8>, Vec<u8>, u16), ProtoError> {
        let length = usize::from(raw[length_at]);
        let body = length_at + 1;
        if length < usize::from(EMPTY_LENGTH) {
            return Err(ProtoError::LengthMismatch {
                expected: body + usize::from(EMPTY_LENGTH),
                actual: raw.len(),
            });
        }
        let payload_len = length - 2;
        if payload_len > MAX_PAYLOAD {
            return Err(ProtoError::PayloadTooLarge(payload_len));
        }

        let crc = if raw.len() == body + length {
            let split = raw.len() - 2;
            let carried = u16::from_be_bytes([raw[split], raw[split + 1]]);
            let computed = crc16(&raw[..split]);
            if carried != computed {
                return Err(ProtoError::BadCrc {
                    expected: computed,
                    actual: carried,
                });
            }
            carried
        } else if raw.len() == body + payload_len {
            let computed = crc16(&raw);
            raw.extend_from_slice(&computed.to_be_bytes());
            computed
        } else {
            return Err(ProtoError::LengthMismatch {
                expected: body + length,
                actual: raw.len(),
            });
        };

        let payload = raw[body..body + payload_len].to_vec();
        Ok((raw, payload, crc))
    }

    /// Escaped wire form, built and cached on first use.
    pub fn encode(&mut self) -> &[u8] {
        if self.escaped.is_empty() {
            if self.raw.is_empty() {
                self.raw = self.build_raw();
                if self.raw.len() > 2 {
                    let n = self.raw.len();
                    self.crc = u16::from_be_bytes([self.raw[n - 2], self.raw[n - 1]]);
                }
            }
            self.escaped = escape(&self.raw);
        }
        &self.escaped
    }

    /// Escaped wire form without touching the cache.
    pub fn to_wire(&self) -> Vec<u8> {
        if !self.escaped.is_empty() {
            return self.escaped.clone();
        }
        if !self.raw.is_empty() {
            return escape(&self.raw);
        }
        escape(&self.build_raw())
    }

    /// Unescaped frame with its CRC. Empty until the packet was decoded or encoded.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    fn build_raw(&self) -> Vec<u8> {
        let control = self.control_byte();
        let mut out = Vec::with_capacity(self.payload.len() + 13);
        match self.kind {
            FrameKind::None => return out,
            FrameKind::DiscoveryResponse => {
                out.push(FRAME_START_DISCOVERY_RESPONSE);
                return out;
            }
            FrameKind::Data | FrameKind::Ack => {
                out.push(FRAME_START_LONG);
                out.extend_from_slice(&self.destination.to_be_bytes());
                out.push(control);
                if Control::from_bits_retain(control).contains(Control::HAS_SENDER) {
                    out.extend_from_slice(&self.sender.unwrap_or(0).to_be_bytes());
                }
                out.push(self.length_byte());
                out.extend_from_slice(&self.payload);
            }
            FrameKind::System => {
                out.push(FRAME_START_SYSTEM);
                out.push(self.destination as u8);
                out.push(control);
                out.push(self.length_byte());
                out.extend_from_slice(&self.payload);
            }
            FrameKind::Discovery => {
                out.push(FRAME_START_LONG);
                out.extend_from_slice(&self.destination.to_be_bytes());
                out.push(control);
                out.push(EMPTY_LENGTH);
            }
        }
        let crc = crc16(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    #[inline]
    fn length_byte(&self) -> u8 {
        // payload is capped at MAX_PAYLOAD by every mutator
        (self.payload.len() + 2) as u8
    }

    fn invalidate(&mut self) {
        self.raw.clear();
        self.escaped.clear();
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn sender(&self) -> Option<u32> {
        self.sender
    }

    pub fn destination(&self) -> u32 {
        self.destination
    }

    pub fn sync(&self) -> bool {
        self.sync
    }

    pub fn sender_counter(&self) -> u8 {
        self.sender_counter
    }

    pub fn receiver_counter(&self) -> u8 {
        self.receiver_counter
    }

    pub fn address_mask(&self) -> u8 {
        self.address_mask
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// CRC carried by a decoded frame, or computed by the last [`Packet::encode`].
    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// The explicit control byte, or the one implied by kind and header fields.
    pub fn control_byte(&self) -> u8 {
        if let Some(control) = self.control.filter(|&c| c != 0) {
            return control;
        }
        let control = match self.kind {
            FrameKind::Data => Control::data(
                self.sync,
                self.sender.is_some(),
                self.sender_counter,
                self.receiver_counter,
            ),
            FrameKind::Ack => Control::ack(self.receiver_counter),
            FrameKind::System => Control::system(self.receiver_counter),
            FrameKind::Discovery => Control::discovery(self.address_mask),
            FrameKind::None | FrameKind::DiscoveryResponse => Control::empty(),
        };
        control.bits()
    }

    pub fn set_control_byte(&mut self, control: u8) {
        self.control = Some(control);
        self.invalidate();
    }

    pub fn set_destination(&mut self, destination: u32) {
        self.destination = destination;
        self.invalidate();
    }

    pub fn set_sender(&mut self, sender: Option<u32>) {
        self.sender = sender;
        self.invalidate();
    }

    pub fn set_payload(&mut self, payload: Vec<u8>) -> Result<(), ProtoError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtoError::PayloadTooLarge(payload.len()));
        }
        self.payload = payload;
        self.invalidate();
        Ok(())
    }

    /// Header byte `i` as seen by field addressing.
    fn header_byte(&self, i: u32) -> u8 {
        let destination = self.destination.to_be_bytes();
        let sender = self.sender.unwrap_or(0).to_be_bytes();
        match i {
            0..4 => destination[i as usize],
            4 => self.control_byte(),
            5..9 => sender[(i - 5) as usize],
            _ => 0,
        }
    }

    /// Read a field.
    ///
    /// Reads past the end of the payload return zeros. `mask`, when given, is
    /// applied to byte-aligned fields of up to four bytes, lowest byte last.
    pub fn read(&self, pos: FieldPos, mask: Option<u32>) -> Result<Vec<u8>, ProtoError> {
        if pos.byte < HEADER_FIELD_BYTES {
            if pos.width > 8 {
                return Err(ProtoError::BadFieldAddress {
                    index: f64::from(pos.byte),
                    size: f64::from(pos.width) / 8.0,
                });
            }
            let byte = self.header_byte(pos.byte);
            return Ok(vec![(byte >> pos.bit) & BIT_MASK[usize::from(pos.first_byte_bits())]]);
        }

        let start = (pos.byte - HEADER_FIELD_BYTES) as usize;
        let len = pos.byte_len();
        if pos.is_partial() {
            let byte = self.payload.get(start).copied().unwrap_or(0);
            return Ok(vec![(byte >> pos.bit) & BIT_MASK[usize::from(pos.first_byte_bits())]]);
        }

        let mut out: Vec<u8> = (0..len)
            .map(|i| self.payload.get(start + i).copied().unwrap_or(0))
            .collect();
        out[0] &= BIT_MASK[usize::from(pos.first_byte_bits())];
        if let Some(mask) = mask.filter(|_| len <= 4) {
            for (i, byte) in out.iter_mut().enumerate() {
                *byte &= (mask >> ((len - 1 - i) * 8)) as u8;
            }
        }
        Ok(out)
    }

    /// Write a payload field, zero-extending the payload as needed.
    ///
    /// Sub-byte fields take the low bits of the last value byte. Byte-aligned
    /// fields take the leading bytes of `value`, or right-align a shorter value.
    pub fn write(&mut self, pos: FieldPos, value: &[u8]) -> Result<(), ProtoError> {
        if pos.byte < HEADER_FIELD_BYTES {
            return Err(ProtoError::HeaderFieldReadOnly);
        }
        let start = (pos.byte - HEADER_FIELD_BYTES) as usize;
        let len = pos.byte_len();
        let end = start + len;
        if end > MAX_PAYLOAD {
            return Err(ProtoError::PayloadTooLarge(end));
        }
        if self.payload.len() < end {
            self.payload.resize(end, 0);
        }
        self.invalidate();

        if pos.is_partial() {
            let bits = BIT_MASK[usize::from(pos.first_byte_bits())];
            let field = u16::from(bits) << pos.bit;
            let v = u16::from(value.last().copied().unwrap_or(0) & bits) << pos.bit;
            let slot = &mut self.payload[start];
            *slot = ((u16::from(*slot) & !field) | v) as u8;
            return Ok(());
        }

        let target = &mut self.payload[start..end];
        if value.len() >= len {
            target.copy_from_slice(&value[..len]);
            target[0] &= BIT_MASK[usize::from(pos.first_byte_bits())];
        } else {
            let missing = len - value.len();
            target[..missing].fill(0);
            target[missing..].copy_from_slice(value);
        }
        Ok(())
    }

    /// [`Packet::read`] addressed by real-number index and size; `mask` of -1 means none.
    ///
    /// Invalid addresses are logged and read as a single zero byte.
    pub fn get_field(&self, index: f64, size: f64, mask: i32) -> Vec<u8> {
        let mask = (mask != -1).then_some(mask as u32);
        match FieldPos::from_index_size(index, size).and_then(|pos| self.read(pos, mask)) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = %err, "invalid field read");
                vec![0]
            }
        }
    }

    /// [`Packet::write`] addressed by real-number index and size.
    pub fn set_field(&mut self, index: f64, size: f64, value: &[u8]) -> Result<(), ProtoError> {
        let pos = FieldPos::from_index_size(index, size)?;
        self.write(pos, value)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.to_wire()))
    }
}

/// Builds a [`Packet`] from explicit field values.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    packet: Packet,
}

impl PacketBuilder {
    pub fn destination(mut self, destination: u32) -> Self {
        self.packet.destination = destination;
        self
    }

    pub fn sender(mut self, sender: u32) -> Self {
        self.packet.sender = Some(sender);
        self
    }

    /// Force a control byte instead of generating it from the other fields.
    pub fn control(mut self, control: u8) -> Self {
        self.packet.control = Some(control);
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.packet.sync = sync;
        self
    }

    pub fn sender_counter(mut self, counter: u8) -> Self {
        self.packet.sender_counter = counter & 0x03;
        self
    }

    pub fn receiver_counter(mut self, counter: u8) -> Self {
        self.packet.receiver_counter = counter & 0x03;
        self
    }

    pub fn address_mask(mut self, mask: u8) -> Self {
        self.packet.address_mask = mask & 0x1F;
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.packet.payload = payload.into();
        self
    }

    pub fn build(self) -> Result<Packet, ProtoError> {
        if self.packet.payload.len() > MAX_PAYLOAD {
            return Err(ProtoError::PayloadTooLarge(self.packet.payload.len()));
        }
        Ok(self.packet)
    }
}

fn read_u32_be(buf: &[u8], start: usize) -> Result<u32, ProtoError> {
    let bytes: [u8; 4] = buf
        .get(start..start + 4)
        .ok_or(ProtoError::TooShort)?
        .try_into()
        .map_err(|_| ProtoError::TooShort)?;
    Ok(u32::from_be_bytes(bytes))
}
