use bitflags::bitflags;

bitflags! {
    /// Control byte of a wired frame.
    ///
    /// Bit layout for data, acknowledgement and system frames:
    /// 7 6 5 4 3 2 1 0
    /// S R R F A T T K
    ///
    /// Discovery frames reuse the byte differently: bits 0..2 are both set and
    /// bits 3..8 carry the address mask (see [`Control::address_mask`]).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Control: u8 {
        /// Frame is an acknowledgement (0xFD family) or a system frame (0xFE family).
        const ACK = 0b0000_0001;

        /// 2-bit sender counter of an I-message.
        const SENDER_COUNTER = 0b0000_0110;

        /// A 4-byte sender address follows the control byte.
        const HAS_SENDER = 0b0000_1000;

        /// Set on every data, acknowledgement and system frame.
        const FRAME = 0b0001_0000;

        /// 2-bit receiver counter.
        const RECEIVER_COUNTER = 0b0110_0000;

        /// Synchronisation bit of an I-message.
        const SYNC = 0b1000_0000;

        /// Both low bits set marks a discovery frame.
        const DISCOVERY = 0b0000_0011;
    }
}

impl Control {
    #[inline]
    pub fn sender_counter(self) -> u8 {
        (self.bits() >> 1) & 0x03
    }

    #[inline]
    pub fn receiver_counter(self) -> u8 {
        (self.bits() >> 5) & 0x03
    }

    #[inline]
    pub fn address_mask(self) -> u8 {
        self.bits() >> 3
    }

    #[inline]
    pub fn is_discovery(self) -> bool {
        self.contains(Self::DISCOVERY)
    }

    /// Control byte of an I-message.
    pub fn data(sync: bool, has_sender: bool, sender_counter: u8, receiver_counter: u8) -> Self {
        let mut bits = Self::FRAME.bits()
            | ((receiver_counter & 0x03) << 5)
            | ((sender_counter & 0x03) << 1);
        if sync {
            bits |= Self::SYNC.bits();
        }
        if has_sender {
            bits |= Self::HAS_SENDER.bits();
        }
        Self::from_bits_retain(bits)
    }

    pub fn ack(receiver_counter: u8) -> Self {
        Self::from_bits_retain(
            (Self::FRAME | Self::HAS_SENDER | Self::ACK).bits() | ((receiver_counter & 0x03) << 5),
        )
    }

    pub fn system(receiver_counter: u8) -> Self {
        Self::from_bits_retain(
            (Self::FRAME | Self::ACK).bits() | ((receiver_counter & 0x03) << 5),
        )
    }

    pub fn discovery(address_mask: u8) -> Self {
        Self::from_bits_retain(Self::DISCOVERY.bits() | ((address_mask & 0x1F) << 3))
    }
}
