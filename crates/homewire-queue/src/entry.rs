use homewire_proto::Packet;
use strum::{Display, FromRepr};

use crate::{
    message::{Direction, MessageRef},
    schedule::DispatchFlags,
};

/// Persisted discriminant of a [`QueueEntry`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[strum(serialize_all = "snake_case")]
pub enum EntryKind {
    Undefined = 0,
    Message = 1,
    Packet = 2,
}

/// One unit of work in an outbound queue.
#[derive(Debug, Clone)]
pub enum QueueEntry {
    /// A ready frame for the generic transport.
    Packet {
        packet: Packet,
        dispatch: DispatchFlags,
        /// Send without the transmit side signal.
        stealthy: bool,
        force_resend: bool,
    },
    /// A message template. Outgoing templates carry the packet that triggered them.
    Message {
        message: MessageRef,
        packet: Option<Packet>,
        force_resend: bool,
    },
}

impl QueueEntry {
    pub fn packet(
        packet: Packet,
        dispatch: DispatchFlags,
        stealthy: bool,
        force_resend: bool,
    ) -> Self {
        Self::Packet {
            packet,
            dispatch,
            stealthy,
            force_resend,
        }
    }

    pub fn message(message: MessageRef, packet: Option<Packet>, force_resend: bool) -> Self {
        Self::Message {
            message,
            packet,
            force_resend,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Packet { .. } => EntryKind::Packet,
            Self::Message { .. } => EntryKind::Message,
        }
    }

    /// Raw packets and outgoing messages are sent; incoming messages only wait.
    pub fn is_outgoing(&self) -> bool {
        match self {
            Self::Packet { .. } => true,
            Self::Message { message, .. } => message.is_outgoing(),
        }
    }

    pub(crate) fn is_incoming_message(&self) -> bool {
        matches!(self, Self::Message { message, .. } if message.direction == Direction::Incoming)
    }

    pub fn force_resend(&self) -> bool {
        match self {
            Self::Packet { force_resend, .. } | Self::Message { force_resend, .. } => *force_resend,
        }
    }

    pub fn stealthy(&self) -> bool {
        matches!(self, Self::Packet { stealthy: true, .. })
    }

    /// Resend and burst policy. Messages take theirs from the template.
    pub fn dispatch(&self) -> DispatchFlags {
        match self {
            Self::Packet { dispatch, .. } => *dispatch,
            Self::Message { message, .. } => message.dispatch,
        }
    }

    pub fn packet_ref(&self) -> Option<&Packet> {
        match self {
            Self::Packet { packet, .. } => Some(packet),
            Self::Message { packet, .. } => packet.as_ref(),
        }
    }

    pub fn message_ref(&self) -> Option<&MessageRef> {
        match self {
            Self::Message { message, .. } => Some(message),
            Self::Packet { .. } => None,
        }
    }
}
