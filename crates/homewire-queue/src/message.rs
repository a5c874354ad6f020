use std::sync::Arc;

use strum::{Display, FromRepr};

use crate::schedule::DispatchFlags;

/// Which way a message travels, seen from the hub.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Incoming = 0,
    Outgoing = 1,
}

/// A payload byte that must hold a given value for a message to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subtype {
    pub index: u8,
    pub value: u8,
}

impl Subtype {
    pub fn new(index: u8, value: u8) -> Self {
        Self { index, value }
    }
}

/// A message-matching rule: direction, message type and sub-type predicates.
///
/// Outgoing templates are sent through the
/// [`OutgoingHandler`](crate::link::OutgoingHandler) rather than the generic
/// transport; incoming ones sit at a queue front as placeholders for an
/// expected answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageTemplate {
    pub direction: Direction,
    pub message_type: u8,
    /// Resend and burst policy of the message once queued.
    pub dispatch: DispatchFlags,
    pub subtypes: Vec<Subtype>,
}

impl MessageTemplate {
    pub fn new(direction: Direction, message_type: u8, dispatch: DispatchFlags) -> Self {
        Self {
            direction,
            message_type,
            dispatch,
            subtypes: Vec::new(),
        }
    }

    pub fn with_subtype(mut self, index: u8, value: u8) -> Self {
        self.subtypes.push(Subtype::new(index, value));
        self
    }

    #[inline]
    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }
}

/// Shared handle to a registered template.
pub type MessageRef = Arc<MessageTemplate>;
