use std::string::FromUtf8Error;

use homewire_proto::ProtoError;
use thiserror::Error;

/// Failure to restore queues from their persisted form.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("persisted data ends early")]
    Truncated,
    #[error("invalid queue kind {0}")]
    InvalidQueueKind(u8),
    #[error("invalid entry kind {0}")]
    InvalidEntryKind(u8),
    #[error("entry kind {0} is missing its packet or message")]
    MissingVariant(u8),
    #[error("invalid message direction {0}")]
    InvalidDirection(u8),
    #[error("no message matches direction {direction}, type {message_type:#04x}")]
    UnknownMessage { direction: u8, message_type: u8 },
    #[error("persisted packet is not a valid frame: {0}")]
    Packet(#[from] ProtoError),
    #[error("invalid utf-8 in persisted string: {0}")]
    Utf8(#[from] FromUtf8Error),
}
