//! Outbound conversations with bus peers.
//!
//! # Architecture
//!
//! - [`queue::OutboundQueue`]: entries for one peer, sent in order, with
//!   tiered resends of unanswered frames.
//! - [`pending::PendingQueues`]: backlog of queues spliced in once the active
//!   one drains.
//! - [`persist`]: durable form of queues and of the backlog.
//! - [`manager::QueueManager`]: active queue per peer address, with an idle
//!   sweep.
//! - [`link`]: collaborator traits (transport, handlers, service sink).
//! - [`schedule`]: resend decision and backoff bands.

pub mod action;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod link;
pub mod manager;
pub mod message;
pub mod pending;
pub mod persist;
pub mod queue;
pub mod schedule;
mod worker;

pub use action::ResetAction;
pub use config::{ManagerConfig, QueueConfig};
pub use entry::{EntryKind, QueueEntry};
pub use error::PersistError;
pub use link::{
    LastAction, MessageRegistry, OutgoingHandler, PeerActions, QueueLinks, ServiceMessages,
    Transport,
};
pub use manager::QueueManager;
pub use message::{Direction, MessageRef, MessageTemplate, Subtype};
pub use pending::PendingQueues;
pub use persist::DecodeContext;
pub use queue::{OutboundQueue, QueueKind};
pub use schedule::{DispatchFlags, ResendSchedule};
