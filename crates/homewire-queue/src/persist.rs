//! Durable form of queues and of the pending FIFO.
//!
//! Queue layout (big-endian):
//! - `kind: u8`, `entry_count: u32`
//! - per entry:
//!   - `entry_kind: u8` (0 undefined, 1 message, 2 packet)
//!   - `stealthy: bool`, `force_resend: bool`
//!   - `has_packet: bool`, then `len: u8` and the escaped frame
//!   - `has_message: bool`, then `direction: u8`, `message_type: u8`,
//!     `subtype_count: u8` and `(index: u8, value: u8)` pairs
//!   - `parameter_name: string`, `channel: u32`, `interface_id: string`
//!
//! An empty queue serializes to nothing. The FIFO writes `count: u32` and,
//! per queue, its bytes as a `u32`-prefixed blob followed by
//! `has_reset_callback: bool` and, when set,
//! `channel: u32, key: string, reset_value: u32, reset_time_seconds: u32`.

use std::{collections::HashMap, sync::Arc};

use homewire_proto::Packet;
use tracing::{error, warn};

use crate::{
    action::ResetAction,
    codec::{BinaryReader, BinaryWriter},
    config::QueueConfig,
    entry::{EntryKind, QueueEntry},
    error::PersistError,
    link::{MessageRegistry, QueueLinks, Transport},
    message::{Direction, Subtype},
    pending::PendingQueues,
    queue::{OutboundQueue, QueueKind},
};

/// Persisted stand-in for "no channel".
pub const NO_CHANNEL: u32 = u32::MAX;

/// What restoring a queue needs from the surrounding system.
pub struct DecodeContext<'a> {
    pub registry: &'a dyn MessageRegistry,
    /// Collaborators of restored queues. The transport is the fallback when a
    /// persisted interface id is not in `interfaces`.
    pub links: &'a QueueLinks,
    pub interfaces: &'a HashMap<String, Arc<dyn Transport>>,
    pub config: &'a QueueConfig,
}

fn write_entry(w: &mut BinaryWriter, entry: &QueueEntry, wire: Option<&[u8]>) {
    w.u8(entry.kind() as u8);
    w.bool(entry.stealthy());
    w.bool(entry.force_resend());

    match wire {
        Some(bytes) => {
            w.bool(true);
            w.blob_u8(bytes);
        }
        None => w.bool(false),
    }

    match entry.message_ref() {
        Some(message) => {
            w.bool(true);
            w.u8(message.direction as u8);
            w.u8(message.message_type);
            w.u8(message.subtypes.len().min(usize::from(u8::MAX)) as u8);
            for subtype in message.subtypes.iter().take(usize::from(u8::MAX)) {
                w.u8(subtype.index);
                w.u8(subtype.value);
            }
        }
        None => w.bool(false),
    }
}

/// The layout has no room for dispatch flags. Packet entries come back with
/// the configured [`QueueConfig::restored_dispatch`], messages with their
/// template's.
fn read_entry(
    r: &mut BinaryReader<'_>,
    ctx: &DecodeContext<'_>,
) -> Result<QueueEntry, PersistError> {
    let kind_byte = r.u8()?;
    let kind = EntryKind::from_repr(kind_byte).ok_or(PersistError::InvalidEntryKind(kind_byte))?;
    let stealthy = r.bool()?;
    let force_resend = r.bool()?;

    let packet = if r.bool()? {
        Some(Packet::try_decode(r.blob_u8()?)?)
    } else {
        None
    };

    let message = if r.bool()? {
        let direction_byte = r.u8()?;
        let direction = Direction::from_repr(direction_byte)
            .ok_or(PersistError::InvalidDirection(direction_byte))?;
        let message_type = r.u8()?;
        let count = r.u8()?;
        let subtypes = (0..count)
            .map(|_| Ok(Subtype::new(r.u8()?, r.u8()?)))
            .collect::<Result<Vec<_>, PersistError>>()?;
        let message = ctx
            .registry
            .find(direction, message_type, &subtypes)
            .ok_or(PersistError::UnknownMessage {
                direction: direction_byte,
                message_type,
            })?;
        Some(message)
    } else {
        None
    };

    match (kind, packet, message) {
        (EntryKind::Packet, Some(packet), _) => Ok(QueueEntry::packet(
            packet,
            ctx.config.restored_dispatch,
            stealthy,
            force_resend,
        )),
        (EntryKind::Message, packet, Some(message)) => {
            Ok(QueueEntry::message(message, packet, force_resend))
        }
        _ => Err(PersistError::MissingVariant(kind_byte)),
    }
}

impl OutboundQueue {
    pub fn serialize(&self) -> Vec<u8> {
        let (kind, entries, parameter_name, channel) = {
            let state = self.state.lock();
            (
                state.kind,
                state.entries.iter().cloned().collect::<Vec<_>>(),
                state.parameter_name.clone(),
                state.channel,
            )
        };

        let mut encoded = Vec::with_capacity(entries.len());
        for entry in &entries {
            let wire = entry.packet_ref().map(Packet::to_wire);
            if wire.as_ref().is_some_and(|w| w.len() > usize::from(u8::MAX)) {
                error!(queue = self.id(), "escaped packet too long to persist, dropping entry");
                continue;
            }
            encoded.push((entry, wire));
        }
        if encoded.is_empty() {
            return Vec::new();
        }

        let interface = self.links().transport.id().to_owned();
        let mut w = BinaryWriter::new();
        w.u8(kind as u8);
        w.u32(encoded.len() as u32);
        for (entry, wire) in encoded {
            write_entry(&mut w, entry, wire.as_deref());
            w.string(&parameter_name);
            w.u32(channel.unwrap_or(NO_CHANNEL));
            w.string(&interface);
        }
        w.into_inner()
    }

    /// Rebuild a queue from [`OutboundQueue::serialize`] output.
    ///
    /// Entries are restored without being sent.
    pub fn deserialize(
        bytes: &[u8],
        ctx: &DecodeContext<'_>,
        id: u32,
    ) -> Result<Arc<Self>, PersistError> {
        let mut r = BinaryReader::new(bytes);
        let kind_byte = r.u8()?;
        let kind =
            QueueKind::from_repr(kind_byte).ok_or(PersistError::InvalidQueueKind(kind_byte))?;
        let count = r.u32()?;

        let mut entries = Vec::new();
        let mut parameter_name = String::new();
        let mut channel = None;
        let mut interface = None;
        for _ in 0..count {
            entries.push(read_entry(&mut r, ctx)?);
            parameter_name = r.string()?;
            channel = Some(r.u32()?).filter(|&c| c != NO_CHANNEL);
            interface = Some(r.string()?);
        }

        let mut links = ctx.links.clone();
        if let Some(transport) = interface.as_ref().and_then(|id| ctx.interfaces.get(id)) {
            links.transport = transport.clone();
        } else if let Some(id) = interface.filter(|id| id.as_str() != links.transport.id()) {
            warn!(interface = %id, "unknown interface, using the default transport");
        }

        let queue = OutboundQueue::new(links, kind, id, ctx.config.clone());
        {
            let mut state = queue.state.lock();
            state.entries.extend(entries);
            state.parameter_name = parameter_name;
            state.channel = channel;
        }
        Ok(queue)
    }
}

impl PendingQueues {
    pub fn serialize(&self) -> Vec<u8> {
        let blobs: Vec<_> = self
            .queues_with_ids()
            .into_iter()
            .map(|(_, queue)| (queue.serialize(), queue.drain_callback()))
            .filter(|(bytes, _)| !bytes.is_empty())
            .collect();

        let mut w = BinaryWriter::new();
        w.u32(blobs.len() as u32);
        for (bytes, action) in blobs {
            w.blob_u32(&bytes);
            match action {
                Some(ResetAction::ScheduleValueReset {
                    channel,
                    key,
                    reset_value,
                    reset_at_secs,
                }) => {
                    w.bool(true);
                    w.u32(channel);
                    w.string(&key);
                    w.u32(reset_value);
                    w.u32(reset_at_secs);
                }
                None => w.bool(false),
            }
        }
        w.into_inner()
    }

    /// Rebuild a FIFO from [`PendingQueues::serialize`] output.
    ///
    /// Restored queues never send on their own. A queue that fails to restore
    /// is skipped; a truncated FIFO is an error.
    pub fn deserialize(bytes: &[u8], ctx: &DecodeContext<'_>) -> Result<Self, PersistError> {
        let fifo = Self::new();
        let mut r = BinaryReader::new(bytes);
        let count = r.u32()?;
        for _ in 0..count {
            let blob = r.blob_u32()?;
            let action = if r.bool()? {
                Some(ResetAction::ScheduleValueReset {
                    channel: r.u32()?,
                    key: r.string()?,
                    reset_value: r.u32()?,
                    reset_at_secs: r.u32()?,
                })
            } else {
                None
            };

            match OutboundQueue::deserialize(blob, ctx, 0) {
                Ok(queue) => {
                    queue.set_no_sending(true);
                    queue.set_drain_callback(action);
                    fifo.push(queue);
                }
                Err(err) => warn!(
                    error = %err,
                    bytes = %hex::encode(blob),
                    "skipping pending queue that failed to restore"
                ),
            }
        }
        Ok(fifo)
    }
}
