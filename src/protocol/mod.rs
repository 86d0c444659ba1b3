//! The `protocol` module holds everything that crosses the queues: events,
//! command vocabularies, outbound packets and the per-event context that
//! ties them to the stores.

pub mod command;
pub mod context;
pub mod event;
pub mod packet;

pub use command::{LocalCommand, RemoteCommand};
pub use context::{Outcome, ProtocolContext};
pub use event::{Event, Origin};
pub use packet::{InboundMessage, Outbound, Packet, PacketKind, TaskId, decode_inbound};

#[cfg(test)]
mod tests;
