//! # devsync
//!
//! `devsync` is the client-side runtime of a device that keeps its
//! configuration in sync with a remote authority over a pub/sub transport.
//! Remote commands and local device events meet on one internal queue, are
//! handled one at a time by a router thread, and turn into updates of a
//! persisted YAML config and outbound packets for the transport.
//!
//! ## Core Modules
//!
//! - `config`: Loads bootstrap settings and builds the per-process session.
//! - `device`: The handle device code uses to read config and raise events.
//! - `protocol`: Events, packets and the per-event protocol context.
//! - `router`: The single consumer of the internal queue.
//! - `store`: The device config file, the anti-replay timestamp and file locking.
//! - `utils`: Error types and logging.

pub mod config;
pub mod device;
pub mod protocol;
pub mod router;
pub mod store;
pub mod utils;

#[cfg(test)]
mod tests;
