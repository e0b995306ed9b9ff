//! Network infrastructure for the DyeWars server.
//!
//! Everything in this crate belongs to the I/O domain: the framed byte
//! protocol, per-socket connection state machines and the mio-driven
//! endpoint thread. Game state is never touched from here; the only
//! crossings are the [`support::PacketRouter`] seam (I/O → game) and the
//! per-connection send queues on [`client::ClientHandle`] (game → I/O).

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod buffer;
pub mod client;
pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod manager;
pub mod opcode;
pub mod queue;
pub mod support;
pub mod wire;
