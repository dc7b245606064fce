//! Real-time meeting relay over a small binary protocol.
//!
//! Clients hold one TCP connection, log in, create or join a room, and
//! exchange framed chat, audio, video and presence messages that the relay
//! fans out to the other members of the room.
//!
//! - [`codec`] encodes and incrementally decodes length-prefixed frames.
//! - [`message`] names the message kinds and the text payload conventions.
//! - [`connection`] owns one client stream: the read loop and a serialized
//!   write path.
//! - [`session`] is the per-connection login/room state machine.
//! - [`room`] keeps rooms and their members in concurrent maps.
//! - [`server`] accepts connections and dispatches messages to room state.
//! - [`auth`] is the credential check the relay delegates to.
//! - [`client`] is a framed client, used by the terminal UI and the tests.

pub mod auth;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod room;
pub mod server;
pub mod session;
pub mod stats;
