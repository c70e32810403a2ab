//! Wire protocol for the control channel.
//!
//! Inbound frames are command URIs of the form
//! `printago://<authority>/<command_type>/<action>?key=value&...`; outbound
//! frames are JSON envelopes. The grammar table is part of the external
//! contract and lives in [`grammar`].

pub mod command;
pub mod envelope;
pub mod grammar;

pub use command::{Command, ParseError, Parameters, SCHEME};
pub use envelope::{CLIENT_TYPE, Envelope, MessageType};
pub use grammar::{Action, CommandType, GRAMMAR};
