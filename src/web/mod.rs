//! Websocket control channel: the accept loop, sessions, and the slot that
//! tracks which session is active.

pub mod backoff;
pub mod server;
pub mod session;
pub mod slot;

pub use backoff::Backoff;
pub use server::{ControlServer, ServerError};
pub use session::{Session, SessionIo};
pub use slot::SessionSlot;
