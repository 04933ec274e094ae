//! Sans-I/O IMAP4rev1 client session engine.
//!
//! The engine owns every piece of protocol state — framing, response
//! routing, tag correlation, the connection state machine, IDLE — and leaves
//! I/O to the caller: feed it transport bytes with [`Engine::receive`],
//! drain [`Engine::take_outbound`] into the socket, and consume parsed
//! server events and command completions from [`Engine::poll_event`]. One
//! engine drives one connection; run several engines for several
//! connections.

mod dispatch;
mod engine;
mod error;
mod state;
mod types;

pub use crate::dispatch::Responder;
pub use crate::engine::{Credentials, Engine, EngineConfig};
pub use crate::error::ProtocolError;
pub use crate::state::CommandKind;
pub use crate::types::{
    CapabilitySet, CommandHandle, CommandPayload, Event, FetchRecord, ListEntry, MailboxStatus,
    Outcome, SectionData,
};

pub use imap_wire::builders::command::{Attribute, StatusItem, StoreOperation};
pub use imap_wire::types::{State, StreamHandle};
pub use imap_wire::LiteralSink;
