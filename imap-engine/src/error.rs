use imap_wire::types::State;
use imap_wire::{FrameError, ParseFailure};

use crate::state::CommandKind;

/// Protocol-level failures. Frame and parse errors mean wire framing is lost
/// and the session is torn down; the rest are rejected operations or server
/// misbehavior the session may survive.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("{command:?} is not legal in connection state {state:?}")]
    UnexpectedState { command: CommandKind, state: State },
    #[error("server tag {0:?} does not match any pending command")]
    UnexpectedTag(String),
    #[error("server does not advertise IMAP4rev1")]
    NotImap4Rev1,
    #[error("STARTTLS is not available (not advertised, or TLS already active)")]
    StartTlsNotAvailable,
    #[error("duplicate {0} item within one FETCH response")]
    DuplicateFetchItem(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Parse(#[from] ParseFailure),
}
