//! Command legality against the connection state.
//!
//! "Once the connection between client and server is established, an IMAP4rev1
//! connection is in one of four states. The initial state is identified in the
//! server greeting. Most commands are only valid in certain states. It is a
//! protocol error for the client to attempt a command while the connection is
//! in an inappropriate state." (RFC 3501, section 3)
//!
//! The engine tracks three more states around the RFC's four: before the
//! transport connects, between connect and the greeting, and between the
//! greeting and the capability exchange.

use imap_wire::types::State;

/// Classification of every command the engine can put on the wire, used to
/// key the state table and the pending-command bookkeeping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandKind {
    Capability,
    StartTls,
    Login,
    Authenticate,
    Select,
    Examine,
    Status,
    List,
    Lsub,
    Create,
    Delete,
    Rename,
    Subscribe,
    Unsubscribe,
    Fetch,
    Store,
    Expunge,
    Close,
    Idle,
    Noop,
    Logout,
}

impl CommandKind {
    /// The pre-state set of this command. Nothing is legal before the server
    /// greeting has been seen.
    pub fn allowed_in(self, state: State) -> bool {
        use CommandKind::*;
        use State::*;
        match self {
            Capability | Noop | CommandKind::Logout => {
                matches!(state, ServerGreeting | NotAuthenticated | Authenticated | Selected)
            }
            StartTls | Login | Authenticate => matches!(state, NotAuthenticated),
            Select | Examine | Status | List | Lsub | Create | Delete | Rename | Subscribe
            | Unsubscribe => matches!(state, Authenticated | Selected),
            Fetch | Store | Expunge | Close | Idle => matches!(state, Selected),
        }
    }
}
