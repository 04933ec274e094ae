use std::collections::VecDeque;
use std::time::Instant;

use imap_wire::types::{RequestId, State};

use crate::state::CommandKind;
use crate::types::{CommandHandle, CommandPayload};

/// Responds to AUTHENTICATE continuation challenges: decoded challenge bytes
/// in, response bytes out (the engine handles the base64 framing).
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Monotonic tag source. Tags are fixed-width (`A0001`) until the counter
/// outgrows four digits, then simply widen; a tag value is never reused
/// within a session.
pub(crate) struct TagGenerator {
    next: u64,
}

impl TagGenerator {
    pub(crate) fn new() -> Self {
        TagGenerator { next: 1 }
    }
}

impl Iterator for TagGenerator {
    type Item = RequestId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = RequestId(format!("A{:04}", self.next));
        self.next += 1;
        Some(id)
    }
}

/// A command that has been written (at least partially) and is waiting for
/// its tagged response.
pub(crate) struct PendingCommand {
    pub handle: CommandHandle,
    pub tag: RequestId,
    pub kind: CommandKind,
    #[allow(dead_code)]
    pub sent_at: Instant,
    pub deadline: Option<Instant>,
    /// Cancelled or timed out: the tagged response is still consumed to keep
    /// framing intact, but silently.
    pub abandoned: bool,
    /// Literal-gated parts still waiting for `+` continuations.
    pub remaining_parts: VecDeque<Vec<u8>>,
    pub next_state: Option<State>,
    /// Untagged data collected for this command's completion.
    pub payload: CommandPayload,
    pub responder: Option<Responder>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tags_start_fixed_width() {
        let mut tags = TagGenerator::new();
        assert_eq!(tags.next().unwrap().0, "A0001");
        assert_eq!(tags.next().unwrap().0, "A0002");
    }

    #[test]
    fn test_tags_widen_instead_of_wrapping() {
        let mut tags = TagGenerator::new();
        tags.next = 9999;
        assert_eq!(tags.next().unwrap().0, "A9999");
        assert_eq!(tags.next().unwrap().0, "A10000");
    }

    #[test]
    fn test_tags_are_unique() {
        let mut seen = HashSet::new();
        for tag in TagGenerator::new().take(20_000) {
            assert!(seen.insert(tag.0));
        }
    }
}
