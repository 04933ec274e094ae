use std::collections::{HashMap, HashSet};

use imap_wire::types::{
    AttributeValue, BodyStructure, Capability, Envelope, StatusAttribute, Str, StreamHandle,
};

use crate::error::ProtocolError;

/// Caller-side identifier for a submitted command. Stable across IDLE
/// deferral; the wire tag is allocated when the command actually goes out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CommandHandle(pub(crate) u64);

/// The server's advertised capabilities, with the AUTH= mechanisms split out
/// in their advertised order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CapabilitySet {
    names: HashSet<String>,
    auth: Vec<String>,
    imap4rev1: bool,
}

impl CapabilitySet {
    pub fn from_wire(capabilities: &[Capability<'_>]) -> Self {
        let mut set = CapabilitySet::default();
        for capability in capabilities {
            match capability {
                Capability::Imap4rev1 => {
                    set.imap4rev1 = true;
                    set.names.insert("IMAP4REV1".to_string());
                }
                Capability::Auth(mechanism) => {
                    let mechanism = mechanism.to_ascii_uppercase();
                    set.names.insert(format!("AUTH={mechanism}"));
                    set.auth.push(mechanism);
                }
                Capability::Atom(name) => {
                    set.names.insert(name.to_ascii_uppercase());
                }
            }
        }
        set
    }

    pub fn has(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_uppercase())
    }

    pub fn auth_mechanisms(&self) -> &[String] {
        &self.auth
    }

    pub fn is_imap4rev1(&self) -> bool {
        self.imap4rev1
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Per-mailbox counters and flags, from SELECT/EXAMINE/STATUS and kept fresh
/// by unsolicited untagged updates while the mailbox is selected.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MailboxStatus {
    pub name: String,
    pub flags: Vec<String>,
    pub permanent_flags: Vec<String>,
    pub exists: u32,
    pub recent: u32,
    pub unseen: Option<u32>,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
    pub read_only: bool,
}

/// One mailbox line of a LIST or LSUB result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListEntry {
    pub flags: Vec<String>,
    pub delimiter: Option<String>,
    pub name: String,
}

/// `BODY[...]` payload: captured bytes, or the handle of a literal that was
/// streamed to the caller's sink.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SectionData {
    Inline(Vec<u8>),
    Stream(StreamHandle),
}

/// The item tree of one FETCH response for one message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchRecord {
    pub seq: u32,
    pub flags: Option<Vec<String>>,
    pub internal_date: Option<String>,
    pub rfc822_size: Option<u64>,
    pub uid: Option<u64>,
    pub envelope: Option<Envelope<'static>>,
    pub body: Option<BodyStructure<'static>>,
    /// Keyed by the raw item key (`BODY[HEADER]`, `BODY[1.2]<0>`, ...).
    /// A NIL section leaves its key absent.
    pub sections: HashMap<String, SectionData>,
}

impl FetchRecord {
    pub(crate) fn new(seq: u32) -> Self {
        FetchRecord {
            seq,
            ..Default::default()
        }
    }

    /// Fold one parsed item into the record. Items may arrive in any order;
    /// the same item twice in one response is a protocol error.
    pub(crate) fn absorb(&mut self, attr: AttributeValue<'_>) -> Result<(), ProtocolError> {
        match attr {
            AttributeValue::Flags(flags) => set_once(
                &mut self.flags,
                flags.iter().map(|f| f.to_string()).collect(),
                "FLAGS",
            ),
            AttributeValue::InternalDate(date) => {
                set_once(&mut self.internal_date, date.into_owned(), "INTERNALDATE")
            }
            AttributeValue::Rfc822Size(size) => {
                set_once(&mut self.rfc822_size, size, "RFC822.SIZE")
            }
            AttributeValue::Uid(uid) => set_once(&mut self.uid, uid, "UID"),
            AttributeValue::Envelope(envelope) => {
                set_once(&mut self.envelope, envelope.into_owned(), "ENVELOPE")
            }
            AttributeValue::BodyStructure(body) => {
                set_once(&mut self.body, body.into_owned(), "BODY")
            }
            AttributeValue::BodySection { key, data, .. } => {
                if self.sections.contains_key(key.as_ref()) {
                    return Err(ProtocolError::DuplicateFetchItem(key.into_owned()));
                }
                match data {
                    Str::Nil => {}
                    Str::Text(bytes) => {
                        self.sections
                            .insert(key.into_owned(), SectionData::Inline(bytes.into_owned()));
                    }
                    Str::Stream(handle) => {
                        self.sections
                            .insert(key.into_owned(), SectionData::Stream(handle));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, item: &str) -> Result<(), ProtocolError> {
    if slot.is_some() {
        return Err(ProtocolError::DuplicateFetchItem(item.to_string()));
    }
    *slot = Some(value);
    Ok(())
}

/// What a completed command hands back.
#[derive(Debug, PartialEq)]
pub enum CommandPayload {
    None,
    Capabilities(CapabilitySet),
    Mailbox(MailboxStatus),
    List(Vec<ListEntry>),
    Status {
        mailbox: String,
        attributes: Vec<StatusAttribute>,
    },
    Search(Vec<u32>),
    Expunged(Vec<u32>),
}

/// Terminal result of a command, delivered in a [`Event::Completed`].
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Ok(CommandPayload),
    No(String),
    Bad(String),
    Cancelled,
    TimedOut,
    ConnectionLost,
}

/// Everything the engine reports back to its caller.
#[derive(Debug, PartialEq)]
pub enum Event {
    Greeting {
        preauth: bool,
        information: Option<String>,
    },
    CapabilitiesUpdated(CapabilitySet),
    /// STARTTLS was accepted; the transport must negotiate TLS before
    /// feeding any further bytes, and must buffer no plaintext after this.
    UpgradeTls,
    Alert(String),
    MailboxUpdate(MailboxStatus),
    Expunged(u32),
    Fetched(FetchRecord),
    IdleEntered,
    IdleUpdate {
        name: String,
        number: u32,
    },
    Bye {
        information: Option<String>,
    },
    Disconnected {
        reason: String,
    },
    ProtocolViolation {
        message: String,
    },
    Completed {
        handle: CommandHandle,
        /// Empty when the command was cancelled before ever reaching the wire.
        tag: String,
        outcome: Outcome,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_capability_set() {
        let caps = CapabilitySet::from_wire(&[
            Capability::Imap4rev1,
            Capability::Atom(Cow::Borrowed("IDLE")),
            Capability::Auth(Cow::Borrowed("GSSAPI")),
            Capability::Auth(Cow::Borrowed("plain")),
        ]);
        assert!(caps.is_imap4rev1());
        assert!(caps.has("idle"));
        assert!(caps.has("AUTH=PLAIN"));
        assert!(!caps.has("STARTTLS"));
        assert_eq!(caps.auth_mechanisms(), ["GSSAPI", "PLAIN"]);
    }

    #[test]
    fn test_fetch_record_rejects_duplicates() {
        let mut record = FetchRecord::new(1);
        record.absorb(AttributeValue::Uid(7)).unwrap();
        match record.absorb(AttributeValue::Uid(7)) {
            Err(ProtocolError::DuplicateFetchItem(item)) => assert_eq!(item, "UID"),
            rsp => panic!("unexpected result {:?}", rsp),
        }
    }

    #[test]
    fn test_nil_section_stays_absent() {
        let mut record = FetchRecord::new(1);
        record
            .absorb(AttributeValue::BodySection {
                key: Cow::Borrowed("BODY[HEADER]"),
                section: None,
                index: None,
                data: Str::Nil,
            })
            .unwrap();
        assert!(record.sections.is_empty());

        record
            .absorb(AttributeValue::BodySection {
                key: Cow::Borrowed("BODY[HEADER]"),
                section: None,
                index: None,
                data: Str::Text(Cow::Borrowed(b"")),
            })
            .unwrap();
        assert_eq!(
            record.sections.get("BODY[HEADER]"),
            Some(&SectionData::Inline(Vec::new()))
        );
    }
}
