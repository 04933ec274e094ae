use crate::quoted_string;
use crate::types::State;
use crate::utf7;

/// A serialised command. `parts[0]` goes out as `<tag> SP parts[0] CRLF`;
/// every later part is gated on a server `+` continuation (its predecessor
/// ends with a `{N}` literal announcement). `next_state` is applied to the
/// connection when the tagged response comes back OK.
#[derive(Debug, Eq, PartialEq)]
pub struct Command {
    pub parts: Vec<Vec<u8>>,
    pub next_state: Option<State>,
}

impl Command {
    fn simple(args: Vec<u8>, next_state: Option<State>) -> Command {
        Command {
            parts: vec![args],
            next_state,
        }
    }
}

/// Status counters that can be requested with STATUS.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusItem {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
}

impl StatusItem {
    fn name(self) -> &'static str {
        match self {
            StatusItem::Messages => "MESSAGES",
            StatusItem::Recent => "RECENT",
            StatusItem::UidNext => "UIDNEXT",
            StatusItem::UidValidity => "UIDVALIDITY",
            StatusItem::Unseen => "UNSEEN",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreOperation {
    Replace,
    Add,
    Remove,
}

pub struct CommandBuilder {}

impl CommandBuilder {
    pub fn capability() -> Command {
        Command::simple(b"CAPABILITY".to_vec(), None)
    }

    pub fn noop() -> Command {
        Command::simple(b"NOOP".to_vec(), None)
    }

    pub fn starttls() -> Command {
        Command::simple(b"STARTTLS".to_vec(), None)
    }

    pub fn login(user_name: &str, password: &str) -> Command {
        let mut parts = vec![b"LOGIN ".to_vec()];
        string_arg(&mut parts, user_name.as_bytes());
        push_text(&mut parts, b" ");
        string_arg(&mut parts, password.as_bytes());
        Command {
            parts,
            next_state: Some(State::Authenticated),
        }
    }

    pub fn authenticate(mechanism: &str) -> Command {
        Command::simple(
            format!("AUTHENTICATE {}", mechanism.to_ascii_uppercase()).into_bytes(),
            Some(State::Authenticated),
        )
    }

    pub fn select(mailbox: &str) -> Command {
        Command::simple(mailbox_command(b"SELECT", mailbox), Some(State::Selected))
    }

    pub fn examine(mailbox: &str) -> Command {
        Command::simple(mailbox_command(b"EXAMINE", mailbox), Some(State::Selected))
    }

    pub fn create(mailbox: &str) -> Command {
        Command::simple(mailbox_command(b"CREATE", mailbox), None)
    }

    pub fn delete(mailbox: &str) -> Command {
        Command::simple(mailbox_command(b"DELETE", mailbox), None)
    }

    pub fn rename(from: &str, to: &str) -> Command {
        let mut args = mailbox_command(b"RENAME", from);
        args.push(b' ');
        quoted_mailbox(&mut args, to);
        Command::simple(args, None)
    }

    pub fn subscribe(mailbox: &str) -> Command {
        Command::simple(mailbox_command(b"SUBSCRIBE", mailbox), None)
    }

    pub fn unsubscribe(mailbox: &str) -> Command {
        Command::simple(mailbox_command(b"UNSUBSCRIBE", mailbox), None)
    }

    pub fn list(reference: &str, pattern: &str) -> Command {
        let mut args = mailbox_command(b"LIST", reference);
        args.push(b' ');
        quoted_mailbox(&mut args, pattern);
        Command::simple(args, None)
    }

    pub fn lsub(reference: &str, pattern: &str) -> Command {
        let mut args = mailbox_command(b"LSUB", reference);
        args.push(b' ');
        quoted_mailbox(&mut args, pattern);
        Command::simple(args, None)
    }

    pub fn status(mailbox: &str, items: &[StatusItem]) -> Command {
        let mut args = mailbox_command(b"STATUS", mailbox);
        args.extend(b" (");
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                args.push(b' ');
            }
            args.extend(item.name().as_bytes());
        }
        args.push(b')');
        Command::simple(args, None)
    }

    pub fn store(
        sequence_set: &str,
        operation: StoreOperation,
        silent: bool,
        flags: &[&str],
    ) -> Command {
        Self::store_common(b"STORE ", sequence_set, operation, silent, flags)
    }

    pub fn uid_store(
        sequence_set: &str,
        operation: StoreOperation,
        silent: bool,
        flags: &[&str],
    ) -> Command {
        Self::store_common(b"UID STORE ", sequence_set, operation, silent, flags)
    }

    fn store_common(
        prefix: &[u8],
        sequence_set: &str,
        operation: StoreOperation,
        silent: bool,
        flags: &[&str],
    ) -> Command {
        let mut args = prefix.to_vec();
        args.extend(sequence_set.as_bytes());
        args.push(b' ');
        args.extend(match operation {
            StoreOperation::Replace => &b""[..],
            StoreOperation::Add => &b"+"[..],
            StoreOperation::Remove => &b"-"[..],
        });
        args.extend(b"FLAGS");
        if silent {
            args.extend(b".SILENT");
        }
        args.extend(b" (");
        for (i, flag) in flags.iter().enumerate() {
            if i > 0 {
                args.push(b' ');
            }
            args.extend(flag.as_bytes());
        }
        args.push(b')');
        Command::simple(args, None)
    }

    pub fn expunge() -> Command {
        Command::simple(b"EXPUNGE".to_vec(), None)
    }

    pub fn close() -> Command {
        Command::simple(b"CLOSE".to_vec(), Some(State::Authenticated))
    }

    pub fn idle() -> Command {
        Command::simple(b"IDLE".to_vec(), None)
    }

    pub fn logout() -> Command {
        Command::simple(b"LOGOUT".to_vec(), Some(State::Logout))
    }

    pub fn fetch() -> FetchCommandEmpty {
        FetchCommandEmpty {
            args: b"FETCH ".to_vec(),
        }
    }

    pub fn uid_fetch() -> FetchCommandEmpty {
        FetchCommandEmpty {
            args: b"UID FETCH ".to_vec(),
        }
    }
}

fn mailbox_command(verb: &[u8], mailbox: &str) -> Vec<u8> {
    let mut args = verb.to_vec();
    args.push(b' ');
    quoted_mailbox(&mut args, mailbox);
    args
}

// Mailbox names go out in modified UTF-7, which leaves only quotable ASCII.
fn quoted_mailbox(args: &mut Vec<u8>, mailbox: &str) {
    let encoded = utf7::encode_mailbox(mailbox);
    args.push(b'"');
    args.extend(
        quoted_string(&encoded)
            .expect("modified UTF-7 contains no CR or LF")
            .as_bytes(),
    );
    args.push(b'"');
}

fn push_text(parts: &mut Vec<Vec<u8>>, text: &[u8]) {
    parts
        .last_mut()
        .expect("command always has a first part")
        .extend(text);
}

// Arguments that fit in a quoted string are quoted; anything long, non-ASCII
// or containing CR/LF is announced as a `{N}` literal and shipped in the next
// continuation-gated part.
fn string_arg(parts: &mut Vec<Vec<u8>>, value: &[u8]) {
    let quotable = value.len() <= 1000
        && value
            .iter()
            .all(|&b| b.is_ascii() && b != b'\r' && b != b'\n');
    if quotable {
        let text = std::str::from_utf8(value).expect("ASCII checked above");
        push_text(parts, b"\"");
        push_text(
            parts,
            quoted_string(text)
                .expect("CR and LF checked above")
                .as_bytes(),
        );
        push_text(parts, b"\"");
    } else {
        push_text(parts, format!("{{{}}}", value.len()).as_bytes());
        parts.push(value.to_vec());
    }
}

/// Fetch items that can be requested by name.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Attribute {
    Body,
    BodyStructure,
    Envelope,
    Flags,
    InternalDate,
    Rfc822Size,
    Uid,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttrMacro {
    All,
    Fast,
    Full,
}

pub struct FetchCommandEmpty {
    args: Vec<u8>,
}

impl FetchBuilderMessages for FetchCommandEmpty {
    fn prepare(self) -> FetchCommandMessages {
        FetchCommandMessages { args: self.args }
    }
}

pub struct FetchCommandMessages {
    args: Vec<u8>,
}

impl FetchBuilderMessages for FetchCommandMessages {
    fn prepare(self) -> FetchCommandMessages {
        let FetchCommandMessages { mut args } = self;
        args.push(b',');
        FetchCommandMessages { args }
    }
}

impl FetchCommandMessages {
    pub fn attr_macro(self, named: AttrMacro) -> FetchCommand {
        let FetchCommandMessages { mut args } = self;
        args.push(b' ');
        args.extend(
            match named {
                AttrMacro::All => "ALL",
                AttrMacro::Fast => "FAST",
                AttrMacro::Full => "FULL",
            }
            .as_bytes(),
        );
        FetchCommand { args }
    }
}

pub trait FetchBuilderMessages
where
    Self: Sized,
{
    fn prepare(self) -> FetchCommandMessages;

    fn num(self, num: u32) -> FetchCommandMessages {
        let FetchCommandMessages { mut args } = self.prepare();
        args.extend(num.to_string().as_bytes());
        FetchCommandMessages { args }
    }

    /// Append an already-formatted sequence set (`2:4,7,10:*`).
    fn set(self, sequence_set: &str) -> FetchCommandMessages {
        let FetchCommandMessages { mut args } = self.prepare();
        args.extend(sequence_set.as_bytes());
        FetchCommandMessages { args }
    }

    fn range(self, start: u32, stop: u32) -> FetchCommandMessages {
        let FetchCommandMessages { mut args } = self.prepare();
        args.extend(start.to_string().as_bytes());
        args.push(b':');
        args.extend(stop.to_string().as_bytes());
        FetchCommandMessages { args }
    }

    fn all_after(self, start: u32) -> FetchCommandMessages {
        let FetchCommandMessages { mut args } = self.prepare();
        args.extend(start.to_string().as_bytes());
        args.extend(b":*");
        FetchCommandMessages { args }
    }
}

pub struct FetchCommandAttributes {
    args: Vec<u8>,
}

impl FetchBuilderAttributes for FetchCommandMessages {
    fn prepare(self) -> FetchCommandAttributes {
        let FetchCommandMessages { mut args } = self;
        args.extend(b" (");
        FetchCommandAttributes { args }
    }
}

impl FetchBuilderAttributes for FetchCommandAttributes {
    fn prepare(self) -> FetchCommandAttributes {
        let FetchCommandAttributes { mut args } = self;
        args.push(b' ');
        FetchCommandAttributes { args }
    }
}

pub trait FetchBuilderAttributes
where
    Self: Sized,
{
    fn prepare(self) -> FetchCommandAttributes;

    fn attr(self, attr: Attribute) -> FetchCommandAttributes {
        let FetchCommandAttributes { mut args } = self.prepare();
        args.extend(
            match attr {
                Attribute::Body => "BODY",
                Attribute::BodyStructure => "BODYSTRUCTURE",
                Attribute::Envelope => "ENVELOPE",
                Attribute::Flags => "FLAGS",
                Attribute::InternalDate => "INTERNALDATE",
                Attribute::Rfc822Size => "RFC822.SIZE",
                Attribute::Uid => "UID",
            }
            .as_bytes(),
        );
        FetchCommandAttributes { args }
    }

    /// Request `BODY[<section>]`, e.g. `section("HEADER")` or `section("1.2")`.
    fn section(self, path: &str) -> FetchCommandAttributes {
        let FetchCommandAttributes { mut args } = self.prepare();
        args.extend(b"BODY[");
        args.extend(path.as_bytes());
        args.push(b']');
        FetchCommandAttributes { args }
    }

    /// Like [`FetchBuilderAttributes::section`], but without setting \Seen.
    fn peek_section(self, path: &str) -> FetchCommandAttributes {
        let FetchCommandAttributes { mut args } = self.prepare();
        args.extend(b"BODY.PEEK[");
        args.extend(path.as_bytes());
        args.push(b']');
        FetchCommandAttributes { args }
    }
}

pub struct FetchCommand {
    args: Vec<u8>,
}

pub trait FetchBuilderModifiers
where
    Self: Sized,
{
    fn prepare(self) -> FetchCommand;

    fn build(self) -> Command {
        let FetchCommand { args } = self.prepare();
        Command::simple(args, None)
    }
}

impl FetchBuilderModifiers for FetchCommandAttributes {
    fn prepare(self) -> FetchCommand {
        let FetchCommandAttributes { mut args, .. } = self;
        args.push(b')');
        FetchCommand { args }
    }
}

impl FetchBuilderModifiers for FetchCommand {
    fn prepare(self) -> FetchCommand {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login() {
        assert_eq!(
            CommandBuilder::login("djc", "s3cr3t").parts,
            vec![b"LOGIN \"djc\" \"s3cr3t\"".to_vec()]
        );
        assert_eq!(
            CommandBuilder::login("djc", "domain\\password").parts,
            vec![b"LOGIN \"djc\" \"domain\\\\password\"".to_vec()]
        );
    }

    #[test]
    fn login_with_awkward_password_uses_a_literal() {
        let cmd = CommandBuilder::login("djc", "pass\r\nword");
        assert_eq!(
            cmd.parts,
            vec![
                b"LOGIN \"djc\" {10}".to_vec(),
                b"pass\r\nword".to_vec(),
            ]
        );
    }

    #[test]
    fn select_encodes_mailbox_names() {
        assert_eq!(
            CommandBuilder::select("Entw\u{fc}rfe").parts,
            vec![b"SELECT \"Entw&APw-rfe\"".to_vec()]
        );
    }

    #[test]
    fn fetch() {
        let cmd = CommandBuilder::fetch()
            .range(1, 10)
            .attr(Attribute::Uid)
            .attr(Attribute::Envelope)
            .section("HEADER")
            .build();
        assert_eq!(
            cmd.parts,
            vec![b"FETCH 1:10 (UID ENVELOPE BODY[HEADER])".to_vec()]
        );
    }

    #[test]
    fn store() {
        let cmd = CommandBuilder::store("2:4", StoreOperation::Add, true, &["\\Deleted"]);
        assert_eq!(
            cmd.parts,
            vec![br"STORE 2:4 +FLAGS.SILENT (\Deleted)".to_vec()]
        );
    }

    #[test]
    fn status() {
        let cmd = CommandBuilder::status("blurdybloop", &[StatusItem::UidNext, StatusItem::Messages]);
        assert_eq!(
            cmd.parts,
            vec![b"STATUS \"blurdybloop\" (UIDNEXT MESSAGES)".to_vec()]
        );
    }
}
