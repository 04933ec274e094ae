use std::borrow::Cow;

use nom::{
    branch::alt,
    bytes::streaming::tag,
    character::streaming::char,
    combinator::{map, opt},
    multi::{many1, separated_list1},
    sequence::{terminated, tuple},
};

use super::bodystructure::body;
use super::core::*;
use super::section::section_key;
use super::{Literals, WResult, WireError, WireErrorKind};
use crate::types::*;

// An address structure is a parenthesized list that describes an
// electronic mail address.
fn address<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Address<'a>> {
    paren_delimited(map(
        tuple((
            |i| nstring_bytes(i, lits),
            tag(" "),
            |i| nstring_bytes(i, lits),
            tag(" "),
            |i| nstring_bytes(i, lits),
            tag(" "),
            |i| nstring_bytes(i, lits),
        )),
        |(name, _, adl, _, mailbox, _, host)| Address {
            name,
            adl,
            mailbox,
            host,
        },
    ))(i)
}

// Some servers omit the space between address groups.
fn opt_addresses<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Option<Vec<Address<'a>>>> {
    alt((
        map(nil, |_s| None),
        map(
            paren_delimited(many1(terminated(|i| address(i, lits), opt(char(' '))))),
            Some,
        ),
    ))(i)
}

// envelope        = "(" env-date SP env-subject SP env-from SP
//                   env-sender SP env-reply-to SP env-to SP env-cc SP
//                   env-bcc SP env-in-reply-to SP env-message-id ")"
//
// env-date, env-subject, env-in-reply-to and env-message-id are nstrings;
// the six address slots are each "(" 1*address ")" / nil.
pub(crate) fn envelope<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Envelope<'a>> {
    paren_delimited(map(
        tuple((
            |i| nstring_bytes(i, lits),
            tag(" "),
            |i| nstring_bytes(i, lits),
            tag(" "),
            |i| opt_addresses(i, lits),
            tag(" "),
            |i| opt_addresses(i, lits),
            tag(" "),
            |i| opt_addresses(i, lits),
            tag(" "),
            |i| opt_addresses(i, lits),
            tag(" "),
            |i| opt_addresses(i, lits),
            tag(" "),
            |i| opt_addresses(i, lits),
            tag(" "),
            |i| nstring_bytes(i, lits),
            tag(" "),
            |i| nstring_bytes(i, lits),
        )),
        |(
            date,
            _,
            subject,
            _,
            from,
            _,
            sender,
            _,
            reply_to,
            _,
            to,
            _,
            cc,
            _,
            bcc,
            _,
            in_reply_to,
            _,
            message_id,
        )| Envelope {
            date,
            subject,
            from,
            sender,
            reply_to,
            to,
            cc,
            bcc,
            in_reply_to,
            message_id,
        },
    ))(i)
}

// msg-att         = "(" (msg-att-dynamic / msg-att-static)
//                    *(SP (msg-att-dynamic / msg-att-static)) ")"
//
// The item key is lexed first (the `BODY[...]<origin>` form specially, any
// other key as an atom), then dispatched through the keyword table below.
// Key comparison is case-insensitive; an unknown key poisons the whole FETCH
// response with its name.
pub(crate) fn msg_att<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, AttributeValue<'a>> {
    match section_key(i, lits) {
        Ok((rest, (raw, section, index))) => {
            let (rest, _) = sp(rest)?;
            let (rest, data) = nstring(rest, lits)?;
            Ok((
                rest,
                AttributeValue::BodySection {
                    key: Cow::Borrowed(raw),
                    section,
                    index,
                    data,
                },
            ))
        }
        Err(nom::Err::Incomplete(needed)) => Err(nom::Err::Incomplete(needed)),
        Err(nom::Err::Failure(e)) => Err(nom::Err::Failure(e)),
        Err(nom::Err::Error(_)) => msg_att_keyword(i, lits),
    }
}

fn msg_att_keyword<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, AttributeValue<'a>> {
    let (rest, key) = atom(i)?;
    let (rest, _) = sp(rest)?;
    match key.to_ascii_uppercase().as_str() {
        "FLAGS" => map(flag_list, AttributeValue::Flags)(rest),
        "INTERNALDATE" => map(|i| string_text(i, lits), AttributeValue::InternalDate)(rest),
        "RFC822.SIZE" => map(number_64, AttributeValue::Rfc822Size)(rest),
        "UID" => map(number_64, AttributeValue::Uid)(rest),
        "ENVELOPE" => map(
            |i| envelope(i, lits),
            |envelope| AttributeValue::Envelope(Box::new(envelope)),
        )(rest),
        "BODY" | "BODYSTRUCTURE" => map(|i| body(i, lits), AttributeValue::BodyStructure)(rest),
        unknown => Err(nom::Err::Failure(WireError::new(
            i,
            WireErrorKind::UnknownFetchItem(unknown.to_owned()),
        ))),
    }
}

pub(crate) fn msg_att_list<'a>(
    i: &'a [u8],
    lits: Literals<'a>,
) -> WResult<'a, Vec<AttributeValue<'a>>> {
    paren_delimited(separated_list1(sp, |i| msg_att(i, lits)))(i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::LiteralPayload;
    use bytes::Bytes;

    const NO_LITERALS: Literals<'static> = &[];

    #[test]
    fn test_envelope() {
        let env = br#"("Wed, 17 Jul 1996 02:23:25 -0700 (PDT)" "IMAP4rev1 WG mtg summary and minutes" (("Terry Gray" NIL "gray" "cac.washington.edu")) (("Terry Gray" NIL "gray" "cac.washington.edu")) (("Terry Gray" NIL "gray" "cac.washington.edu")) ((NIL NIL "imap" "cac.washington.edu")) ((NIL NIL "minutes" "CNRI.Reston.VA.US") ("John Klensin" NIL "KLENSIN" "MIT.EDU")) NIL NIL "<B27397-0100000@cac.washington.edu>") "#;
        match envelope(env, NO_LITERALS) {
            Ok((_, envelope)) => {
                assert_eq!(
                    envelope.subject.as_deref(),
                    Some(&b"IMAP4rev1 WG mtg summary and minutes"[..])
                );
                assert_eq!(envelope.from.as_ref().map(Vec::len), Some(1));
                assert_eq!(envelope.cc.as_ref().map(Vec::len), Some(2));
                assert_eq!(envelope.bcc, None);
                assert_eq!(envelope.in_reply_to, None);
            }
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_opt_addresses_no_space() {
        let addr =
            br#"((NIL NIL "test" "example@example.com")(NIL NIL "test" "example@example.com"))"#;
        match opt_addresses(addr, NO_LITERALS) {
            Ok((_, Some(addresses))) => assert_eq!(addresses.len(), 2),
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_addresses() {
        match address(b"(\"John Klensin\" NIL \"KLENSIN\" \"MIT.EDU\") ", NO_LITERALS) {
            Ok((_, _address)) => {}
            rsp => panic!("unexpected response {:?}", rsp),
        }

        // Literal non-UTF8 display name, captured by the framer
        let lits = vec![LiteralPayload::Inline(Bytes::from_static(
            b"Joh\xff Klensin",
        ))];
        match address(b"({B0} NIL \"KLENSIN\" \"MIT.EDU\") ", &lits) {
            Ok((_, address)) => {
                assert_eq!(address.name.as_deref(), Some(&b"Joh\xff Klensin"[..]));
            }
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_unknown_fetch_item_is_named() {
        match msg_att_list(b"(X-WEIRD 42)\r\n", NO_LITERALS) {
            Err(nom::Err::Failure(e)) => {
                assert_eq!(e.kind, WireErrorKind::UnknownFetchItem("X-WEIRD".into()));
            }
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_duplicate_keys_parse_as_two_items() {
        // Duplicate detection happens when the item tree is assembled; the
        // grammar itself delivers both.
        match msg_att_list(b"(UID 1 UID 2)\r\n", NO_LITERALS) {
            Ok((_, attrs)) => assert_eq!(attrs.len(), 2),
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }
}
