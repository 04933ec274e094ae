use std::borrow::Cow;

use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case, take_while1},
    combinator::{map, map_res, opt},
    multi::many0,
    sequence::{delimited, preceded, terminated, tuple},
};

use super::core::*;
use super::fetch::msg_att_list;
use super::{Literals, WResult};
use crate::types::*;

fn is_tag_char(c: u8) -> bool {
    c != b'+' && is_astring_char(c)
}

fn status_ok(i: &[u8]) -> WResult<'_, Status> {
    map(tag_no_case("OK"), |_s| Status::Ok)(i)
}
fn status_no(i: &[u8]) -> WResult<'_, Status> {
    map(tag_no_case("NO"), |_s| Status::No)(i)
}
fn status_bad(i: &[u8]) -> WResult<'_, Status> {
    map(tag_no_case("BAD"), |_s| Status::Bad)(i)
}
fn status_preauth(i: &[u8]) -> WResult<'_, Status> {
    map(tag_no_case("PREAUTH"), |_s| Status::PreAuth)(i)
}
fn status_bye(i: &[u8]) -> WResult<'_, Status> {
    map(tag_no_case("BYE"), |_s| Status::Bye)(i)
}

fn status(i: &[u8]) -> WResult<'_, Status> {
    alt((status_ok, status_no, status_bad, status_preauth, status_bye))(i)
}

fn mailbox<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Cow<'a, str>> {
    map(
        |i| astring_text(i, lits),
        |s| {
            if s.eq_ignore_ascii_case("INBOX") {
                Cow::Borrowed("INBOX")
            } else {
                s
            }
        },
    )(i)
}

fn resp_text_code_alert(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(tag_no_case(b"ALERT"), |_| ResponseCode::Alert)(i)
}

fn resp_text_code_badcharset<'a>(
    i: &'a [u8],
    lits: Literals<'a>,
) -> WResult<'a, ResponseCode<'a>> {
    map(
        preceded(
            tag_no_case(b"BADCHARSET"),
            opt(preceded(
                tag(b" "),
                parenthesized_nonempty_list(|i| astring_text(i, lits)),
            )),
        ),
        ResponseCode::BadCharset,
    )(i)
}

fn resp_text_code_capability(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(capability_data, ResponseCode::Capabilities)(i)
}

fn resp_text_code_parse(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(tag_no_case(b"PARSE"), |_| ResponseCode::Parse)(i)
}

fn resp_text_code_permanent_flags(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(
        preceded(
            tag_no_case(b"PERMANENTFLAGS "),
            parenthesized_list(map(flag_perm, Cow::Borrowed)),
        ),
        ResponseCode::PermanentFlags,
    )(i)
}

fn resp_text_code_read_only(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(tag_no_case(b"READ-ONLY"), |_| ResponseCode::ReadOnly)(i)
}

fn resp_text_code_read_write(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(tag_no_case(b"READ-WRITE"), |_| ResponseCode::ReadWrite)(i)
}

fn resp_text_code_try_create(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(tag_no_case(b"TRYCREATE"), |_| ResponseCode::TryCreate)(i)
}

fn resp_text_code_uid_validity(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(
        preceded(tag_no_case(b"UIDVALIDITY "), number),
        ResponseCode::UidValidity,
    )(i)
}

fn resp_text_code_uid_next(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(
        preceded(tag_no_case(b"UIDNEXT "), number),
        ResponseCode::UidNext,
    )(i)
}

fn resp_text_code_unseen(i: &[u8]) -> WResult<'_, ResponseCode<'_>> {
    map(
        preceded(tag_no_case(b"UNSEEN "), number),
        ResponseCode::Unseen,
    )(i)
}

fn resp_text_code<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, ResponseCode<'a>> {
    // Per the RFC, the closing tag should be "] ".
    // See `resp_text` for more on why this is done differently.
    delimited(
        tag(b"["),
        alt((
            resp_text_code_alert,
            |i| resp_text_code_badcharset(i, lits),
            resp_text_code_capability,
            resp_text_code_parse,
            resp_text_code_permanent_flags,
            resp_text_code_uid_validity,
            resp_text_code_uid_next,
            resp_text_code_unseen,
            resp_text_code_read_only,
            resp_text_code_read_write,
            resp_text_code_try_create,
        )),
        tag(b"]"),
    )(i)
}

fn capability(i: &[u8]) -> WResult<'_, Capability<'_>> {
    alt((
        map(tag_no_case(b"IMAP4rev1"), |_| Capability::Imap4rev1),
        map(preceded(tag_no_case(b"AUTH="), atom), |mech| {
            Capability::Auth(Cow::Borrowed(mech))
        }),
        map(atom, |a| Capability::Atom(Cow::Borrowed(a))),
    ))(i)
}

// Whether the set contains IMAP4rev1 is checked where the capability table
// is assembled, so that the session can fail with a precise error instead of
// a parse failure.
fn capability_data(i: &[u8]) -> WResult<'_, Vec<Capability<'_>>> {
    preceded(
        tag_no_case(b"CAPABILITY"),
        many0(preceded(tag(" "), capability)),
    )(i)
}

fn mailbox_data_search(i: &[u8]) -> WResult<'_, MailboxDatum<'_>> {
    map(
        // Technically, trailing whitespace is not allowed here, but multiple
        // email servers in the wild send it anyway.
        terminated(
            preceded(tag_no_case(b"SEARCH"), many0(preceded(tag(" "), number))),
            opt(tag(" ")),
        ),
        MailboxDatum::Search,
    )(i)
}

fn mailbox_data_flags(i: &[u8]) -> WResult<'_, MailboxDatum<'_>> {
    map(
        preceded(tag_no_case("FLAGS "), flag_list),
        MailboxDatum::Flags,
    )(i)
}

fn mailbox_data_exists(i: &[u8]) -> WResult<'_, MailboxDatum<'_>> {
    map(
        terminated(number, tag_no_case(" EXISTS")),
        MailboxDatum::Exists,
    )(i)
}

fn mailbox_data_recent(i: &[u8]) -> WResult<'_, MailboxDatum<'_>> {
    map(
        terminated(number, tag_no_case(" RECENT")),
        MailboxDatum::Recent,
    )(i)
}

type MailboxList<'a> = (Vec<Cow<'a, str>>, Option<Cow<'a, str>>, Cow<'a, str>);

fn mailbox_list<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, MailboxList<'a>> {
    map(
        tuple((
            flag_list,
            tag(b" "),
            alt((map(quoted_text, Some), map(nil, |_| None))),
            tag(b" "),
            |i| mailbox(i, lits),
        )),
        |(flags, _, delimiter, _, name)| (flags, delimiter, name),
    )(i)
}

fn mailbox_data_list<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, MailboxDatum<'a>> {
    map(
        preceded(tag_no_case("LIST "), |i| mailbox_list(i, lits)),
        |(flags, delimiter, name)| MailboxDatum::List {
            flags,
            delimiter,
            name,
        },
    )(i)
}

fn mailbox_data_lsub<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, MailboxDatum<'a>> {
    map(
        preceded(tag_no_case("LSUB "), |i| mailbox_list(i, lits)),
        |(flags, delimiter, name)| MailboxDatum::Lsub {
            flags,
            delimiter,
            name,
        },
    )(i)
}

// Unlike `status-att` in the RFC syntax, this includes the value, so that it
// can return a self-contained enum value instead of just a key.
fn status_att(i: &[u8]) -> WResult<'_, StatusAttribute> {
    alt((
        map(
            preceded(tag_no_case("MESSAGES "), number),
            StatusAttribute::Messages,
        ),
        map(
            preceded(tag_no_case("RECENT "), number),
            StatusAttribute::Recent,
        ),
        map(
            preceded(tag_no_case("UIDNEXT "), number),
            StatusAttribute::UidNext,
        ),
        map(
            preceded(tag_no_case("UIDVALIDITY "), number),
            StatusAttribute::UidValidity,
        ),
        map(
            preceded(tag_no_case("UNSEEN "), number),
            StatusAttribute::Unseen,
        ),
    ))(i)
}

fn status_att_list(i: &[u8]) -> WResult<'_, Vec<StatusAttribute>> {
    parenthesized_nonempty_list(status_att)(i)
}

fn mailbox_data_status<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, MailboxDatum<'a>> {
    map(
        tuple((
            tag_no_case("STATUS "),
            |i| mailbox(i, lits),
            tag(" "),
            status_att_list,
        )),
        |(_, mailbox, _, status)| MailboxDatum::Status { mailbox, status },
    )(i)
}

fn mailbox_data<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, MailboxDatum<'a>> {
    alt((
        mailbox_data_flags,
        mailbox_data_exists,
        |i| mailbox_data_list(i, lits),
        |i| mailbox_data_lsub(i, lits),
        |i| mailbox_data_status(i, lits),
        mailbox_data_recent,
        mailbox_data_search,
    ))(i)
}

// message-data    = nz-number SP ("EXPUNGE" / ("FETCH" SP msg-att))
fn message_data_fetch<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Response<'a>> {
    map(
        tuple((number, sp, tag_no_case("FETCH"), sp, |i| {
            msg_att_list(i, lits)
        })),
        |(num, _, _, _, attrs)| Response::Fetch(num, attrs),
    )(i)
}

fn message_data_expunge(i: &[u8]) -> WResult<'_, u32> {
    terminated(number, tag_no_case(" EXPUNGE"))(i)
}

// tag             = 1*<any ASTRING-CHAR except "+">
fn imap_tag(i: &[u8]) -> WResult<'_, RequestId> {
    map(
        map_res(take_while1(is_tag_char), std::str::from_utf8),
        |s| RequestId(s.to_string()),
    )(i)
}

// This is not quite according to the RFC, which mandates the following:
//     ["[" resp-text-code "]" SP] text
// However, examples in RFC 4551 (Conditional STORE) counteract this by giving
// examples of `resp-text` that do not include the trailing space and text.
type RespText<'a> = (Option<ResponseCode<'a>>, Option<Cow<'a, str>>);

fn resp_text<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, RespText<'a>> {
    map(
        tuple((opt(|i| resp_text_code(i, lits)), text)),
        |(code, text)| {
            let information = if text.is_empty() {
                None
            } else if code.is_some() {
                Some(Cow::Borrowed(text.strip_prefix(' ').unwrap_or(text)))
            } else {
                Some(Cow::Borrowed(text))
            };
            (code, information)
        },
    )(i)
}

// continue-req    = "+" SP (resp-text / base64) CRLF
pub(crate) fn continue_req<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Response<'a>> {
    // Some servers do not send the space
    map(
        tuple((tag("+"), opt(tag(" ")), |i| resp_text(i, lits), tag("\r\n"))),
        |(_, _, text, _)| Response::Continue {
            code: text.0,
            information: text.1,
        },
    )(i)
}

// response-tagged = tag SP resp-cond-state CRLF
//
// resp-cond-state = ("OK" / "NO" / "BAD") SP resp-text
//                     ; Status condition
pub(crate) fn response_tagged<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Response<'a>> {
    map(
        tuple((
            imap_tag,
            tag(b" "),
            status,
            tag(b" "),
            |i| resp_text(i, lits),
            tag(b"\r\n"),
        )),
        |(tag, _, status, _, text, _)| Response::Done {
            tag,
            status,
            code: text.0,
            information: text.1,
        },
    )(i)
}

// resp-cond-auth  = ("OK" / "PREAUTH") SP resp-text
// resp-cond-bye   = "BYE" SP resp-text
// resp-cond-state = ("OK" / "NO" / "BAD") SP resp-text
fn resp_cond<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Response<'a>> {
    map(
        tuple((status, tag(b" "), |i| resp_text(i, lits))),
        |(status, _, text)| Response::Data {
            status,
            code: text.0,
            information: text.1,
        },
    )(i)
}

// response-data   = "*" SP (resp-cond-state / resp-cond-bye /
//                   mailbox-data / message-data / capability-data) CRLF
pub(crate) fn response_data<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Response<'a>> {
    delimited(
        tag(b"* "),
        alt((
            |i| resp_cond(i, lits),
            map(|i| mailbox_data(i, lits), Response::MailboxData),
            map(message_data_expunge, Response::Expunge),
            |i| message_data_fetch(i, lits),
            map(capability_data, Response::Capabilities),
        )),
        tag(b"\r\n"),
    )(i)
}

pub(crate) fn response<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Response<'a>> {
    alt((
        |i| continue_req(i, lits),
        |i| response_data(i, lits),
        |i| response_tagged(i, lits),
    ))(i)
}
