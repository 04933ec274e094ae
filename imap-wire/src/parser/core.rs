use std::borrow::Cow;
use std::str;

use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case, take_while, take_while1},
    character::streaming::{char, digit1},
    combinator::{map, map_res, recognize},
    error::ErrorKind,
    multi::{separated_list0, separated_list1},
    sequence::{delimited, pair},
    Needed,
};

use super::{Literals, WResult, WireError, WireErrorKind};
use crate::framer::LiteralPayload;
use crate::types::Str;

// ----- number -----

// number          = 1*DIGIT
//                    ; Unsigned 32-bit integer
//                    ; (0 <= n < 4,294,967,296)
pub fn number(i: &[u8]) -> WResult<'_, u32> {
    map_res(digit1, |digits: &[u8]| {
        str::from_utf8(digits)
            .map_err(|_| WireErrorKind::Utf8)?
            .parse::<u32>()
            .map_err(|_| WireErrorKind::Overflow)
    })(i)
}

// same as `number`, but for the 64-bit fields (sizes, UIDs); anything past
// 2^63-1 is rejected as overflow
pub fn number_64(i: &[u8]) -> WResult<'_, u64> {
    map_res(digit1, |digits: &[u8]| {
        let n = str::from_utf8(digits)
            .map_err(|_| WireErrorKind::Utf8)?
            .parse::<u64>()
            .map_err(|_| WireErrorKind::Overflow)?;
        if n > i64::MAX as u64 {
            return Err(WireErrorKind::Overflow);
        }
        Ok(n)
    })(i)
}

// ----- whitespace -----

// A single SP separates items; runs of spaces are tolerated (DavMail pads
// some FETCH items with an extra one).
pub fn sp(i: &[u8]) -> WResult<'_, &[u8]> {
    take_while1(|c| c == b' ')(i)
}

// ----- string -----

// quoted = DQUOTE *QUOTED-CHAR DQUOTE
//
// The returned bytes have the `\"` and `\\` escapes removed; input without
// escapes is passed through borrowed.
pub fn quoted(i: &[u8]) -> WResult<'_, Cow<'_, [u8]>> {
    delimited(char('"'), quoted_data, char('"'))(i)
}

pub fn quoted_text(i: &[u8]) -> WResult<'_, Cow<'_, str>> {
    map_res(quoted, cow_utf8)(i)
}

fn quoted_data(i: &[u8]) -> WResult<'_, Cow<'_, [u8]>> {
    let mut escaped = false;
    let mut has_escape = false;
    let mut end = None;
    for (idx, &c) in i.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            b'\\' => {
                escaped = true;
                has_escape = true;
            }
            b'"' => {
                end = Some(idx);
                break;
            }
            // TEXT-CHAR excludes CR and LF; reaching the terminator means
            // the closing quote never came
            b'\r' | b'\n' => {
                return Err(nom::Err::Error(WireError::new(
                    i,
                    WireErrorKind::Nom(ErrorKind::Char),
                )))
            }
            _ => {}
        }
    }
    let end = match end {
        Some(end) => end,
        None => return Err(nom::Err::Incomplete(Needed::Unknown)),
    };
    let raw = &i[..end];
    let value = if has_escape {
        let mut unescaped = Vec::with_capacity(raw.len());
        let mut escape = false;
        for &c in raw {
            if !escape && c == b'\\' {
                escape = true;
            } else {
                unescaped.push(c);
                escape = false;
            }
        }
        Cow::Owned(unescaped)
    } else {
        Cow::Borrowed(raw)
    };
    Ok((&i[end..], value))
}

// literal-ref = "{B" number "}"
//
// The framer replaces each wire literal `{N}` with this placeholder; the
// index resolves against the unit's literal table.
pub fn literal_ref(i: &[u8]) -> WResult<'_, usize> {
    delimited(
        tag("{B"),
        map_res(digit1, |digits: &[u8]| {
            str::from_utf8(digits)
                .map_err(|_| WireErrorKind::Utf8)?
                .parse::<usize>()
                .map_err(|_| WireErrorKind::Overflow)
        }),
        char('}'),
    )(i)
}

fn resolve(lits: Literals<'_>, index: usize) -> Result<Str<'_>, WireErrorKind> {
    match lits.get(index) {
        Some(LiteralPayload::Inline(data)) => Ok(Str::Text(Cow::Borrowed(data.as_ref()))),
        Some(LiteralPayload::Streamed(handle)) => Ok(Str::Stream(*handle)),
        None => Err(WireErrorKind::BadPlaceholder(index)),
    }
}

// string = quoted / literal
pub fn string<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Str<'a>> {
    alt((
        map(quoted, Str::Text),
        map_res(literal_ref, |index| resolve(lits, index)),
    ))(i)
}

// string, required inline (structural fields are bounded; a streamed literal
// here is a protocol error)
pub fn string_bytes<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Cow<'a, [u8]>> {
    map_res(|i| string(i, lits), |s| match s {
        Str::Text(data) => Ok(data),
        Str::Stream(_) => Err(WireErrorKind::StreamedNotAllowed),
        Str::Nil => Err(WireErrorKind::Nom(ErrorKind::Tag)),
    })(i)
}

pub fn string_text<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Cow<'a, str>> {
    map_res(|i| string_bytes(i, lits), cow_utf8)(i)
}

// ----- nstring ----- nil or string

// nil = "NIL"
pub fn nil(i: &[u8]) -> WResult<'_, &[u8]> {
    tag_no_case("NIL")(i)
}

// nstring = string / nil
pub fn nstring<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Str<'a>> {
    alt((map(nil, |_| Str::Nil), |i| string(i, lits)))(i)
}

pub fn nstring_bytes<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Option<Cow<'a, [u8]>>> {
    map_res(|i| nstring(i, lits), |s| match s {
        Str::Nil => Ok(None),
        Str::Text(data) => Ok(Some(data)),
        Str::Stream(_) => Err(WireErrorKind::StreamedNotAllowed),
    })(i)
}

pub fn nstring_text<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Option<Cow<'a, str>>> {
    map_res(
        |i| nstring_bytes(i, lits),
        |value| value.map(cow_utf8).transpose(),
    )(i)
}

// ----- astring ----- atom (roughly) or string

// astring = 1*ASTRING-CHAR / string
pub fn astring<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Cow<'a, [u8]>> {
    alt((
        map(take_while1(is_astring_char), Cow::Borrowed),
        |i| string_bytes(i, lits),
    ))(i)
}

pub fn astring_text<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Cow<'a, str>> {
    map_res(|i| astring(i, lits), cow_utf8)(i)
}

// ASTRING-CHAR = ATOM-CHAR / resp-specials
pub fn is_astring_char(c: u8) -> bool {
    is_atom_char(c) || is_resp_specials(c)
}

// ATOM-CHAR = <any CHAR except atom-specials>
pub fn is_atom_char(c: u8) -> bool {
    is_char(c) && !is_atom_specials(c)
}

// atom-specials = "(" / ")" / "{" / SP / CTL / list-wildcards / quoted-specials / resp-specials
pub fn is_atom_specials(c: u8) -> bool {
    c == b'('
        || c == b')'
        || c == b'{'
        || c == b' '
        || c < 32
        || is_list_wildcards(c)
        || is_quoted_specials(c)
        || is_resp_specials(c)
}

// quoted-specials = DQUOTE / "\"
pub fn is_quoted_specials(c: u8) -> bool {
    c == b'"' || c == b'\\'
}

// resp-specials = "]"
pub fn is_resp_specials(c: u8) -> bool {
    c == b']'
}

// list-wildcards = "%" / "*"
pub fn is_list_wildcards(c: u8) -> bool {
    c == b'%' || c == b'*'
}

// atom = 1*ATOM-CHAR
pub fn atom(i: &[u8]) -> WResult<'_, &str> {
    map_res(take_while1(is_atom_char), str::from_utf8)(i)
}

// ----- text -----

// text = 1*TEXT-CHAR
pub fn text(i: &[u8]) -> WResult<'_, &str> {
    map_res(take_while(is_text_char), str::from_utf8)(i)
}

// TEXT-CHAR = <any CHAR except CR and LF>
pub fn is_text_char(c: u8) -> bool {
    is_char(c) && c != b'\r' && c != b'\n'
}

// CHAR = %x01-7F
//          ; any 7-bit US-ASCII character,
//          ;  excluding NUL
// From RFC5234
pub fn is_char(c: u8) -> bool {
    matches!(c, 0x01..=0x7F)
}

// ----- flags -----

fn flag_extension(i: &[u8]) -> WResult<'_, &str> {
    map_res(
        recognize(pair(tag(b"\\"), take_while(is_atom_char))),
        str::from_utf8,
    )(i)
}

pub fn flag(i: &[u8]) -> WResult<'_, &str> {
    alt((flag_extension, atom))(i)
}

// "\*" is only valid inside PERMANENTFLAGS, but Zoho sends it in plain FLAGS
// lists as well, so it is accepted everywhere.
pub fn flag_perm(i: &[u8]) -> WResult<'_, &str> {
    alt((map_res(tag(b"\\*"), str::from_utf8), flag))(i)
}

pub fn flag_list(i: &[u8]) -> WResult<'_, Vec<Cow<'_, str>>> {
    parenthesized_list(map(flag_perm, Cow::Borrowed))(i)
}

// ----- parenthesized groups -----

pub fn paren_delimited<'a, O, F>(f: F) -> impl FnMut(&'a [u8]) -> WResult<'a, O>
where
    F: nom::Parser<&'a [u8], O, WireError<'a>>,
{
    delimited(char('('), f, char(')'))
}

pub fn parenthesized_list<'a, O, F>(f: F) -> impl FnMut(&'a [u8]) -> WResult<'a, Vec<O>>
where
    F: nom::Parser<&'a [u8], O, WireError<'a>>,
{
    paren_delimited(separated_list0(char(' '), f))
}

pub fn parenthesized_nonempty_list<'a, O, F>(f: F) -> impl FnMut(&'a [u8]) -> WResult<'a, Vec<O>>
where
    F: nom::Parser<&'a [u8], O, WireError<'a>>,
{
    paren_delimited(separated_list1(char(' '), f))
}

pub(crate) fn cow_utf8(c: Cow<'_, [u8]>) -> Result<Cow<'_, str>, WireErrorKind> {
    match c {
        Cow::Borrowed(bytes) => str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|_| WireErrorKind::Utf8),
        Cow::Owned(bytes) => String::from_utf8(bytes)
            .map(Cow::Owned)
            .map_err(|_| WireErrorKind::Utf8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::LiteralPayload;
    use bytes::Bytes;

    const NO_LITERALS: Literals<'static> = &[];

    #[test]
    fn test_quoted_unescapes() {
        match quoted(br#""a\"b\\c" "#) {
            Ok((_, value)) => assert_eq!(&value[..], br#"a"b\c"#),
            rsp => panic!("unexpected response {:?}", rsp),
        }
        match quoted(br#""plain" "#) {
            Ok((_, Cow::Borrowed(value))) => assert_eq!(value, b"plain"),
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_nil_vs_empty() {
        match nstring(b"NIL ", NO_LITERALS) {
            Ok((_, Str::Nil)) => {}
            rsp => panic!("unexpected response {:?}", rsp),
        }
        match nstring(br#""" "#, NO_LITERALS) {
            Ok((_, Str::Text(value))) => assert!(value.is_empty()),
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_string_resolves_placeholder() {
        let lits = vec![LiteralPayload::Inline(Bytes::from_static(b"12345"))];
        match string(b"{B0} ", &lits) {
            Ok((_, Str::Text(value))) => assert_eq!(&value[..], b"12345"),
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_dangling_placeholder_is_an_error() {
        match string(b"{B3} ", NO_LITERALS) {
            Err(nom::Err::Error(e)) => assert_eq!(e.kind, WireErrorKind::BadPlaceholder(3)),
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_number_overflow() {
        match number_64(b"9223372036854775808 ") {
            Err(nom::Err::Error(e)) => assert_eq!(e.kind, WireErrorKind::Overflow),
            rsp => panic!("unexpected response {:?}", rsp),
        }
        match number_64(b"9223372036854775807 ") {
            Ok((_, n)) => assert_eq!(n, i64::MAX as u64),
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_astring() {
        match astring(b"text ", NO_LITERALS) {
            Ok((_, value)) => assert_eq!(&value[..], b"text"),
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }
}
