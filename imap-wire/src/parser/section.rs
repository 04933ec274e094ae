use std::str;

use nom::{
    branch::alt,
    bytes::streaming::tag_no_case,
    character::streaming::char,
    combinator::{consumed, map, map_res, opt},
    multi::many0,
    sequence::{delimited, preceded, tuple},
};

use super::core::*;
use super::{Literals, WResult, WireErrorKind};
use crate::types::{MessageSection, SectionPath};

fn section_part(i: &[u8]) -> WResult<'_, Vec<u32>> {
    let (i, (part, mut rest)) = tuple((number, many0(preceded(char('.'), number))))(i)?;
    rest.insert(0, part);
    Ok((i, rest))
}

fn section_msgtext<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, MessageSection> {
    alt((
        map(
            tuple((
                tag_no_case("HEADER.FIELDS"),
                opt(tag_no_case(".NOT")),
                sp,
                parenthesized_list(|i| astring(i, lits)),
            )),
            |_| MessageSection::Header,
        ),
        map(tag_no_case("HEADER"), |_| MessageSection::Header),
        map(tag_no_case("TEXT"), |_| MessageSection::Text),
    ))(i)
}

fn section_text<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, MessageSection> {
    alt((
        |i| section_msgtext(i, lits),
        map(tag_no_case("MIME"), |_| MessageSection::Mime),
    ))(i)
}

fn section_spec<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, SectionPath> {
    alt((
        map(|i| section_msgtext(i, lits), SectionPath::Full),
        map(
            tuple((
                section_part,
                opt(preceded(char('.'), |i| section_text(i, lits))),
            )),
            |(part, text)| SectionPath::Part(part, text),
        ),
    ))(i)
}

// section = "[" [section-spec] "]"
fn section<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Option<SectionPath>> {
    delimited(char('['), opt(|i| section_spec(i, lits)), char(']'))(i)
}

/// Lex a `BODY[<section>]<origin>` fetch item key. The brackets are balanced
/// (a HEADER.FIELDS list may nest parentheses inside them) and the optional
/// `<origin>` partial marker is included. The raw key text is returned along
/// with the decoded pieces; it serves as the section-map key downstream.
pub fn section_key<'a>(
    i: &'a [u8],
    lits: Literals<'a>,
) -> WResult<'a, (&'a str, Option<SectionPath>, Option<u32>)> {
    map_res(
        consumed(tuple((
            tag_no_case("BODY"),
            |i| section(i, lits),
            opt(delimited(char('<'), number, char('>'))),
        ))),
        |(raw, (_, section, index))| {
            let raw = str::from_utf8(raw).map_err(|_| WireErrorKind::Utf8)?;
            Ok::<_, WireErrorKind>((raw, section, index))
        },
    )(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_LITERALS: Literals<'static> = &[];

    #[test]
    fn test_full_sections() {
        match section_key(b"BODY[HEADER] ", NO_LITERALS) {
            Ok((_, (raw, Some(SectionPath::Full(MessageSection::Header)), None))) => {
                assert_eq!(raw, "BODY[HEADER]");
            }
            rsp => panic!("unexpected response {:?}", rsp),
        }
        match section_key(b"BODY[] ", NO_LITERALS) {
            Ok((_, (raw, None, None))) => assert_eq!(raw, "BODY[]"),
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_part_section_with_origin() {
        match section_key(b"BODY[1.2.TEXT]<128> ", NO_LITERALS) {
            Ok((_, (raw, Some(SectionPath::Part(parts, Some(MessageSection::Text))), origin))) => {
                assert_eq!(raw, "BODY[1.2.TEXT]<128>");
                assert_eq!(parts, vec![1, 2]);
                assert_eq!(origin, Some(128));
            }
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }

    #[test]
    fn test_header_fields_keeps_balanced_brackets() {
        match section_key(b"BODY[HEADER.FIELDS (DATE SUBJECT)] ", NO_LITERALS) {
            Ok((_, (raw, Some(SectionPath::Full(MessageSection::Header)), None))) => {
                assert_eq!(raw, "BODY[HEADER.FIELDS (DATE SUBJECT)]");
            }
            rsp => panic!("unexpected response {:?}", rsp),
        }
    }
}
