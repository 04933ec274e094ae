use std::borrow::Cow;

use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case},
    character::streaming::char,
    combinator::{map, opt},
    multi::many1,
    sequence::{delimited, preceded, tuple},
    Parser,
};

use super::core::*;
use super::fetch::envelope;
use super::{Literals, WResult, WireError};
use crate::types::*;

// Flattens an optional rule that itself yields an option, for the trailing
// extension fields that may be absent entirely or present as NIL.
fn opt_opt<'a, O, F>(f: F) -> impl FnMut(&'a [u8]) -> WResult<'a, Option<O>>
where
    F: Parser<&'a [u8], Option<O>, WireError<'a>>,
{
    map(opt(f), Option::flatten)
}

// body-fields     = body-fld-param SP body-fld-id SP body-fld-desc SP
//                   body-fld-enc SP body-fld-octets
fn body_fields<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyFields<'a>> {
    let (i, (param, _, id, _, description, _, transfer_encoding, _, octets)) = tuple((
        |i| body_param(i, lits),
        tag(" "),
        // body id refers to the Message-ID or Content-ID header, ASCII by
        // the grammar that produces it
        |i| nstring_text(i, lits),
        tag(" "),
        |i| nstring_text(i, lits),
        tag(" "),
        |i| body_encoding(i, lits),
        tag(" "),
        number,
    ))(i)?;
    Ok((
        i,
        BodyFields {
            param,
            id,
            description,
            transfer_encoding,
            octets,
        },
    ))
}

// body-ext-1part  = body-fld-md5 [SP body-fld-dsp [SP body-fld-lang
//                   [SP body-fld-loc *(SP body-extension)]]]
//                     ; MUST NOT be returned on non-extensible
//                     ; "BODY" fetch
fn body_ext_1part<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyExt1Part<'a>> {
    let (i, (md5, disposition, language, location, extension)) = tuple((
        opt_opt(preceded(tag(" "), |i| nstring_text(i, lits))),
        opt_opt(preceded(tag(" "), |i| body_disposition(i, lits))),
        opt_opt(preceded(tag(" "), |i| body_lang(i, lits))),
        opt_opt(preceded(tag(" "), |i| nstring_text(i, lits))),
        opt(preceded(tag(" "), |i| body_extension(i, lits))),
    ))(i)?;
    Ok((
        i,
        BodyExt1Part {
            md5,
            disposition,
            language,
            location,
            extension,
        },
    ))
}

// body-ext-mpart  = body-fld-param [SP body-fld-dsp [SP body-fld-lang
//                   [SP body-fld-loc *(SP body-extension)]]]
fn body_ext_mpart<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyExtMPart<'a>> {
    let (i, (param, disposition, language, location, extension)) = tuple((
        opt_opt(preceded(tag(" "), |i| body_param(i, lits))),
        opt_opt(preceded(tag(" "), |i| body_disposition(i, lits))),
        opt_opt(preceded(tag(" "), |i| body_lang(i, lits))),
        opt_opt(preceded(tag(" "), |i| nstring_text(i, lits))),
        opt(preceded(tag(" "), |i| body_extension(i, lits))),
    ))(i)?;
    Ok((
        i,
        BodyExtMPart {
            param,
            disposition,
            language,
            location,
            extension,
        },
    ))
}

fn body_encoding<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, ContentEncoding<'a>> {
    alt((
        delimited(
            char('"'),
            alt((
                map(tag_no_case("7BIT"), |_| ContentEncoding::SevenBit),
                map(tag_no_case("8BIT"), |_| ContentEncoding::EightBit),
                map(tag_no_case("BINARY"), |_| ContentEncoding::Binary),
                map(tag_no_case("BASE64"), |_| ContentEncoding::Base64),
                map(tag_no_case("QUOTED-PRINTABLE"), |_| {
                    ContentEncoding::QuotedPrintable
                }),
            )),
            char('"'),
        ),
        map(|i| string_text(i, lits), ContentEncoding::Other),
    ))(i)
}

fn body_lang<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, Option<Vec<Cow<'a, str>>>> {
    alt((
        map(|i| nstring_text(i, lits), |v| v.map(|s| vec![s])),
        map(
            parenthesized_nonempty_list(|i| string_text(i, lits)),
            Option::from,
        ),
    ))(i)
}

fn body_param<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyParams<'a>> {
    alt((
        map(nil, |_| None),
        map(
            parenthesized_nonempty_list(map(
                tuple((|i| string_text(i, lits), tag(" "), |i| string_text(i, lits))),
                |(key, _, val)| (key, val),
            )),
            Option::from,
        ),
    ))(i)
}

fn body_extension<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyExtension<'a>> {
    alt((
        map(number, BodyExtension::Num),
        map(|i| nstring_text(i, lits), BodyExtension::Str),
        map(
            parenthesized_nonempty_list(|i| body_extension(i, lits)),
            BodyExtension::List,
        ),
    ))(i)
}

fn body_disposition<'a>(
    i: &'a [u8],
    lits: Literals<'a>,
) -> WResult<'a, Option<ContentDisposition<'a>>> {
    alt((
        map(nil, |_| None),
        paren_delimited(map(
            tuple((|i| string_text(i, lits), tag(" "), |i| body_param(i, lits))),
            |(ty, _, params)| Some(ContentDisposition { ty, params }),
        )),
    ))(i)
}

fn body_type_basic<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyStructure<'a>> {
    map(
        tuple((
            |i| string_text(i, lits),
            tag(" "),
            |i| string_text(i, lits),
            tag(" "),
            |i| body_fields(i, lits),
            |i| body_ext_1part(i, lits),
        )),
        |(ty, _, subtype, _, fields, ext)| BodyStructure::Basic {
            common: BodyContentCommon {
                ty: ContentType {
                    ty,
                    subtype,
                    params: fields.param,
                },
                disposition: ext.disposition,
                language: ext.language,
                location: ext.location,
            },
            other: BodyContentSinglePart {
                id: fields.id,
                md5: ext.md5,
                octets: fields.octets,
                description: fields.description,
                transfer_encoding: fields.transfer_encoding,
            },
            extension: ext.extension,
        },
    )(i)
}

fn body_type_text<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyStructure<'a>> {
    map(
        tuple((
            tag_no_case("\"TEXT\""),
            tag(" "),
            |i| string_text(i, lits),
            tag(" "),
            |i| body_fields(i, lits),
            tag(" "),
            number,
            |i| body_ext_1part(i, lits),
        )),
        |(_, _, subtype, _, fields, _, lines, ext)| BodyStructure::Text {
            common: BodyContentCommon {
                ty: ContentType {
                    ty: Cow::Borrowed("TEXT"),
                    subtype,
                    params: fields.param,
                },
                disposition: ext.disposition,
                language: ext.language,
                location: ext.location,
            },
            other: BodyContentSinglePart {
                id: fields.id,
                md5: ext.md5,
                octets: fields.octets,
                description: fields.description,
                transfer_encoding: fields.transfer_encoding,
            },
            lines,
            extension: ext.extension,
        },
    )(i)
}

fn body_type_message<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyStructure<'a>> {
    map(
        tuple((
            tag_no_case("\"MESSAGE\" \"RFC822\""),
            tag(" "),
            |i| body_fields(i, lits),
            tag(" "),
            |i| envelope(i, lits),
            tag(" "),
            |i| body(i, lits),
            tag(" "),
            number,
            |i| body_ext_1part(i, lits),
        )),
        |(_, _, fields, _, envelope, _, body, _, lines, ext)| BodyStructure::Message {
            common: BodyContentCommon {
                ty: ContentType {
                    ty: Cow::Borrowed("MESSAGE"),
                    subtype: Cow::Borrowed("RFC822"),
                    params: fields.param,
                },
                disposition: ext.disposition,
                language: ext.language,
                location: ext.location,
            },
            other: BodyContentSinglePart {
                id: fields.id,
                md5: ext.md5,
                octets: fields.octets,
                description: fields.description,
                transfer_encoding: fields.transfer_encoding,
            },
            envelope,
            body: Box::new(body),
            lines,
            extension: ext.extension,
        },
    )(i)
}

fn body_type_multipart<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyStructure<'a>> {
    map(
        tuple((
            many1(|i| body(i, lits)),
            tag(" "),
            |i| string_text(i, lits),
            |i| body_ext_mpart(i, lits),
        )),
        |(bodies, _, subtype, ext)| BodyStructure::Multipart {
            common: BodyContentCommon {
                ty: ContentType {
                    ty: Cow::Borrowed("MULTIPART"),
                    subtype,
                    params: ext.param,
                },
                disposition: ext.disposition,
                language: ext.language,
                location: ext.location,
            },
            bodies,
            extension: ext.extension,
        },
    )(i)
}

// body = "(" (body-type-1part / body-type-mpart) ")"
//
// A second opening parenthesis right after the first means multipart.
pub(crate) fn body<'a>(i: &'a [u8], lits: Literals<'a>) -> WResult<'a, BodyStructure<'a>> {
    paren_delimited(alt((
        |i| body_type_text(i, lits),
        |i| body_type_message(i, lits),
        |i| body_type_basic(i, lits),
        |i| body_type_multipart(i, lits),
    )))(i)
}
