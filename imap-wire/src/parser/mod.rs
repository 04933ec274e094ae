use std::num::ParseIntError;
use std::str::Utf8Error;

use nom::error::ErrorKind;

use crate::framer::{LiteralPayload, ResponseUnit};
use crate::types::Response;

pub mod core;

mod bodystructure;
mod fetch;
mod response;
mod section;

pub use self::section::section_key;

/// Literal table of the unit being parsed, threaded through every
/// string-consuming rule so `{B<k>}` placeholders can be resolved in place.
pub type Literals<'a> = &'a [LiteralPayload];

#[derive(Debug)]
pub struct WireError<'a> {
    pub input: &'a [u8],
    pub kind: WireErrorKind,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WireErrorKind {
    Nom(ErrorKind),
    UnknownFetchItem(String),
    BadPlaceholder(usize),
    StreamedNotAllowed,
    Overflow,
    Utf8,
}

impl<'a> WireError<'a> {
    pub(crate) fn new(input: &'a [u8], kind: WireErrorKind) -> Self {
        WireError { input, kind }
    }
}

impl<'a> nom::error::ParseError<&'a [u8]> for WireError<'a> {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        WireError::new(input, WireErrorKind::Nom(kind))
    }

    fn append(_input: &'a [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> nom::error::FromExternalError<&'a [u8], WireErrorKind> for WireError<'a> {
    fn from_external_error(input: &'a [u8], _kind: ErrorKind, e: WireErrorKind) -> Self {
        WireError::new(input, e)
    }
}

impl<'a> nom::error::FromExternalError<&'a [u8], ParseIntError> for WireError<'a> {
    fn from_external_error(input: &'a [u8], _kind: ErrorKind, _e: ParseIntError) -> Self {
        WireError::new(input, WireErrorKind::Overflow)
    }
}

impl<'a> nom::error::FromExternalError<&'a [u8], Utf8Error> for WireError<'a> {
    fn from_external_error(input: &'a [u8], _kind: ErrorKind, _e: Utf8Error) -> Self {
        WireError::new(input, WireErrorKind::Utf8)
    }
}

pub type WResult<'a, O> = nom::IResult<&'a [u8], O, WireError<'a>>;

/// How parsing a framed unit can fail. `UnknownFetchItem` poisons only the
/// FETCH response it appeared in; the other kinds mean wire framing is lost
/// and the connection has to come down.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("response unit is truncated")]
    Truncated,
    #[error("unknown fetch item {0}")]
    UnknownFetchItem(String),
    #[error("malformed response near {near:?}: {kind:?}")]
    Malformed { kind: WireErrorKind, near: String },
}

/// Parse one framed response unit into the typed response model.
pub fn parse_unit(unit: &ResponseUnit) -> Result<Response<'_>, ParseFailure> {
    match response::response(&unit.text, &unit.literals) {
        Ok((rest, rsp)) if rest.is_empty() => Ok(rsp),
        Ok((rest, _)) => Err(ParseFailure::Malformed {
            kind: WireErrorKind::Nom(ErrorKind::Eof),
            near: preview(rest),
        }),
        Err(nom::Err::Incomplete(_)) => Err(ParseFailure::Truncated),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => match e.kind {
            WireErrorKind::UnknownFetchItem(name) => Err(ParseFailure::UnknownFetchItem(name)),
            kind => Err(ParseFailure::Malformed {
                kind,
                near: preview(e.input),
            }),
        },
    }
}

fn preview(input: &[u8]) -> String {
    let window = &input[..input.len().min(32)];
    String::from_utf8_lossy(window).into_owned()
}
