use std::mem;
use std::str;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::types::{Request, StreamHandle};

/// Literals above this size are handed to the stream sink instead of being
/// buffered, unless the caller configured a different ceiling.
pub const DEFAULT_LITERAL_CEILING: usize = 64 * 1024;

/// A literal captured while framing one response unit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LiteralPayload {
    Inline(Bytes),
    Streamed(StreamHandle),
}

/// One logical server line. Embedded `{N}` literals have been replaced in the
/// text by `{B<k>}` placeholders; `literals[k]` holds the corresponding
/// payload. The text always ends with CRLF (bare LF input is normalized).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseUnit {
    pub text: Bytes,
    pub literals: Vec<LiteralPayload>,
}

impl ResponseUnit {
    /// A unit holding a single line with no literals. `line` is given without
    /// its terminator.
    pub fn from_line(line: &str) -> Self {
        Self::with_literals(line, Vec::new())
    }

    pub fn with_literals(line: &str, literals: Vec<LiteralPayload>) -> Self {
        let mut text = BytesMut::with_capacity(line.len() + 2);
        text.extend_from_slice(line.as_bytes());
        text.extend_from_slice(b"\r\n");
        ResponseUnit {
            text: text.freeze(),
            literals,
        }
    }

    pub fn inline(&self, index: usize) -> Option<&Bytes> {
        match self.literals.get(index) {
            Some(LiteralPayload::Inline(data)) => Some(data),
            _ => None,
        }
    }
}

/// Receives the payload of literals larger than the framer's ceiling. Chunks
/// arrive in wire order; `last` marks the final chunk of a literal.
pub trait LiteralSink {
    fn chunk(&mut self, handle: StreamHandle, data: &[u8], last: bool);
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{size} byte literal exceeds the {ceiling} byte ceiling and no stream sink is attached")]
    LiteralTooLarge { size: u64, ceiling: usize },
    #[error("malformed literal prefix")]
    BadLiteralSyntax,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

enum Dest {
    Inline(BytesMut),
    Streamed(StreamHandle),
}

enum Mode {
    Line,
    Literal { remaining: u64, dest: Dest },
}

/// Splits the inbound byte stream into [`ResponseUnit`]s.
///
/// In line mode the framer scans for the terminator; a line ending in `{N}`
/// does not complete the unit but switches to literal mode, in which the next
/// N bytes pass through uninterpreted (captured inline, or forwarded to the
/// sink when N exceeds the ceiling). The `{N}` marker itself is never
/// re-emitted. Feeding the same bytes in any partition yields the same units.
pub struct Framer {
    ceiling: usize,
    sink: Option<Box<dyn LiteralSink + Send>>,
    mode: Mode,
    text: BytesMut,
    literals: Vec<LiteralPayload>,
    // line-mode scan position, so repeated decode calls do not rescan
    scan: usize,
    next_stream: u32,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_LITERAL_CEILING)
    }
}

impl Framer {
    pub fn new(ceiling: usize) -> Self {
        Framer {
            ceiling,
            sink: None,
            mode: Mode::Line,
            text: BytesMut::new(),
            literals: Vec::new(),
            scan: 0,
            next_stream: 0,
        }
    }

    pub fn with_sink(ceiling: usize, sink: Box<dyn LiteralSink + Send>) -> Self {
        Framer {
            sink: Some(sink),
            ..Self::new(ceiling)
        }
    }

    fn advance(&mut self, src: &mut BytesMut) -> Result<Option<ResponseUnit>, FrameError> {
        loop {
            match mem::replace(&mut self.mode, Mode::Line) {
                Mode::Literal {
                    mut remaining,
                    mut dest,
                } => {
                    if remaining > 0 && src.is_empty() {
                        self.mode = Mode::Literal { remaining, dest };
                        return Ok(None);
                    }
                    let take = remaining.min(src.len() as u64) as usize;
                    let chunk = src.split_to(take);
                    remaining -= take as u64;
                    let last = remaining == 0;
                    match &mut dest {
                        Dest::Inline(acc) => acc.extend_from_slice(&chunk),
                        Dest::Streamed(handle) => {
                            let handle = *handle;
                            if let Some(sink) = self.sink.as_mut() {
                                sink.chunk(handle, &chunk, last);
                            }
                        }
                    }
                    if !last {
                        self.mode = Mode::Literal { remaining, dest };
                        return Ok(None);
                    }
                    self.literals.push(match dest {
                        Dest::Inline(acc) => LiteralPayload::Inline(acc.freeze()),
                        Dest::Streamed(handle) => LiteralPayload::Streamed(handle),
                    });
                }
                Mode::Line => {
                    let eol = match src[self.scan..].iter().position(|&b| b == b'\n') {
                        Some(offset) => self.scan + offset,
                        None => {
                            self.scan = src.len();
                            return Ok(None);
                        }
                    };
                    self.scan = 0;
                    let line = src.split_to(eol + 1);
                    let content = trim_eol(&line);
                    match literal_announcement(content)? {
                        Some((head, count)) => {
                            self.text.extend_from_slice(head);
                            let index = self.literals.len();
                            self.text
                                .extend_from_slice(format!("{{B{index}}}").as_bytes());
                            let dest = if count > self.ceiling as u64 {
                                if self.sink.is_none() {
                                    return Err(FrameError::LiteralTooLarge {
                                        size: count,
                                        ceiling: self.ceiling,
                                    });
                                }
                                let handle = StreamHandle {
                                    id: self.next_stream,
                                    len: count,
                                };
                                self.next_stream += 1;
                                Dest::Streamed(handle)
                            } else {
                                Dest::Inline(BytesMut::with_capacity(count as usize))
                            };
                            self.mode = Mode::Literal {
                                remaining: count,
                                dest,
                            };
                        }
                        None => {
                            self.text.extend_from_slice(content);
                            self.text.extend_from_slice(b"\r\n");
                            let text = mem::take(&mut self.text).freeze();
                            let literals = mem::take(&mut self.literals);
                            return Ok(Some(ResponseUnit { text, literals }));
                        }
                    }
                }
            }
        }
    }
}

// Tolerate bare LF on inbound; outbound is always CRLF.
fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// A literal announcement is `{digits}` immediately before the terminator
/// (RFC 3501 form). Anything else stays in the line text.
fn literal_announcement(content: &[u8]) -> Result<Option<(&[u8], u64)>, FrameError> {
    if !content.ends_with(b"}") {
        return Ok(None);
    }
    let open = match content.iter().rposition(|&b| b == b'{') {
        Some(open) => open,
        None => return Ok(None),
    };
    let digits = &content[open + 1..content.len() - 1];
    if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    let count = str::from_utf8(digits)
        .expect("digits are ASCII")
        .parse::<u64>()
        .map_err(|_| FrameError::BadLiteralSyntax)?;
    Ok(Some((&content[..open], count)))
}

impl Decoder for Framer {
    type Item = ResponseUnit;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ResponseUnit>, FrameError> {
        self.advance(src)
    }
}

impl<'a> Encoder<&'a Request<'a>> for Framer {
    type Error = FrameError;

    fn encode(&mut self, msg: &Request, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.put_slice(&msg.0);
        dst.put_u8(b' ');
        dst.put_slice(&msg.1);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn feed(framer: &mut Framer, input: &[u8]) -> Vec<ResponseUnit> {
        let mut buf = BytesMut::from(input);
        let mut units = Vec::new();
        while let Some(unit) = framer.advance(&mut buf).unwrap() {
            units.push(unit);
        }
        units
    }

    #[test]
    fn test_plain_line() {
        let mut framer = Framer::default();
        let units = feed(&mut framer, b"* OK ready\r\n");
        assert_eq!(units.len(), 1);
        assert_eq!(&units[0].text[..], b"* OK ready\r\n");
        assert!(units[0].literals.is_empty());
    }

    #[test]
    fn test_bare_lf_is_tolerated() {
        let mut framer = Framer::default();
        let units = feed(&mut framer, b"* OK ready\n");
        assert_eq!(&units[0].text[..], b"* OK ready\r\n");
    }

    #[test]
    fn test_literal_capture_is_exact() {
        // The payload contains every byte the grammar treats as special.
        let mut framer = Framer::default();
        let units = feed(&mut framer, b"* 1 FETCH (TEST {9}\r\n)\"\r\n{2}x)\r\n");
        assert_eq!(units.len(), 1);
        assert_eq!(&units[0].text[..], b"* 1 FETCH (TEST {B0})\r\n");
        assert_eq!(&units[0].inline(0).unwrap()[..], b")\"\r\n{2}x");
    }

    #[test]
    fn test_empty_literal() {
        let mut framer = Framer::default();
        let units = feed(&mut framer, b"* 1 FETCH (TEST {0}\r\n)\r\n");
        assert_eq!(&units[0].text[..], b"* 1 FETCH (TEST {B0})\r\n");
        assert_eq!(&units[0].inline(0).unwrap()[..], b"");
    }

    #[test]
    fn test_two_literals_keep_order() {
        let mut framer = Framer::default();
        let units = feed(&mut framer, b"* 1 FETCH (A {2}\r\naa B {2}\r\nbb)\r\n");
        assert_eq!(&units[0].text[..], b"* 1 FETCH (A {B0} B {B1})\r\n");
        assert_eq!(&units[0].inline(0).unwrap()[..], b"aa");
        assert_eq!(&units[0].inline(1).unwrap()[..], b"bb");
    }

    #[test]
    fn test_mid_line_braces_stay_in_text() {
        let mut framer = Framer::default();
        let units = feed(&mut framer, b"* OK {3} is not a literal here\r\n");
        assert_eq!(units.len(), 1);
        assert!(units[0].literals.is_empty());
    }

    #[test]
    fn test_framing_is_partition_independent() {
        let input: &[u8] = b"* 1 FETCH (UID 7 BODY[TEXT] {5}\r\nhi\r\n!)\r\n* 2 EXPUNGE\r\n";
        let mut whole = Framer::default();
        let expected = feed(&mut whole, input);
        assert_eq!(expected.len(), 2);

        for split in 1..input.len() {
            let mut framer = Framer::default();
            let mut units = feed(&mut framer, &input[..split]);
            units.extend(feed(&mut framer, &input[split..]));
            assert_eq!(units, expected, "split at {}", split);
        }
    }

    #[derive(Default)]
    struct RecordingSink(Arc<Mutex<Vec<(u32, Vec<u8>, bool)>>>);

    impl LiteralSink for RecordingSink {
        fn chunk(&mut self, handle: StreamHandle, data: &[u8], last: bool) {
            self.0.lock().unwrap().push((handle.id, data.to_vec(), last));
        }
    }

    #[test]
    fn test_oversized_literal_streams_to_sink() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let mut framer = Framer::with_sink(4, Box::new(RecordingSink(chunks.clone())));

        let mut buf = BytesMut::from(&b"* 1 FETCH (BODY[] {10}\r\nabc"[..]);
        assert!(framer.advance(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"defghij)\r\n");
        let unit = framer.advance(&mut buf).unwrap().unwrap();

        assert_eq!(&unit.text[..], b"* 1 FETCH (BODY[] {B0})\r\n");
        assert_eq!(
            unit.literals,
            vec![LiteralPayload::Streamed(StreamHandle { id: 0, len: 10 })]
        );
        let chunks = chunks.lock().unwrap();
        assert_eq!(
            *chunks,
            vec![
                (0, b"abc".to_vec(), false),
                (0, b"defghij".to_vec(), true),
            ]
        );
    }

    #[test]
    fn test_oversized_literal_without_sink_fails() {
        let mut framer = Framer::new(4);
        let mut buf = BytesMut::from(&b"* 1 FETCH (BODY[] {10}\r\n"[..]);
        match framer.advance(&mut buf) {
            Err(FrameError::LiteralTooLarge { size: 10, .. }) => {}
            rsp => panic!("unexpected result {:?}", rsp.map(|_| ())),
        }
    }
}
