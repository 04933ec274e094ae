//! Mailbox name encoding per RFC 3501 section 5.1.3.
//!
//! Printable US-ASCII characters other than `&` represent themselves; `&` is
//! the two-octet sequence `&-`; everything else travels as `&`-shifted
//! modified BASE64 over UTF-16BE code units, closed by `-`.

use base64::engine::general_purpose::NO_PAD;
use base64::engine::GeneralPurpose;
use base64::Engine;

fn mutf7_engine() -> GeneralPurpose {
    GeneralPurpose::new(&base64::alphabet::IMAP_MUTF7, NO_PAD)
}

/// Decode a mailbox name from the wire. Returns `None` for input that is not
/// valid modified UTF-7 (unterminated shift, bad BASE64, lone surrogates).
pub fn decode_mailbox(input: &[u8]) -> Option<String> {
    let engine = mutf7_engine();
    let mut output = String::new();
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'&' => {
                let start = i;
                loop {
                    i += 1;
                    if i == input.len() {
                        return None;
                    }
                    if input[i] == b'-' {
                        break;
                    }
                }
                if start + 1 == i {
                    output.push('&');
                } else {
                    let raw = engine.decode(&input[start + 1..i]).ok()?;
                    if raw.len() % 2 != 0 {
                        return None;
                    }
                    let units: Vec<u16> = raw
                        .chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect();
                    for c in char::decode_utf16(units) {
                        output.push(c.ok()?);
                    }
                }
            }
            c @ 0x20..=0x25 | c @ 0x27..=0x7e => output.push(c as char),
            _ => return None,
        }
        i += 1;
    }
    Some(output)
}

/// Encode a mailbox name for the wire.
pub fn encode_mailbox(name: &str) -> String {
    let engine = mutf7_engine();
    let mut output = String::new();
    let mut pending: Vec<u8> = Vec::new();
    for c in name.chars() {
        match c {
            '&' => {
                flush_shifted(&engine, &mut pending, &mut output);
                output.push_str("&-");
            }
            '\x20'..='\x25' | '\x27'..='\x7e' => {
                flush_shifted(&engine, &mut pending, &mut output);
                output.push(c);
            }
            _ => {
                let mut units = [0u16; 2];
                for &unit in c.encode_utf16(&mut units).iter() {
                    pending.extend(unit.to_be_bytes());
                }
            }
        }
    }
    flush_shifted(&engine, &mut pending, &mut output);
    output
}

fn flush_shifted(engine: &GeneralPurpose, pending: &mut Vec<u8>, output: &mut String) {
    if pending.is_empty() {
        return;
    }
    output.push('&');
    output.push_str(&engine.encode(&pending));
    output.push('-');
    pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(decode_mailbox(b"").unwrap(), "");
        assert_eq!(decode_mailbox(b"&-").unwrap(), "&");
        assert_eq!(decode_mailbox(b"&Jjo-!").unwrap(), "\u{263a}!");
        // the example from RFC 3501 section 5.1.3
        assert_eq!(
            decode_mailbox(b"~peter/mail/&U,BTFw-/&ZeVnLIqe-").unwrap(),
            "~peter/mail/\u{53f0}\u{5317}/\u{65e5}\u{672c}\u{8a9e}"
        );
        // unterminated shift
        assert_eq!(decode_mailbox(b"&Jjo!"), None);
        // raw eight-bit octet
        assert_eq!(decode_mailbox(b"caf\xe9"), None);
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode_mailbox("INBOX"), "INBOX");
        assert_eq!(encode_mailbox("a&b"), "a&-b");
        assert_eq!(encode_mailbox("\u{53f0}\u{5317}"), "&U,BTFw-");
        assert_eq!(
            encode_mailbox("~peter/mail/\u{53f0}\u{5317}/\u{65e5}\u{672c}\u{8a9e}"),
            "~peter/mail/&U,BTFw-/&ZeVnLIqe-"
        );
    }

    #[test]
    fn test_roundtrip() {
        for name in ["INBOX", "Entw\u{fc}rfe", "a&b c", "\u{263a} mail"] {
            let encoded = encode_mailbox(name);
            assert_eq!(decode_mailbox(encoded.as_bytes()).unwrap(), name);
        }
    }
}
