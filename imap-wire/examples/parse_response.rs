use std::io::Write;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use imap_wire::{parse_unit, Framer};

fn main() -> std::io::Result<()> {
    let mut framer = Framer::default();
    let mut buf = BytesMut::new();
    loop {
        let line = {
            print!("Enter IMAP4REV1 response: ");
            std::io::stdout().flush().unwrap();

            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            line
        };

        buf.extend_from_slice(line.replace('\n', "\r\n").as_bytes());
        loop {
            match framer.decode(&mut buf) {
                Ok(Some(unit)) => match parse_unit(&unit) {
                    Ok(response) => println!("{response:#?}"),
                    Err(err) => {
                        println!("Error parsing the response: {err}. Exiting.");
                        return Ok(());
                    }
                },
                // waiting for more input, e.g. the payload of a literal
                Ok(None) => break,
                Err(err) => {
                    println!("Framing error: {err}. Exiting.");
                    return Ok(());
                }
            }
        }
    }
}
