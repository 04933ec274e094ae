//! Drives the engine against a canned server transcript, printing what the
//! engine would write and every event it reports. No sockets involved; the
//! transport edge is the `receive`/`take_outbound` pair.

use imap_engine::{Attribute, Credentials, Engine, EngineConfig};

const SCRIPT: &[&[u8]] = &[
    b"* OK IMAP4rev1 Service Ready\r\n",
    b"* CAPABILITY IMAP4rev1 IDLE AUTH=PLAIN\r\nA0001 OK done\r\n",
    b"A0002 OK user logged in\r\n",
    b"* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n\
      * 172 EXISTS\r\n\
      * 1 RECENT\r\n\
      * OK [UIDVALIDITY 3857529045] UIDs valid\r\n\
      A0003 OK [READ-WRITE] SELECT completed\r\n",
    b"* 12 FETCH (FLAGS (\\Seen) UID 4827 RFC822.SIZE 4286)\r\n\
      A0004 OK FETCH completed\r\n",
    b"* 12 FETCH (BODY[HEADER] {15}\r\nSubject: hi\r\n\r\n)\r\n\
      A0005 OK FETCH completed\r\n",
];

fn pump(engine: &mut Engine) {
    let outbound = engine.take_outbound();
    if !outbound.is_empty() {
        print!("C: {}", String::from_utf8_lossy(&outbound));
    }
    while let Some(event) = engine.poll_event() {
        println!("   {event:?}");
    }
}

fn main() {
    let mut engine = Engine::new(EngineConfig {
        credentials: Some(Credentials {
            username: "demo".to_string(),
            password: "demo".to_string(),
        }),
        ..EngineConfig::default()
    });

    engine.connected();
    let mut script = SCRIPT.iter();

    // greeting, capabilities, automatic login
    for _ in 0..3 {
        engine.receive(script.next().unwrap()).unwrap();
        pump(&mut engine);
    }

    engine.select("INBOX").unwrap();
    engine.receive(script.next().unwrap()).unwrap();
    pump(&mut engine);

    engine
        .fetch("12", &[Attribute::Flags, Attribute::Uid, Attribute::Rfc822Size])
        .unwrap();
    engine.receive(script.next().unwrap()).unwrap();
    pump(&mut engine);

    engine.fetch_section("12", "HEADER", true).unwrap();
    engine.receive(script.next().unwrap()).unwrap();
    pump(&mut engine);
}
