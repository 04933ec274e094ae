use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use imap_engine::{
    Attribute, CommandPayload, Credentials, Engine, EngineConfig, Event,
    LiteralSink, Outcome, ProtocolError, SectionData, State, StreamHandle,
};

fn config_with_credentials() -> EngineConfig {
    EngineConfig {
        credentials: Some(Credentials {
            username: "user".to_string(),
            password: "secret".to_string(),
        }),
        ..EngineConfig::default()
    }
}

fn outbound(engine: &mut Engine) -> String {
    String::from_utf8(engine.take_outbound().to_vec()).unwrap()
}

fn events(engine: &mut Engine) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Some(event) = engine.poll_event() {
        collected.push(event);
    }
    collected
}

/// Drive a fresh engine through greeting, capabilities and auto-login.
fn authenticated_engine(config: EngineConfig) -> Engine {
    let mut engine = Engine::new(config);
    engine.connected();
    engine.receive(b"* OK ready\r\n").unwrap();
    assert_eq!(outbound(&mut engine), "A0001 CAPABILITY\r\n");
    engine
        .receive(b"* CAPABILITY IMAP4rev1 IDLE AUTH=PLAIN\r\nA0001 OK done\r\n")
        .unwrap();
    assert_eq!(outbound(&mut engine), "A0002 LOGIN \"user\" \"secret\"\r\n");
    engine.receive(b"A0002 OK welcome\r\n").unwrap();
    assert_eq!(engine.state(), State::Authenticated);
    events(&mut engine);
    engine
}

/// Continue into a freshly selected INBOX (172 exists, 1 recent).
fn selected_engine() -> Engine {
    let mut engine = authenticated_engine(config_with_credentials());
    engine.select("INBOX").unwrap();
    assert_eq!(outbound(&mut engine), "A0003 SELECT \"INBOX\"\r\n");
    engine
        .receive(
            b"* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n\
              * 172 EXISTS\r\n\
              * 1 RECENT\r\n\
              * OK [UNSEEN 12] Message 12 is first unseen\r\n\
              * OK [UIDVALIDITY 3857529045] UIDs valid\r\n\
              * OK [UIDNEXT 4392] Predicted next UID\r\n\
              * OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n\
              A0003 OK [READ-WRITE] SELECT completed\r\n",
        )
        .unwrap();
    assert_eq!(engine.state(), State::Selected);
    events(&mut engine);
    engine
}

#[test]
fn tag_correlation_resolves_capability() {
    let mut engine = Engine::new(EngineConfig::default());
    engine.connected();
    engine.receive(b"* OK ready\r\n").unwrap();
    assert_eq!(outbound(&mut engine), "A0001 CAPABILITY\r\n");

    engine
        .receive(b"* CAPABILITY IMAP4rev1 IDLE AUTH=PLAIN\r\nA0001 OK done\r\n")
        .unwrap();

    let events = events(&mut engine);
    let completed = events
        .iter()
        .find_map(|event| match event {
            Event::Completed { tag, outcome, .. } if tag == "A0001" => Some(outcome),
            _ => None,
        })
        .expect("capability completion");
    match completed {
        Outcome::Ok(CommandPayload::Capabilities(caps)) => {
            assert!(caps.is_imap4rev1());
            assert!(caps.has("IDLE"));
            assert_eq!(caps.auth_mechanisms(), ["PLAIN"]);
        }
        outcome => panic!("unexpected outcome {:?}", outcome),
    }
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(engine.state(), State::NotAuthenticated);
}

#[test]
fn greeting_capability_code_skips_the_round_trip() {
    let mut engine = Engine::new(EngineConfig::default());
    engine.connected();
    engine
        .receive(b"* OK [CAPABILITY IMAP4rev1] ready\r\n")
        .unwrap();
    assert_eq!(outbound(&mut engine), "");
    assert_eq!(engine.state(), State::NotAuthenticated);
}

#[test]
fn preauth_greeting_lands_in_authenticated() {
    let mut engine = Engine::new(EngineConfig::default());
    engine.connected();
    engine
        .receive(b"* PREAUTH [CAPABILITY IMAP4rev1] welcome\r\n")
        .unwrap();
    assert_eq!(engine.state(), State::Authenticated);
}

#[test]
fn missing_imap4rev1_fails_the_session() {
    let mut engine = Engine::new(EngineConfig::default());
    engine.connected();
    engine.receive(b"* OK ready\r\n").unwrap();
    engine
        .receive(b"* CAPABILITY IDLE\r\nA0001 OK done\r\n")
        .unwrap();
    assert_eq!(engine.state(), State::Logout);
    assert!(events(&mut engine)
        .iter()
        .any(|event| matches!(event, Event::ProtocolViolation { .. })));
}

#[test]
fn select_builds_the_mailbox_snapshot() {
    let engine = &mut authenticated_engine(config_with_credentials());
    engine.select("INBOX").unwrap();
    assert_eq!(outbound(engine), "A0003 SELECT \"INBOX\"\r\n");
    engine
        .receive(
            b"* FLAGS (\\Answered \\Seen)\r\n\
              * 172 EXISTS\r\n\
              * 1 RECENT\r\n\
              * OK [UNSEEN 12] first unseen\r\n\
              * OK [UIDVALIDITY 3857529045] UIDs valid\r\n\
              * OK [UIDNEXT 4392] next\r\n\
              A0003 OK [READ-WRITE] SELECT completed\r\n",
        )
        .unwrap();

    let selected = engine.selected().expect("mailbox selected");
    assert_eq!(selected.name, "INBOX");
    assert_eq!(selected.exists, 172);
    assert_eq!(selected.recent, 1);
    assert_eq!(selected.unseen, Some(12));
    assert_eq!(selected.uid_validity, Some(3857529045));
    assert_eq!(selected.uid_next, Some(4392));
    assert!(!selected.read_only);
    assert_eq!(selected.flags, ["\\Answered", "\\Seen"]);

    let completion = events(engine)
        .into_iter()
        .find_map(|event| match event {
            Event::Completed { tag, outcome, .. } if tag == "A0003" => Some(outcome),
            _ => None,
        })
        .expect("select completion");
    match completion {
        Outcome::Ok(CommandPayload::Mailbox(status)) => assert_eq!(status.exists, 172),
        outcome => panic!("unexpected outcome {:?}", outcome),
    }
}

#[test]
fn fetch_records_stream_as_events() {
    let mut engine = selected_engine();
    engine.fetch("1:2", &[Attribute::Flags, Attribute::Uid]).unwrap();
    assert_eq!(outbound(&mut engine), "A0004 FETCH 1:2 (FLAGS UID)\r\n");

    engine
        .receive(
            b"* 1 FETCH (FLAGS (\\Seen) UID 101)\r\n\
              * 2 FETCH (FLAGS () UID 102)\r\n\
              A0004 OK FETCH completed\r\n",
        )
        .unwrap();

    let fetched: Vec<_> = events(&mut engine)
        .into_iter()
        .filter_map(|event| match event {
            Event::Fetched(record) => Some(record),
            _ => None,
        })
        .collect();
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0].seq, 1);
    assert_eq!(fetched[0].flags.as_deref(), Some(&["\\Seen".to_string()][..]));
    assert_eq!(fetched[0].uid, Some(101));
    assert_eq!(fetched[1].flags.as_deref(), Some(&[][..]));
    assert_eq!(engine.pending_count(), 0);
}

#[test]
fn idle_interruption_preserves_order() {
    let mut engine = selected_engine();

    let idle_handle = engine.idle().unwrap();
    assert_eq!(outbound(&mut engine), "A0004 IDLE\r\n");
    engine.receive(b"+ idling\r\n").unwrap();
    assert!(engine.is_idle());
    assert!(events(&mut engine)
        .iter()
        .any(|event| matches!(event, Event::IdleEntered)));

    // unsolicited update while idling
    engine.receive(b"* 173 EXISTS\r\n").unwrap();
    assert!(events(&mut engine).iter().any(|event| matches!(
        event,
        Event::IdleUpdate { name, number: 173 } if name == "EXISTS"
    )));

    // a NOOP submitted during IDLE must wait for DONE / tagged OK
    let noop_handle = engine.noop().unwrap();
    assert_eq!(outbound(&mut engine), "DONE\r\n");
    assert_eq!(engine.pending_count(), 1);

    engine.receive(b"A0004 OK IDLE terminated\r\n").unwrap();
    assert_eq!(outbound(&mut engine), "A0005 NOOP\r\n");
    engine.receive(b"A0005 OK NOOP completed\r\n").unwrap();

    let completions: Vec<_> = events(&mut engine)
        .into_iter()
        .filter_map(|event| match event {
            Event::Completed { handle, outcome, .. } => Some((handle, outcome)),
            _ => None,
        })
        .collect();
    assert_eq!(completions.len(), 2);
    assert_eq!(completions[0].0, idle_handle);
    assert!(matches!(completions[0].1, Outcome::Ok(_)));
    assert_eq!(completions[1].0, noop_handle);
    assert!(matches!(completions[1].1, Outcome::Ok(_)));
    assert_eq!(engine.pending_count(), 0);
}

#[test]
fn commands_are_rejected_outside_their_states() {
    let mut engine = Engine::new(EngineConfig::default());
    match engine.noop() {
        Err(ProtocolError::UnexpectedState { .. }) => {}
        rsp => panic!("unexpected result {:?}", rsp.map(|_| ())),
    }

    engine.connected();
    engine
        .receive(b"* OK [CAPABILITY IMAP4rev1] ready\r\n")
        .unwrap();
    assert_eq!(engine.state(), State::NotAuthenticated);
    match engine.fetch("1", &[Attribute::Flags]) {
        Err(ProtocolError::UnexpectedState { .. }) => {}
        rsp => panic!("unexpected result {:?}", rsp.map(|_| ())),
    }
    match engine.select("INBOX") {
        Err(ProtocolError::UnexpectedState { .. }) => {}
        rsp => panic!("unexpected result {:?}", rsp.map(|_| ())),
    }
}

#[test]
fn timed_out_command_is_discarded_when_it_finally_answers() {
    let config = EngineConfig {
        command_deadline: Some(Duration::from_secs(5)),
        ..config_with_credentials()
    };
    let mut engine = authenticated_engine(config);
    engine.noop().unwrap();
    assert_eq!(outbound(&mut engine), "A0003 NOOP\r\n");

    engine.tick(Instant::now() + Duration::from_secs(6));
    let first = events(&mut engine);
    assert!(first
        .iter()
        .any(|event| matches!(event, Event::Completed { outcome: Outcome::TimedOut, .. })));

    // the tagged response still arrives and is consumed silently
    engine.receive(b"A0003 OK NOOP completed\r\n").unwrap();
    assert!(events(&mut engine).is_empty());
    assert_eq!(engine.pending_count(), 0);
}

#[test]
fn cancelled_command_detaches_its_completion() {
    let mut engine = authenticated_engine(config_with_credentials());
    let handle = engine.noop().unwrap();
    assert!(engine.cancel(handle));
    assert!(!engine.cancel(handle));
    assert!(events(&mut engine)
        .iter()
        .any(|event| matches!(event, Event::Completed { outcome: Outcome::Cancelled, .. })));

    engine.receive(b"A0003 OK NOOP completed\r\n").unwrap();
    assert!(events(&mut engine).is_empty());
    assert_eq!(engine.pending_count(), 0);
}

#[test]
fn awkward_password_travels_as_a_literal() {
    let config = EngineConfig {
        credentials: Some(Credentials {
            username: "user".to_string(),
            password: "pa\nss".to_string(),
        }),
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config);
    engine.connected();
    engine.receive(b"* OK ready\r\n").unwrap();
    assert_eq!(outbound(&mut engine), "A0001 CAPABILITY\r\n");
    engine
        .receive(b"* CAPABILITY IMAP4rev1\r\nA0001 OK done\r\n")
        .unwrap();
    assert_eq!(outbound(&mut engine), "A0002 LOGIN \"user\" {5}\r\n");

    engine.receive(b"+ go ahead\r\n").unwrap();
    assert_eq!(outbound(&mut engine), "pa\nss\r\n");
    engine.receive(b"A0002 OK welcome\r\n").unwrap();
    assert_eq!(engine.state(), State::Authenticated);
}

#[test]
fn starttls_upgrades_then_authenticates() {
    let config = EngineConfig {
        use_starttls: true,
        ..config_with_credentials()
    };
    let mut engine = Engine::new(config);
    engine.connected();
    engine.receive(b"* OK ready\r\n").unwrap();
    assert_eq!(outbound(&mut engine), "A0001 CAPABILITY\r\n");
    engine
        .receive(b"* CAPABILITY IMAP4rev1 STARTTLS AUTH=PLAIN\r\nA0001 OK done\r\n")
        .unwrap();
    assert_eq!(outbound(&mut engine), "A0002 STARTTLS\r\n");

    engine.receive(b"A0002 OK begin TLS\r\n").unwrap();
    assert!(events(&mut engine)
        .iter()
        .any(|event| matches!(event, Event::UpgradeTls)));
    // capabilities are re-learned on the protected channel before LOGIN
    assert_eq!(outbound(&mut engine), "A0003 CAPABILITY\r\n");
    engine
        .receive(b"* CAPABILITY IMAP4rev1 AUTH=PLAIN\r\nA0003 OK done\r\n")
        .unwrap();
    assert_eq!(outbound(&mut engine), "A0004 LOGIN \"user\" \"secret\"\r\n");
    engine.receive(b"A0004 OK welcome\r\n").unwrap();
    assert_eq!(engine.state(), State::Authenticated);
}

#[test]
fn authenticate_answers_challenges() {
    let mut engine = Engine::new(EngineConfig::default());
    engine.connected();
    engine
        .receive(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready\r\n")
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let witness = seen.clone();
    engine
        .authenticate(
            "plain",
            Box::new(move |challenge: &[u8]| {
                witness.lock().unwrap().push(challenge.to_vec());
                b"\0user\0secret".to_vec()
            }),
        )
        .unwrap();
    assert_eq!(outbound(&mut engine), "A0001 AUTHENTICATE PLAIN\r\n");

    engine.receive(b"+ \r\n").unwrap();
    // base64 of "\0user\0secret"
    assert_eq!(outbound(&mut engine), "AHVzZXIAc2VjcmV0\r\n");
    assert_eq!(seen.lock().unwrap().len(), 1);

    engine.receive(b"A0001 OK authenticated\r\n").unwrap();
    assert_eq!(engine.state(), State::Authenticated);
}

#[test]
fn bye_fails_everything_pending() {
    let mut engine = authenticated_engine(config_with_credentials());
    engine.noop().unwrap();
    engine.receive(b"* BYE shutting down\r\n").unwrap();
    assert_eq!(engine.state(), State::Logout);

    let events = events(&mut engine);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::Bye { .. })));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::Completed {
            outcome: Outcome::ConnectionLost,
            ..
        }
    )));
    assert_eq!(engine.pending_count(), 0);
}

#[test]
fn logout_completes_before_the_connection_closes() {
    let mut engine = authenticated_engine(config_with_credentials());
    let handle = engine.logout().unwrap();
    assert_eq!(outbound(&mut engine), "A0003 LOGOUT\r\n");
    engine
        .receive(b"* BYE see you\r\nA0003 OK logged out\r\n")
        .unwrap();
    assert_eq!(engine.state(), State::Logout);
    assert!(events(&mut engine).iter().any(|event| matches!(
        event,
        Event::Completed { handle: h, outcome: Outcome::Ok(_), .. } if *h == handle
    )));

    engine.closed("eof");
    assert_eq!(engine.state(), State::ConnectionClosed);
}

#[derive(Default)]
struct RecordingSink(Arc<Mutex<Vec<(u32, Vec<u8>, bool)>>>);

impl LiteralSink for RecordingSink {
    fn chunk(&mut self, handle: StreamHandle, data: &[u8], last: bool) {
        self.0.lock().unwrap().push((handle.id, data.to_vec(), last));
    }
}

#[test]
fn oversized_body_literal_streams_through_the_sink() {
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let config = EngineConfig {
        literal_ceiling: 8,
        ..config_with_credentials()
    };
    let mut engine = Engine::with_sink(config, Box::new(RecordingSink(chunks.clone())));
    engine.connected();
    engine.receive(b"* OK ready\r\n").unwrap();
    outbound(&mut engine);
    engine
        .receive(b"* CAPABILITY IMAP4rev1\r\nA0001 OK done\r\n")
        .unwrap();
    engine.receive(b"A0002 OK welcome\r\n").unwrap();
    engine.select("INBOX").unwrap();
    engine.receive(b"A0003 OK selected\r\n").unwrap();

    // the body arrives split across reads
    engine
        .receive(b"* 7 FETCH (UID 99 BODY[] {20}\r\nthe first ")
        .unwrap();
    engine.receive(b"ten bytes!)\r\n").unwrap();

    let record = events(&mut engine)
        .into_iter()
        .find_map(|event| match event {
            Event::Fetched(record) => Some(record),
            _ => None,
        })
        .expect("fetch record");
    assert_eq!(record.uid, Some(99));
    let handle = match record.sections.get("BODY[]") {
        Some(SectionData::Stream(handle)) => *handle,
        section => panic!("unexpected section {:?}", section),
    };
    assert_eq!(handle.len, 20);

    let chunks = chunks.lock().unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0], (handle.id, b"the first ".to_vec(), false));
    assert_eq!(chunks[1], (handle.id, b"ten bytes!".to_vec(), true));
}
