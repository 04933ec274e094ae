use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use tokio_util::codec::{Decoder, Encoder};

use imap_wire::builders::command::{
    AttrMacro, Attribute, Command, CommandBuilder, FetchBuilderAttributes, FetchBuilderMessages,
    FetchBuilderModifiers, StatusItem, StoreOperation,
};
use imap_wire::framer::{Framer, LiteralSink, ResponseUnit, DEFAULT_LITERAL_CEILING};
use imap_wire::parser::{parse_unit, ParseFailure};
use imap_wire::types::{
    MailboxDatum, Request, RequestId, Response, ResponseCode, State, Status, StatusAttribute,
};
use imap_wire::utf7;

use crate::dispatch::{PendingCommand, Responder, TagGenerator};
use crate::error::ProtocolError;
use crate::state::CommandKind;
use crate::types::{
    CapabilitySet, CommandHandle, CommandPayload, Event, FetchRecord, ListEntry, MailboxStatus,
    Outcome,
};

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Literals above this size stream to the sink instead of being buffered.
    pub literal_ceiling: usize,
    /// When set, commands unanswered for this long complete with `TimedOut`
    /// on the next [`Engine::tick`].
    pub command_deadline: Option<Duration>,
    /// How long an IDLE may sit before [`Engine::idle_deadline`] asks the
    /// caller's timer to force a DONE/IDLE cycle.
    pub idle_refresh: Duration,
    /// Upgrade to TLS before authenticating when the server advertises
    /// STARTTLS.
    pub use_starttls: bool,
    /// When set, LOGIN is issued automatically on entering NotAuthenticated.
    pub credentials: Option<Credentials>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            literal_ceiling: DEFAULT_LITERAL_CEILING,
            command_deadline: None,
            idle_refresh: Duration::from_secs(25 * 60),
            use_starttls: false,
            credentials: None,
        }
    }
}

enum IdleMode {
    Inactive,
    /// IDLE written, waiting for the server's `+`.
    Pending { tag: RequestId },
    Active { tag: RequestId, since: Instant },
    /// DONE written, waiting for the tagged completion.
    Terminating { tag: RequestId },
}

struct QueuedCommand {
    handle: CommandHandle,
    kind: CommandKind,
    command: Command,
    payload: CommandPayload,
    responder: Option<Responder>,
}

/// The sans-I/O IMAP4rev1 client engine.
///
/// Two input edges (`receive` for transport bytes, the command methods for
/// caller intent) and two output edges (`take_outbound` for bytes to write,
/// `poll_event` for parsed server events and command completions). All state
/// lives here; no I/O, no internal threads, no locks.
pub struct Engine {
    config: EngineConfig,
    state: State,
    framer: Framer,
    read_buf: BytesMut,
    write_buf: BytesMut,
    tags: TagGenerator,
    next_handle: u64,
    pending: Vec<PendingCommand>,
    queued: VecDeque<QueuedCommand>,
    events: VecDeque<Event>,
    caps: CapabilitySet,
    preauth: bool,
    tls_active: bool,
    selected: Option<MailboxStatus>,
    mailboxes: HashMap<String, MailboxStatus>,
    idle: IdleMode,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let framer = Framer::new(config.literal_ceiling);
        Self::with_framer(config, framer)
    }

    /// Attach a sink for literals above the ceiling; without one, an
    /// oversized literal tears the session down.
    pub fn with_sink(config: EngineConfig, sink: Box<dyn LiteralSink + Send>) -> Self {
        let framer = Framer::with_sink(config.literal_ceiling, sink);
        Self::with_framer(config, framer)
    }

    fn with_framer(config: EngineConfig, framer: Framer) -> Self {
        Engine {
            config,
            state: State::ConnectionClosed,
            framer,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            tags: TagGenerator::new(),
            next_handle: 0,
            pending: Vec::new(),
            queued: VecDeque::new(),
            events: VecDeque::new(),
            caps: CapabilitySet::default(),
            preauth: false,
            tls_active: false,
            selected: None,
            mailboxes: HashMap::new(),
            idle: IdleMode::Inactive,
        }
    }

    // ----- observers -----

    pub fn state(&self) -> State {
        self.state
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    pub fn selected(&self) -> Option<&MailboxStatus> {
        self.selected.as_ref()
    }

    pub fn mailbox(&self, name: &str) -> Option<&MailboxStatus> {
        self.mailboxes.get(name)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.idle, IdleMode::Active { .. })
    }

    /// Earliest command deadline, for the caller's timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .iter()
            .filter(|p| !p.abandoned)
            .filter_map(|p| p.deadline)
            .min()
    }

    /// When the caller-side watchdog should force a DONE/IDLE cycle.
    pub fn idle_deadline(&self) -> Option<Instant> {
        match &self.idle {
            IdleMode::Active { since, .. } => Some(*since + self.config.idle_refresh),
            _ => None,
        }
    }

    // ----- output edges -----

    pub fn take_outbound(&mut self) -> Bytes {
        self.write_buf.split().freeze()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    // ----- transport input edges -----

    /// The transport has connected.
    pub fn connected(&mut self) {
        if self.state != State::ConnectionClosed {
            warn!("connected() while in state {:?}", self.state);
            return;
        }
        self.state = State::ConnectionEstablished;
        debug!("connection state ConnectionClosed -> ConnectionEstablished");
    }

    /// Bytes arrived from the transport. A framing or grammar failure tears
    /// the session down (wire framing is lost) and is returned to the caller.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.read_buf.extend_from_slice(bytes);
        loop {
            let unit = match self.framer.decode(&mut self.read_buf) {
                Ok(Some(unit)) => unit,
                Ok(None) => return Ok(()),
                Err(err) => {
                    let err = ProtocolError::from(err);
                    self.fail_session(&err);
                    return Err(err);
                }
            };
            if let Err(err) = self.handle_unit(&unit) {
                self.fail_session(&err);
                return Err(err);
            }
        }
    }

    /// The transport has closed. Every outstanding command surfaces as a
    /// `ConnectionLost` completion.
    pub fn closed(&mut self, reason: &str) {
        self.events.push_back(Event::Disconnected {
            reason: reason.to_string(),
        });
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            if !p.abandoned {
                self.events.push_back(Event::Completed {
                    handle: p.handle,
                    tag: p.tag.0,
                    outcome: Outcome::ConnectionLost,
                });
            }
        }
        while let Some(q) = self.queued.pop_front() {
            self.events.push_back(Event::Completed {
                handle: q.handle,
                tag: String::new(),
                outcome: Outcome::ConnectionLost,
            });
        }
        self.idle = IdleMode::Inactive;
        self.state = State::ConnectionClosed;
    }

    /// Deadline sweep; call with the current instant.
    pub fn tick(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for p in &mut self.pending {
            if !p.abandoned && p.deadline.map_or(false, |deadline| deadline <= now) {
                p.abandoned = true;
                expired.push((p.handle, p.tag.0.clone()));
            }
        }
        for (handle, tag) in expired {
            self.events.push_back(Event::Completed {
                handle,
                tag,
                outcome: Outcome::TimedOut,
            });
        }
    }

    // ----- command edge -----

    pub fn capability(&mut self) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Capability,
            CommandBuilder::capability(),
            CommandPayload::Capabilities(CapabilitySet::default()),
            None,
        )
    }

    pub fn starttls(&mut self) -> Result<CommandHandle, ProtocolError> {
        if self.tls_active || !self.caps.has("STARTTLS") {
            return Err(ProtocolError::StartTlsNotAvailable);
        }
        self.submit(
            CommandKind::StartTls,
            CommandBuilder::starttls(),
            CommandPayload::None,
            None,
        )
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Login,
            CommandBuilder::login(username, password),
            CommandPayload::None,
            None,
        )
    }

    /// AUTHENTICATE with a caller-supplied challenge responder. The engine
    /// base64-decodes each `+` challenge, feeds it to `responder` and writes
    /// the base64-encoded reply.
    pub fn authenticate(
        &mut self,
        mechanism: &str,
        responder: Responder,
    ) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Authenticate,
            CommandBuilder::authenticate(mechanism),
            CommandPayload::None,
            Some(responder),
        )
    }

    pub fn select(&mut self, mailbox: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Select,
            CommandBuilder::select(mailbox),
            CommandPayload::Mailbox(MailboxStatus {
                name: mailbox.to_string(),
                ..Default::default()
            }),
            None,
        )
    }

    pub fn examine(&mut self, mailbox: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Examine,
            CommandBuilder::examine(mailbox),
            CommandPayload::Mailbox(MailboxStatus {
                name: mailbox.to_string(),
                read_only: true,
                ..Default::default()
            }),
            None,
        )
    }

    pub fn status(
        &mut self,
        mailbox: &str,
        items: &[StatusItem],
    ) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Status,
            CommandBuilder::status(mailbox, items),
            CommandPayload::Status {
                mailbox: mailbox.to_string(),
                attributes: Vec::new(),
            },
            None,
        )
    }

    pub fn list(&mut self, reference: &str, pattern: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::List,
            CommandBuilder::list(reference, pattern),
            CommandPayload::List(Vec::new()),
            None,
        )
    }

    pub fn lsub(&mut self, reference: &str, pattern: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Lsub,
            CommandBuilder::lsub(reference, pattern),
            CommandPayload::List(Vec::new()),
            None,
        )
    }

    pub fn create(&mut self, mailbox: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Create,
            CommandBuilder::create(mailbox),
            CommandPayload::None,
            None,
        )
    }

    pub fn delete(&mut self, mailbox: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Delete,
            CommandBuilder::delete(mailbox),
            CommandPayload::None,
            None,
        )
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Rename,
            CommandBuilder::rename(from, to),
            CommandPayload::None,
            None,
        )
    }

    pub fn subscribe(&mut self, mailbox: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Subscribe,
            CommandBuilder::subscribe(mailbox),
            CommandPayload::None,
            None,
        )
    }

    pub fn unsubscribe(&mut self, mailbox: &str) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Unsubscribe,
            CommandBuilder::unsubscribe(mailbox),
            CommandPayload::None,
            None,
        )
    }

    pub fn fetch(
        &mut self,
        sequence_set: &str,
        attrs: &[Attribute],
    ) -> Result<CommandHandle, ProtocolError> {
        let command = build_fetch(CommandBuilder::fetch(), sequence_set, attrs);
        self.submit(CommandKind::Fetch, command, CommandPayload::None, None)
    }

    pub fn uid_fetch(
        &mut self,
        sequence_set: &str,
        attrs: &[Attribute],
    ) -> Result<CommandHandle, ProtocolError> {
        let command = build_fetch(CommandBuilder::uid_fetch(), sequence_set, attrs);
        self.submit(CommandKind::Fetch, command, CommandPayload::None, None)
    }

    /// FETCH a single `BODY[<path>]` section, optionally with PEEK.
    pub fn fetch_section(
        &mut self,
        sequence_set: &str,
        path: &str,
        peek: bool,
    ) -> Result<CommandHandle, ProtocolError> {
        let messages = CommandBuilder::fetch().set(sequence_set);
        let attrs = if peek {
            messages.peek_section(path)
        } else {
            messages.section(path)
        };
        self.submit(CommandKind::Fetch, attrs.build(), CommandPayload::None, None)
    }

    pub fn store(
        &mut self,
        sequence_set: &str,
        operation: StoreOperation,
        silent: bool,
        flags: &[&str],
    ) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Store,
            CommandBuilder::store(sequence_set, operation, silent, flags),
            CommandPayload::None,
            None,
        )
    }

    pub fn uid_store(
        &mut self,
        sequence_set: &str,
        operation: StoreOperation,
        silent: bool,
        flags: &[&str],
    ) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Store,
            CommandBuilder::uid_store(sequence_set, operation, silent, flags),
            CommandPayload::None,
            None,
        )
    }

    pub fn expunge(&mut self) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Expunge,
            CommandBuilder::expunge(),
            CommandPayload::Expunged(Vec::new()),
            None,
        )
    }

    pub fn close(&mut self) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Close,
            CommandBuilder::close(),
            CommandPayload::None,
            None,
        )
    }

    pub fn noop(&mut self) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Noop,
            CommandBuilder::noop(),
            CommandPayload::None,
            None,
        )
    }

    pub fn idle(&mut self) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Idle,
            CommandBuilder::idle(),
            CommandPayload::None,
            None,
        )
    }

    /// Terminate an active IDLE explicitly.
    pub fn done(&mut self) -> Result<(), ProtocolError> {
        match self.idle {
            IdleMode::Active { .. } => {
                self.write_done();
                Ok(())
            }
            _ => Err(ProtocolError::UnexpectedState {
                command: CommandKind::Idle,
                state: self.state,
            }),
        }
    }

    /// Force a DONE/IDLE cycle; wired to the caller-side idle watchdog.
    pub fn refresh_idle(&mut self) {
        if let IdleMode::Active { .. } = self.idle {
            let handle = self.allocate_handle();
            self.queued.push_back(QueuedCommand {
                handle,
                kind: CommandKind::Idle,
                command: CommandBuilder::idle(),
                payload: CommandPayload::None,
                responder: None,
            });
            self.write_done();
        }
    }

    pub fn logout(&mut self) -> Result<CommandHandle, ProtocolError> {
        self.submit(
            CommandKind::Logout,
            CommandBuilder::logout(),
            CommandPayload::None,
            None,
        )
    }

    /// Detach a command's completion. The tag cannot be recalled; the
    /// eventual tagged response is consumed silently.
    pub fn cancel(&mut self, handle: CommandHandle) -> bool {
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| p.handle == handle && !p.abandoned)
        {
            p.abandoned = true;
            let tag = p.tag.0.clone();
            self.events.push_back(Event::Completed {
                handle,
                tag,
                outcome: Outcome::Cancelled,
            });
            return true;
        }
        if let Some(pos) = self.queued.iter().position(|q| q.handle == handle) {
            self.queued.remove(pos);
            self.events.push_back(Event::Completed {
                handle,
                tag: String::new(),
                outcome: Outcome::Cancelled,
            });
            return true;
        }
        false
    }

    // ----- dispatch internals -----

    fn allocate_handle(&mut self) -> CommandHandle {
        self.next_handle += 1;
        CommandHandle(self.next_handle)
    }

    fn submit(
        &mut self,
        kind: CommandKind,
        command: Command,
        payload: CommandPayload,
        responder: Option<Responder>,
    ) -> Result<CommandHandle, ProtocolError> {
        if !kind.allowed_in(self.state) {
            return Err(ProtocolError::UnexpectedState {
                command: kind,
                state: self.state,
            });
        }
        let handle = self.allocate_handle();
        if !matches!(self.idle, IdleMode::Inactive) {
            // IDLE owns the wire until DONE completes; queue and terminate it
            self.queued.push_back(QueuedCommand {
                handle,
                kind,
                command,
                payload,
                responder,
            });
            if matches!(self.idle, IdleMode::Active { .. }) {
                self.write_done();
            }
            return Ok(handle);
        }
        self.transmit(handle, kind, command, payload, responder);
        Ok(handle)
    }

    fn transmit(
        &mut self,
        handle: CommandHandle,
        kind: CommandKind,
        command: Command,
        payload: CommandPayload,
        responder: Option<Responder>,
    ) {
        let tag = self.tags.next().expect("tag generator is infinite");
        let Command {
            mut parts,
            next_state,
        } = command;
        let first = parts.remove(0);
        let request = Request(Cow::Borrowed(tag.as_bytes()), Cow::Owned(first));
        self.framer
            .encode(&request, &mut self.write_buf)
            .expect("encoding into memory cannot fail");
        let now = Instant::now();
        self.pending.push(PendingCommand {
            handle,
            tag: tag.clone(),
            kind,
            sent_at: now,
            deadline: self.config.command_deadline.map(|limit| now + limit),
            abandoned: false,
            remaining_parts: parts.into(),
            next_state,
            payload,
            responder,
        });
        if kind == CommandKind::Idle {
            self.idle = IdleMode::Pending { tag };
        }
    }

    fn write_done(&mut self) {
        if let IdleMode::Active { tag, .. } = &self.idle {
            let tag = tag.clone();
            self.write_buf.extend_from_slice(b"DONE\r\n");
            self.idle = IdleMode::Terminating { tag };
        }
    }

    fn flush_queued(&mut self) {
        while let Some(q) = self.queued.pop_front() {
            let is_idle = q.kind == CommandKind::Idle;
            self.transmit(q.handle, q.kind, q.command, q.payload, q.responder);
            if is_idle {
                // IDLE owns the wire again; the rest waits for the next cycle
                break;
            }
        }
    }

    // ----- inbound routing -----

    fn handle_unit(&mut self, unit: &ResponseUnit) -> Result<(), ProtocolError> {
        let response = match parse_unit(unit) {
            Ok(response) => response,
            Err(ParseFailure::UnknownFetchItem(name)) => {
                warn!("dropping FETCH response with unknown item {name}");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.route(response);
        Ok(())
    }

    fn route(&mut self, response: Response<'_>) {
        match response {
            Response::Continue { information, .. } => self.on_continuation(information.as_deref()),
            Response::Done {
                tag,
                status,
                code,
                information,
            } => self.on_tagged(tag, status, code, information.map(|s| s.into_owned())),
            Response::Data {
                status,
                code,
                information,
            } => self.on_untagged_status(status, code, information.map(|s| s.into_owned())),
            Response::Capabilities(caps) => {
                self.on_capabilities(CapabilitySet::from_wire(&caps));
            }
            Response::Expunge(seq) => self.on_expunge(seq),
            Response::Fetch(seq, attrs) => self.on_fetch(seq, attrs),
            Response::MailboxData(datum) => self.on_mailbox_data(datum),
            _ => {}
        }
    }

    // The oldest pending command that can consume a continuation gets it:
    // first literal-gated parts, then an AUTHENTICATE responder, then a
    // pending IDLE.
    fn on_continuation(&mut self, information: Option<&str>) {
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| !p.abandoned && !p.remaining_parts.is_empty())
        {
            let part = p.remaining_parts.pop_front().expect("checked non-empty");
            self.write_buf.extend_from_slice(&part);
            self.write_buf.extend_from_slice(b"\r\n");
            return;
        }
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| !p.abandoned && p.responder.is_some())
        {
            let challenge = information
                .map(|text| {
                    BASE64
                        .decode(text.trim())
                        .unwrap_or_else(|_| text.as_bytes().to_vec())
                })
                .unwrap_or_default();
            let responder = p.responder.as_mut().expect("checked above");
            let reply = BASE64.encode(responder(&challenge));
            self.write_buf.extend_from_slice(reply.as_bytes());
            self.write_buf.extend_from_slice(b"\r\n");
            return;
        }
        if let IdleMode::Pending { tag } = &self.idle {
            self.idle = IdleMode::Active {
                tag: tag.clone(),
                since: Instant::now(),
            };
            self.events.push_back(Event::IdleEntered);
            // a command arrived while IDLE was still waiting for this
            if !self.queued.is_empty() {
                self.write_done();
            }
            return;
        }
        warn!("continuation request with no pending consumer");
    }

    fn on_tagged(
        &mut self,
        tag: RequestId,
        status: Status,
        code: Option<ResponseCode<'_>>,
        information: Option<String>,
    ) {
        let index = match self.pending.iter().position(|p| p.tag.0 == tag.0) {
            Some(index) => index,
            None => {
                warn!("{}", ProtocolError::UnexpectedTag(tag.0));
                return;
            }
        };
        let mut p = self.pending.remove(index);

        let was_idle_tag = match &self.idle {
            IdleMode::Pending { tag }
            | IdleMode::Active { tag, .. }
            | IdleMode::Terminating { tag } => tag.0 == p.tag.0,
            IdleMode::Inactive => false,
        };
        if was_idle_tag {
            self.idle = IdleMode::Inactive;
        }

        if let Some(code) = &code {
            let handled = match &mut p.payload {
                CommandPayload::Mailbox(mailbox) => apply_mailbox_code(code, mailbox),
                _ => false,
            };
            if !handled {
                self.apply_code(code, information.as_deref());
            }
        }

        if p.abandoned {
            debug!("discarding response for abandoned tag {}", p.tag.0);
        } else {
            let outcome = match status {
                Status::Ok => {
                    let payload = std::mem::replace(&mut p.payload, CommandPayload::None);
                    self.on_command_ok(&p, &payload);
                    if let Some(next) = p.next_state {
                        self.enter_state(next);
                    }
                    Outcome::Ok(payload)
                }
                Status::No => Outcome::No(information.unwrap_or_default()),
                Status::Bad => {
                    warn!(
                        "server answered BAD to {} ({:?}), likely a client bug",
                        p.tag.0, information
                    );
                    Outcome::Bad(information.unwrap_or_default())
                }
                Status::PreAuth | Status::Bye => {
                    warn!("nonsense tagged status for {}", p.tag.0);
                    Outcome::Bad(information.unwrap_or_default())
                }
            };
            self.events.push_back(Event::Completed {
                handle: p.handle,
                tag: p.tag.0.clone(),
                outcome,
            });
        }

        if was_idle_tag {
            self.flush_queued();
        }
    }

    fn on_command_ok(&mut self, p: &PendingCommand, payload: &CommandPayload) {
        match p.kind {
            CommandKind::Capability => {
                if let CommandPayload::Capabilities(caps) = payload {
                    self.adopt_capabilities(caps.clone());
                }
            }
            CommandKind::StartTls => {
                // the transport negotiates TLS now; nothing it buffered in
                // plaintext may be delivered afterwards
                self.tls_active = true;
                self.caps = CapabilitySet::default();
                self.events.push_back(Event::UpgradeTls);
                let _ = self.capability();
            }
            CommandKind::Select | CommandKind::Examine => {
                if let CommandPayload::Mailbox(status) = payload {
                    self.selected = Some(status.clone());
                    self.mailboxes.insert(status.name.clone(), status.clone());
                }
            }
            CommandKind::Close => {
                self.selected = None;
            }
            _ => {}
        }
    }

    fn on_untagged_status(
        &mut self,
        status: Status,
        code: Option<ResponseCode<'_>>,
        information: Option<String>,
    ) {
        if self.state == State::ConnectionEstablished {
            return self.on_greeting(status, code, information);
        }
        match status {
            Status::Bye => {
                self.events.push_back(Event::Bye {
                    information: information.clone(),
                });
                self.enter_state(State::Logout);
            }
            _ => {
                if let Some(code) = &code {
                    self.apply_code(code, information.as_deref());
                }
            }
        }
    }

    fn on_greeting(
        &mut self,
        status: Status,
        code: Option<ResponseCode<'_>>,
        information: Option<String>,
    ) {
        match status {
            Status::Ok | Status::PreAuth => {
                self.preauth = status == Status::PreAuth;
                self.events.push_back(Event::Greeting {
                    preauth: self.preauth,
                    information,
                });
                self.enter_state(State::ServerGreeting);
                if let Some(ResponseCode::Capabilities(caps)) = &code {
                    // the greeting already told us; skip the round-trip
                    self.adopt_capabilities(CapabilitySet::from_wire(caps));
                } else {
                    let _ = self.capability();
                }
            }
            _ => {
                self.events.push_back(Event::Bye { information });
                self.enter_state(State::Logout);
            }
        }
    }

    fn adopt_capabilities(&mut self, caps: CapabilitySet) {
        self.caps = caps.clone();
        self.events.push_back(Event::CapabilitiesUpdated(caps));
        if !self.caps.is_imap4rev1() {
            self.fail_session(&ProtocolError::NotImap4Rev1);
            return;
        }
        match self.state {
            State::ServerGreeting => {
                if self.preauth {
                    self.enter_state(State::Authenticated);
                } else {
                    self.enter_state(State::NotAuthenticated);
                }
            }
            // fresh capabilities after the TLS upgrade: now authenticate
            State::NotAuthenticated if self.tls_active => self.try_auto_login(),
            _ => {}
        }
    }

    fn on_capabilities(&mut self, caps: CapabilitySet) {
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| !p.abandoned && matches!(p.payload, CommandPayload::Capabilities(_)))
        {
            p.payload = CommandPayload::Capabilities(caps);
        } else {
            self.adopt_capabilities(caps);
        }
    }

    fn enter_state(&mut self, next: State) {
        if self.state == next {
            return;
        }
        debug!("connection state {:?} -> {:?}", self.state, next);
        self.state = next;
        match next {
            State::NotAuthenticated => {
                if self.config.use_starttls && !self.tls_active {
                    if self.caps.has("STARTTLS") {
                        let _ = self.starttls();
                        return;
                    }
                    warn!("STARTTLS requested but not advertised, logging in on plaintext");
                }
                self.try_auto_login();
            }
            State::Logout => self.drain_pending(),
            _ => {}
        }
    }

    fn try_auto_login(&mut self) {
        let already = self.pending.iter().any(|p| {
            matches!(p.kind, CommandKind::Login | CommandKind::Authenticate) && !p.abandoned
        });
        if already {
            return;
        }
        if let Some(creds) = self.config.credentials.clone() {
            let _ = self.login(&creds.username, &creds.password);
        }
    }

    // Entering Logout fails everything still outstanding, except a LOGOUT
    // command that is itself waiting for its OK.
    fn drain_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let mut kept = Vec::new();
        for p in pending {
            if p.kind == CommandKind::Logout {
                kept.push(p);
                continue;
            }
            if !p.abandoned {
                self.events.push_back(Event::Completed {
                    handle: p.handle,
                    tag: p.tag.0.clone(),
                    outcome: Outcome::ConnectionLost,
                });
            }
        }
        self.pending = kept;
        while let Some(q) = self.queued.pop_front() {
            self.events.push_back(Event::Completed {
                handle: q.handle,
                tag: String::new(),
                outcome: Outcome::ConnectionLost,
            });
        }
        self.idle = IdleMode::Inactive;
    }

    fn fail_session(&mut self, err: &ProtocolError) {
        warn!("session failure: {err}");
        self.events.push_back(Event::ProtocolViolation {
            message: err.to_string(),
        });
        if self.state != State::Logout {
            self.enter_state(State::Logout);
        } else {
            self.drain_pending();
        }
    }

    fn apply_code(&mut self, code: &ResponseCode<'_>, information: Option<&str>) {
        match code {
            ResponseCode::Alert => {
                self.events
                    .push_back(Event::Alert(information.unwrap_or_default().to_string()));
            }
            ResponseCode::Capabilities(caps) => {
                self.on_capabilities(CapabilitySet::from_wire(caps));
            }
            ResponseCode::Parse | ResponseCode::TryCreate | ResponseCode::BadCharset(_) => {
                debug!("response code {:?}", code);
            }
            _ => {
                if let Some(mailbox) = self.select_build_target() {
                    apply_mailbox_code(code, mailbox);
                    return;
                }
                if let Some(mailbox) = self.selected.as_mut() {
                    if apply_mailbox_code(code, mailbox) {
                        let snapshot = mailbox.clone();
                        self.events.push_back(Event::MailboxUpdate(snapshot));
                    }
                } else {
                    debug!("ignoring response code {:?} with no mailbox", code);
                }
            }
        }
    }

    // The mailbox a SELECT/EXAMINE in flight is assembling, if any.
    fn select_build_target(&mut self) -> Option<&mut MailboxStatus> {
        for p in self.pending.iter_mut() {
            if p.abandoned {
                continue;
            }
            if let CommandPayload::Mailbox(mailbox) = &mut p.payload {
                return Some(mailbox);
            }
        }
        None
    }

    fn idle_notify(&mut self, name: &str, number: u32) {
        if let IdleMode::Active { .. } = self.idle {
            self.events.push_back(Event::IdleUpdate {
                name: name.to_string(),
                number,
            });
        }
    }

    fn on_expunge(&mut self, seq: u32) {
        self.idle_notify("EXPUNGE", seq);
        if let Some(mailbox) = self.selected.as_mut() {
            mailbox.exists = mailbox.exists.saturating_sub(1);
        }
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| !p.abandoned && matches!(p.payload, CommandPayload::Expunged(_)))
        {
            if let CommandPayload::Expunged(seqs) = &mut p.payload {
                seqs.push(seq);
            }
        }
        self.events.push_back(Event::Expunged(seq));
    }

    fn on_fetch(&mut self, seq: u32, attrs: Vec<imap_wire::types::AttributeValue<'_>>) {
        self.idle_notify("FETCH", seq);
        let mut record = FetchRecord::new(seq);
        for attr in attrs {
            if let Err(err) = record.absorb(attr) {
                warn!("dropping FETCH response for message {seq}: {err}");
                return;
            }
        }
        self.events.push_back(Event::Fetched(record));
    }

    fn on_mailbox_data(&mut self, datum: MailboxDatum<'_>) {
        match datum {
            MailboxDatum::Exists(n) => {
                self.idle_notify("EXISTS", n);
                if let Some(mailbox) = self.select_build_target() {
                    mailbox.exists = n;
                    return;
                }
                if let Some(mailbox) = self.selected.as_mut() {
                    mailbox.exists = n;
                    let snapshot = mailbox.clone();
                    self.events.push_back(Event::MailboxUpdate(snapshot));
                }
            }
            MailboxDatum::Recent(n) => {
                self.idle_notify("RECENT", n);
                if let Some(mailbox) = self.select_build_target() {
                    mailbox.recent = n;
                    return;
                }
                if let Some(mailbox) = self.selected.as_mut() {
                    mailbox.recent = n;
                    let snapshot = mailbox.clone();
                    self.events.push_back(Event::MailboxUpdate(snapshot));
                }
            }
            MailboxDatum::Flags(flags) => {
                let flags: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
                if let Some(mailbox) = self.select_build_target() {
                    mailbox.flags = flags;
                    return;
                }
                if let Some(mailbox) = self.selected.as_mut() {
                    mailbox.flags = flags;
                    let snapshot = mailbox.clone();
                    self.events.push_back(Event::MailboxUpdate(snapshot));
                }
            }
            MailboxDatum::List {
                flags,
                delimiter,
                name,
            } => self.on_list_entry(CommandKind::List, flags, delimiter, name),
            MailboxDatum::Lsub {
                flags,
                delimiter,
                name,
            } => self.on_list_entry(CommandKind::Lsub, flags, delimiter, name),
            MailboxDatum::Status { mailbox, status } => self.on_status(&mailbox, status),
            MailboxDatum::Search(ids) => {
                if let Some(p) = self
                    .pending
                    .iter_mut()
                    .find(|p| !p.abandoned && matches!(p.payload, CommandPayload::Search(_)))
                {
                    p.payload = CommandPayload::Search(ids);
                } else {
                    debug!("unsolicited SEARCH response");
                }
            }
            _ => {}
        }
    }

    fn on_list_entry(
        &mut self,
        kind: CommandKind,
        flags: Vec<Cow<'_, str>>,
        delimiter: Option<Cow<'_, str>>,
        name: Cow<'_, str>,
    ) {
        let decoded = utf7::decode_mailbox(name.as_bytes()).unwrap_or_else(|| {
            warn!("mailbox name {:?} is not valid modified UTF-7", name);
            name.to_string()
        });
        let entry = ListEntry {
            flags: flags.iter().map(|f| f.to_string()).collect(),
            delimiter: delimiter.map(|d| d.to_string()),
            name: decoded,
        };
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| !p.abandoned && p.kind == kind)
        {
            if let CommandPayload::List(entries) = &mut p.payload {
                entries.push(entry);
                return;
            }
        }
        debug!("unsolicited {:?} entry for {}", kind, entry.name);
    }

    fn on_status(&mut self, mailbox: &str, attributes: Vec<StatusAttribute>) {
        let name = utf7::decode_mailbox(mailbox.as_bytes()).unwrap_or_else(|| mailbox.to_string());
        let entry = self
            .mailboxes
            .entry(name.clone())
            .or_insert_with(|| MailboxStatus {
                name: name.clone(),
                ..Default::default()
            });
        for attribute in &attributes {
            match attribute {
                StatusAttribute::Messages(n) => entry.exists = *n,
                StatusAttribute::Recent(n) => entry.recent = *n,
                StatusAttribute::UidNext(n) => entry.uid_next = Some(*n),
                StatusAttribute::UidValidity(n) => entry.uid_validity = Some(*n),
                StatusAttribute::Unseen(n) => entry.unseen = Some(*n),
                _ => {}
            }
        }
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| !p.abandoned && matches!(p.payload, CommandPayload::Status { .. }))
        {
            if let CommandPayload::Status {
                attributes: collected,
                ..
            } = &mut p.payload
            {
                *collected = attributes;
            }
        }
    }
}

fn build_fetch(
    start: imap_wire::builders::command::FetchCommandEmpty,
    sequence_set: &str,
    attrs: &[Attribute],
) -> Command {
    let messages = start.set(sequence_set);
    match attrs.split_first() {
        None => messages.attr_macro(AttrMacro::All).build(),
        Some((first, rest)) => {
            let mut acc = messages.attr(*first);
            for attr in rest {
                acc = acc.attr(*attr);
            }
            acc.build()
        }
    }
}

fn apply_mailbox_code(code: &ResponseCode<'_>, mailbox: &mut MailboxStatus) -> bool {
    match code {
        ResponseCode::PermanentFlags(flags) => {
            mailbox.permanent_flags = flags.iter().map(|f| f.to_string()).collect();
            true
        }
        ResponseCode::ReadOnly => {
            mailbox.read_only = true;
            true
        }
        ResponseCode::ReadWrite => {
            mailbox.read_only = false;
            true
        }
        ResponseCode::UidNext(n) => {
            mailbox.uid_next = Some(*n);
            true
        }
        ResponseCode::UidValidity(n) => {
            mailbox.uid_validity = Some(*n);
            true
        }
        ResponseCode::Unseen(n) => {
            mailbox.unseen = Some(*n);
            true
        }
        _ => false,
    }
}
