//! One authenticated IMAP connection to one mailbox.
//!
//! Commands run strictly one at a time. Every transition goes through
//! [`SessionState::can_transition_to`] and is broadcast to subscribers, so
//! callers can observe the session without holding it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

use crate::error::SessionError;
use crate::imap::codec::{self, Greeting, Response, Status};
use crate::imap::state::{SessionEvent, SessionState};
use crate::imap::transport::SessionConnector;
use crate::mail::MessageAttributes;
use crate::store::MailboxCredential;

const EVENT_CAPACITY: usize = 64;

/// Timing and buffering knobs for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on a single command round trip.
    pub command_timeout: Duration,
    /// Upper bound on the best-effort LOGOUT during disconnect.
    pub logout_timeout: Duration,
    /// IDLE is re-issued after this long (RFC 2177 asks for < 30 minutes).
    pub idle_renew: Duration,
    /// Maximum bytes handed out per body chunk.
    pub chunk_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            logout_timeout: Duration::from_secs(1),
            idle_renew: Duration::from_secs(29 * 60),
            chunk_size: 16 * 1024,
        }
    }
}

/// Why [`ImapSession::idle`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server announced this many messages in the mailbox.
    NewMail(u32),
    /// The renew interval elapsed without news.
    Renew,
    /// The shutdown signal fired.
    Cancelled,
}

/// One step of a streamed `UID FETCH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    /// A message body is about to follow.
    Begin(MessageAttributes),
    /// A slice of the current message body.
    Chunk(Vec<u8>),
    /// The current message body is complete.
    End { uid: u32 },
    /// The server answered for this message but without a usable body.
    Failed {
        seq: u32,
        uid: Option<u32>,
        reason: String,
    },
}

type NoticeHandler = Arc<dyn Fn(u32) + Send + Sync>;

/// IMAP client session over any byte stream.
pub struct ImapSession<S> {
    address: String,
    host: String,
    options: SessionOptions,
    state: SessionState,
    stream: Option<BufReader<S>>,
    /// Bytes of a line that hasn't been terminated yet. Kept across
    /// cancelled reads so IDLE can be interrupted without losing data.
    partial: Vec<u8>,
    tag_counter: u32,
    read_only: bool,
    /// Last `EXISTS` count seen for the open mailbox.
    exists: u32,
    fetch_errors: u64,
    closed: bool,
    events: broadcast::Sender<SessionEvent>,
    notice_handlers: Vec<NoticeHandler>,
}

impl<S> ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(address: impl Into<String>, options: SessionOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            address: address.into(),
            host: String::new(),
            options,
            state: SessionState::Disconnected,
            stream: None,
            partial: Vec::new(),
            tag_counter: 0,
            read_only: false,
            exists: 0,
            fetch_errors: 0,
            closed: true,
            events,
            notice_handlers: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Per-message fetch responses that carried no usable body.
    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors
    }

    /// Observe state changes, push notices, errors and close.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Register a listener for `* n EXISTS` notices seen while idling.
    ///
    /// The count is advisory; listeners should re-run the unseen search.
    pub fn on_new_message_notice(&mut self, handler: impl Fn(u32) + Send + Sync + 'static) {
        self.notice_handlers.push(Arc::new(handler));
    }

    /// Open the transport, read the greeting and LOGIN.
    pub async fn connect<C>(
        &mut self,
        connector: &C,
        credential: &MailboxCredential,
    ) -> Result<(), SessionError>
    where
        C: SessionConnector<Stream = S> + ?Sized,
    {
        self.require("connect", &[SessionState::Disconnected])?;
        self.host = credential.host.clone();
        self.set_state(SessionState::Connecting);

        match self.handshake(connector, credential).await {
            Ok(()) => {
                self.set_state(SessionState::Authenticated);
                debug!(mailbox = %self.address, host = %self.host, "IMAP session authenticated");
                Ok(())
            }
            Err(e) => {
                self.emit(SessionEvent::Error(e.to_string()));
                self.force_disconnected();
                Err(e)
            }
        }
    }

    async fn handshake<C>(
        &mut self,
        connector: &C,
        credential: &MailboxCredential,
    ) -> Result<(), SessionError>
    where
        C: SessionConnector<Stream = S> + ?Sized,
    {
        let stream = connector.open(&credential.host, credential.port).await?;
        self.stream = Some(BufReader::new(stream));
        self.partial.clear();
        self.closed = false;

        let greeting = self.read_line_timed("greeting").await?;
        match codec::parse_greeting(&greeting) {
            Some(Greeting::Ok) => {}
            Some(Greeting::PreAuth) => {
                debug!(mailbox = %self.address, "Server pre-authenticated the connection");
                return Ok(());
            }
            Some(Greeting::Bye) => {
                return Err(self.connection_error(format!(
                    "server refused connection: {}",
                    greeting.trim_end()
                )));
            }
            None => {
                return Err(self.connection_error(format!(
                    "unexpected greeting: {}",
                    greeting.trim_end()
                )));
            }
        }

        let login = format!(
            "LOGIN {} {}",
            codec::quote(&credential.address),
            codec::quote(credential.secret.expose_secret())
        );
        let reply = self.command(&login, "LOGIN").await?;
        if reply.status != Status::Ok {
            return Err(SessionError::Auth {
                address: credential.address.clone(),
                reason: reply.text,
            });
        }
        Ok(())
    }

    /// `EXAMINE` (read-only) or `SELECT` a mailbox. Returns the message count.
    pub async fn open_mailbox(&mut self, name: &str, read_only: bool) -> Result<u32, SessionError> {
        self.require(
            "open a mailbox",
            &[SessionState::Authenticated, SessionState::MailboxOpen],
        )?;

        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        let reply = match self.command(&format!("{verb} {}", codec::quote(name)), verb).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(e)),
        };
        if reply.status != Status::Ok {
            return Err(SessionError::Protocol {
                command: format!("{verb} {name}"),
                response: reply.text,
            });
        }

        let exists = reply
            .untagged
            .iter()
            .find_map(|line| codec::parse_exists(line))
            .unwrap_or(0);
        self.read_only = read_only;
        self.exists = exists;
        self.set_state(SessionState::MailboxOpen);
        debug!(mailbox = %self.address, folder = name, exists, read_only, "Mailbox opened");
        Ok(exists)
    }

    /// Uids of unseen messages, optionally restricted to one sender. Sorted.
    pub async fn search_unseen_from(
        &mut self,
        sender: Option<&str>,
    ) -> Result<Vec<u32>, SessionError> {
        self.require("search", &[SessionState::MailboxOpen])?;
        self.set_state(SessionState::Searching);

        let command = match sender {
            Some(sender) => format!("UID SEARCH UNSEEN FROM {}", codec::quote(sender)),
            None => "UID SEARCH UNSEEN".to_string(),
        };
        let reply = match self.command(&command, "UID SEARCH").await {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(e)),
        };
        self.set_state(SessionState::MailboxOpen);

        if reply.status != Status::Ok {
            return Err(SessionError::Protocol {
                command,
                response: reply.text,
            });
        }

        let mut uids: Vec<u32> = reply
            .untagged
            .iter()
            .filter_map(|line| codec::parse_search(line))
            .flatten()
            .collect();
        uids.sort_unstable();
        uids.dedup();
        trace!(mailbox = %self.address, count = uids.len(), "Unseen search finished");
        Ok(uids)
    }

    /// Start streaming the bodies of `uids`.
    ///
    /// With `mark_seen` the server flags each message `\Seen` as it is sent;
    /// otherwise `BODY.PEEK[]` leaves flags untouched. The returned cursor
    /// must be drained to `None` before the session is used again.
    pub async fn fetch_bodies(
        &mut self,
        uids: &[u32],
        mark_seen: bool,
    ) -> Result<BodyFetch<'_, S>, SessionError> {
        self.require("fetch", &[SessionState::MailboxOpen])?;
        if mark_seen && self.read_only {
            return Err(SessionError::InvalidState {
                operation: "mark messages seen",
                state: "read-only mailbox".to_string(),
            });
        }

        if uids.is_empty() {
            return Ok(BodyFetch::finished(self));
        }

        let section = if mark_seen { "BODY[]" } else { "BODY.PEEK[]" };
        let command = format!("UID FETCH {} (UID FLAGS {section})", codec::uid_set(uids));
        self.set_state(SessionState::Fetching);
        let tag = match self.send(&command).await {
            Ok(tag) => tag,
            Err(e) => return Err(self.fail(e)),
        };
        Ok(BodyFetch::new(self, tag))
    }

    /// Wait in IDLE until new mail, the renew interval or shutdown.
    pub async fn idle(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<IdleOutcome, SessionError> {
        self.require("idle", &[SessionState::MailboxOpen])?;
        if *shutdown.borrow() {
            return Ok(IdleOutcome::Cancelled);
        }

        self.set_state(SessionState::Idle);
        match self.idle_inner(shutdown).await {
            Ok(outcome) => {
                self.set_state(SessionState::MailboxOpen);
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn idle_inner(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<IdleOutcome, SessionError> {
        enum Wake {
            Line(Result<String, SessionError>),
            Renew,
            /// `true` when the sender is gone.
            Signal(bool),
        }

        let tag = self.send("IDLE").await?;
        loop {
            let line = self.read_line_timed("IDLE").await?;
            match codec::parse_response(&line) {
                Some(Response::Continuation(_)) => break,
                Some(Response::Tagged { status, text, .. }) if status != Status::Ok => {
                    return Err(SessionError::Protocol {
                        command: "IDLE".to_string(),
                        response: text,
                    });
                }
                _ => continue,
            }
        }
        trace!(mailbox = %self.address, "Idling");

        let renew = tokio::time::sleep(self.options.idle_renew);
        tokio::pin!(renew);

        let mut outcome = loop {
            let wake = tokio::select! {
                line = self.read_line() => Wake::Line(line),
                _ = &mut renew => Wake::Renew,
                changed = shutdown.changed() => Wake::Signal(changed.is_err()),
            };

            match wake {
                Wake::Renew => break IdleOutcome::Renew,
                Wake::Signal(closed) => {
                    if closed || *shutdown.borrow() {
                        break IdleOutcome::Cancelled;
                    }
                }
                Wake::Line(line) => {
                    let line = line?;
                    match codec::parse_response(&line) {
                        Some(Response::Untagged(rest)) => {
                            if let Some(total) = codec::parse_exists(&rest) {
                                let arrived = self.record_exists(total);
                                self.notify_new_mail(arrived);
                                break IdleOutcome::NewMail(arrived);
                            }
                            if codec::parse_expunge(&rest).is_some() {
                                self.exists = self.exists.saturating_sub(1);
                                continue;
                            }
                            if codec::is_bye(&rest) {
                                return Err(self.connection_error(format!(
                                    "server closed IDLE: {}",
                                    rest.trim_end()
                                )));
                            }
                        }
                        // The server ended IDLE on its own; there is nothing to DONE.
                        Some(Response::Tagged { tag: t, .. }) if t == tag => {
                            return Ok(IdleOutcome::Renew);
                        }
                        _ => {}
                    }
                }
            }
        };

        self.write_raw("DONE\r\n").await?;
        loop {
            let line = self.read_line_timed("IDLE DONE").await?;
            match codec::parse_response(&line) {
                Some(Response::Tagged { tag: t, .. }) if t == tag => break,
                Some(Response::Untagged(rest)) => {
                    if let (IdleOutcome::Renew, Some(total)) = (outcome, codec::parse_exists(&rest)) {
                        let arrived = self.record_exists(total);
                        self.notify_new_mail(arrived);
                        outcome = IdleOutcome::NewMail(arrived);
                    }
                }
                _ => {}
            }
        }
        Ok(outcome)
    }

    /// Best-effort LOGOUT, then drop the transport. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if self.stream.is_some() && self.state.is_authenticated() {
            let logout_timeout = self.options.logout_timeout;
            match tokio::time::timeout(logout_timeout, self.command("LOGOUT", "LOGOUT")).await {
                Ok(Ok(_)) => trace!(mailbox = %self.address, "Logged out"),
                Ok(Err(e)) => debug!(mailbox = %self.address, error = %e, "LOGOUT failed"),
                Err(_) => debug!(mailbox = %self.address, "LOGOUT timed out"),
            }
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = tokio::time::timeout(self.options.logout_timeout, stream.shutdown()).await;
        }
        self.force_disconnected();
    }

    /// Drop the transport without LOGOUT. Used when an operation was
    /// abandoned mid-response and the stream can't be trusted.
    pub fn abort(&mut self) {
        if self.stream.is_some() {
            warn!(mailbox = %self.address, state = %self.state, "Aborting IMAP session");
        }
        self.force_disconnected();
    }

    // ── Internals ───────────────────────────────────────────────────

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to && to != SessionState::MailboxOpen {
            return;
        }
        debug_assert!(from.can_transition_to(to), "invalid transition {from} -> {to}");
        self.state = to;
        self.emit(SessionEvent::StateChanged {
            from,
            to,
            at: Utc::now(),
        });
    }

    /// Drop everything and land in `Disconnected`. Emits `Closed` once.
    fn force_disconnected(&mut self) {
        self.stream = None;
        self.partial.clear();
        self.notice_handlers.clear();
        self.read_only = false;
        self.exists = 0;
        self.set_state(SessionState::Disconnected);
        if !self.closed {
            self.closed = true;
            self.emit(SessionEvent::Closed);
        }
    }

    /// Connection-level failures tear the session down; protocol replies don't.
    fn fail(&mut self, error: SessionError) -> SessionError {
        self.emit(SessionEvent::Error(error.to_string()));
        if matches!(
            error,
            SessionError::Connection { .. } | SessionError::Timeout { .. }
        ) {
            self.force_disconnected();
        } else if self.state.is_busy() {
            self.set_state(SessionState::MailboxOpen);
        }
        error
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Store a new `EXISTS` total and return how many messages arrived since the last one.
    fn record_exists(&mut self, total: u32) -> u32 {
        let arrived = total.saturating_sub(self.exists);
        self.exists = total;
        arrived
    }

    fn notify_new_mail(&self, count: u32) {
        debug!(mailbox = %self.address, count, "New mail notice");
        self.emit(SessionEvent::NewMail { count });
        for handler in &self.notice_handlers {
            handler(count);
        }
    }

    fn connection_error(&self, reason: String) -> SessionError {
        SessionError::Connection {
            host: self.host.clone(),
            reason,
        }
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    async fn write_raw(&mut self, data: &str) -> Result<(), SessionError> {
        let host = self.host.clone();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SessionError::Connection {
                host: host.clone(),
                reason: "not connected".to_string(),
            })?;
        let io = async {
            stream.write_all(data.as_bytes()).await?;
            stream.flush().await
        };
        io.await.map_err(|e| SessionError::Connection {
            host,
            reason: e.to_string(),
        })
    }

    /// Send a tagged command without waiting for its completion.
    async fn send(&mut self, command: &str) -> Result<String, SessionError> {
        let tag = self.next_tag();
        self.write_raw(&format!("{tag} {command}\r\n")).await?;
        Ok(tag)
    }

    /// Send a command and collect untagged lines up to its completion.
    ///
    /// `label` is what gets logged; the full command may hold a password.
    async fn command(&mut self, command: &str, label: &str) -> Result<Reply, SessionError> {
        let timeout = self.options.command_timeout;
        let exchange = async {
            let tag = self.send(command).await?;
            trace!(mailbox = %self.address, %tag, command = label, "IMAP command sent");
            let mut untagged = Vec::new();
            loop {
                let line = self.read_line().await?;
                match codec::parse_response(&line) {
                    Some(Response::Tagged { tag: t, status, text }) if t == tag => {
                        return Ok(Reply {
                            status,
                            text,
                            untagged,
                        });
                    }
                    Some(Response::Untagged(rest)) => untagged.push(rest),
                    _ => trace!(mailbox = %self.address, "Ignoring response line"),
                }
            }
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .unwrap_or(Err(SessionError::Timeout {
                operation: "IMAP command",
                after: timeout,
            }))
    }

    async fn read_line_timed(&mut self, operation: &'static str) -> Result<String, SessionError> {
        let after = self.options.command_timeout;
        tokio::time::timeout(after, self.read_line())
            .await
            .unwrap_or(Err(SessionError::Timeout { operation, after }))
    }

    /// Read one CRLF-terminated line. Cancel-safe: partial input is retained.
    async fn read_line(&mut self) -> Result<String, SessionError> {
        let host = self.host.clone();
        let stream = self.stream.as_mut().ok_or_else(|| SessionError::Connection {
            host: host.clone(),
            reason: "not connected".to_string(),
        })?;
        let read = stream
            .read_until(b'\n', &mut self.partial)
            .await
            .map_err(|e| SessionError::Connection {
                host: host.clone(),
                reason: e.to_string(),
            })?;
        if read == 0 && !self.partial.ends_with(b"\n") {
            return Err(SessionError::Connection {
                host,
                reason: "connection closed by server".to_string(),
            });
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Ok(line)
    }

    /// Not cancel-safe: a timeout leaves the stream mid-literal, so callers
    /// must tear the session down on error.
    async fn read_exact_timed(
        &mut self,
        operation: &'static str,
        len: usize,
    ) -> Result<Vec<u8>, SessionError> {
        let after = self.options.command_timeout;
        tokio::time::timeout(after, self.read_exact(len))
            .await
            .unwrap_or(Err(SessionError::Timeout { operation, after }))
    }

    async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, SessionError> {
        let host = self.host.clone();
        let stream = self.stream.as_mut().ok_or_else(|| SessionError::Connection {
            host: host.clone(),
            reason: "not connected".to_string(),
        })?;
        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| SessionError::Connection {
                host,
                reason: e.to_string(),
            })?;
        Ok(buf)
    }
}

/// Completed tagged command.
struct Reply {
    status: Status,
    text: String,
    untagged: Vec<String>,
}

/// Connect and immediately disconnect to check that a credential works.
pub async fn verify_credential<C>(
    connector: &C,
    credential: &MailboxCredential,
    options: SessionOptions,
) -> Result<(), SessionError>
where
    C: SessionConnector + ?Sized,
{
    let mut session = ImapSession::<C::Stream>::new(credential.address.clone(), options);
    session.connect(connector, credential).await?;
    session.disconnect().await;
    Ok(())
}

// ── Streaming fetch ─────────────────────────────────────────────────

enum FetchPhase {
    /// Between messages, waiting for the next `FETCH` response.
    Between,
    /// Inside a body literal.
    Body {
        attributes: MessageAttributes,
        remaining: usize,
    },
    /// Discarding a literal that can't be attributed to a uid.
    Skip { remaining: usize },
    /// Literal consumed, the closing `)` line still to read.
    Trailer { attributes: Option<MessageAttributes> },
    Done,
}

/// Pull-based cursor over one `UID FETCH` exchange.
///
/// Each message yields `Begin`, one or more `Chunk`s and `End`, or a single
/// `Failed`. `next` returns `None` once the server completes the command.
pub struct BodyFetch<'a, S> {
    session: &'a mut ImapSession<S>,
    tag: String,
    phase: FetchPhase,
}

impl<'a, S> BodyFetch<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(session: &'a mut ImapSession<S>, tag: String) -> Self {
        Self {
            session,
            tag,
            phase: FetchPhase::Between,
        }
    }

    fn finished(session: &'a mut ImapSession<S>) -> Self {
        Self {
            session,
            tag: String::new(),
            phase: FetchPhase::Done,
        }
    }

    /// Next event, or `None` when every requested message has been answered.
    pub async fn next(&mut self) -> Result<Option<FetchEvent>, SessionError> {
        match self.advance().await {
            Ok(event) => Ok(event),
            Err(e) => {
                self.phase = FetchPhase::Done;
                Err(self.session.fail(e))
            }
        }
    }

    async fn advance(&mut self) -> Result<Option<FetchEvent>, SessionError> {
        let chunk_size = self.session.options.chunk_size.max(1);
        loop {
            match std::mem::replace(&mut self.phase, FetchPhase::Done) {
                FetchPhase::Done => return Ok(None),

                FetchPhase::Body {
                    attributes,
                    remaining: 0,
                } => {
                    self.phase = FetchPhase::Trailer {
                        attributes: Some(attributes),
                    };
                }
                FetchPhase::Body {
                    attributes,
                    remaining,
                } => {
                    let take = remaining.min(chunk_size);
                    let chunk = self.session.read_exact_timed("UID FETCH", take).await?;
                    self.phase = FetchPhase::Body {
                        attributes,
                        remaining: remaining - take,
                    };
                    return Ok(Some(FetchEvent::Chunk(chunk)));
                }

                FetchPhase::Skip { remaining } => {
                    let take = remaining.min(chunk_size);
                    self.session.read_exact_timed("UID FETCH", take).await?;
                    self.phase = if remaining == take {
                        FetchPhase::Trailer { attributes: None }
                    } else {
                        FetchPhase::Skip {
                            remaining: remaining - take,
                        }
                    };
                }

                FetchPhase::Trailer { attributes } => {
                    let _ = self.session.read_line_timed("UID FETCH").await?;
                    self.phase = FetchPhase::Between;
                    if let Some(attributes) = attributes {
                        return Ok(Some(FetchEvent::End {
                            uid: attributes.uid,
                        }));
                    }
                }

                FetchPhase::Between => {
                    let line = self.session.read_line_timed("UID FETCH").await?;
                    self.phase = FetchPhase::Between;
                    if let Some(event) = self.on_line(&line)? {
                        return Ok(Some(event));
                    }
                    if matches!(self.phase, FetchPhase::Done) {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn on_line(&mut self, line: &str) -> Result<Option<FetchEvent>, SessionError> {
        let session = &mut *self.session;
        match codec::parse_response(line) {
            Some(Response::Tagged { tag, status, text }) if tag == self.tag => {
                self.phase = FetchPhase::Done;
                session.set_state(SessionState::MailboxOpen);
                if status == Status::Ok {
                    Ok(None)
                } else {
                    Err(SessionError::Protocol {
                        command: "UID FETCH".to_string(),
                        response: text,
                    })
                }
            }
            Some(Response::Untagged(rest)) => {
                let Some(header) = codec::parse_fetch_header(&rest) else {
                    if codec::is_bye(&rest) {
                        return Err(session.connection_error(rest.trim_end().to_string()));
                    }
                    return Ok(None);
                };

                match (header.uid, header.literal) {
                    (Some(uid), Some(size)) => {
                        let attributes = MessageAttributes {
                            seq: header.seq,
                            uid,
                            seen: header.seen,
                        };
                        self.phase = FetchPhase::Body {
                            attributes,
                            remaining: size,
                        };
                        Ok(Some(FetchEvent::Begin(attributes)))
                    }
                    (uid, Some(size)) => {
                        session.fetch_errors += 1;
                        warn!(mailbox = %session.address, seq = header.seq, "FETCH body without UID, skipping");
                        self.phase = FetchPhase::Skip { remaining: size };
                        Ok(Some(FetchEvent::Failed {
                            seq: header.seq,
                            uid,
                            reason: "response carried no UID".to_string(),
                        }))
                    }
                    (uid, None) if header.has_body => {
                        session.fetch_errors += 1;
                        warn!(mailbox = %session.address, seq = header.seq, ?uid, "FETCH body missing");
                        Ok(Some(FetchEvent::Failed {
                            seq: header.seq,
                            uid,
                            reason: format!("malformed FETCH response: {}", rest.trim_end()),
                        }))
                    }
                    // Flag-only update for a message we aren't fetching.
                    (_, None) => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// Drain the remaining events, discarding them.
    pub async fn drain(&mut self) -> Result<(), SessionError> {
        while self.next().await?.is_some() {}
        Ok(())
    }
}
