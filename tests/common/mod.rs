//! Shared fixtures: an in-memory IMAP server and stub webhook receivers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;

use applicant_relay::error::{DecodeError, SessionError};
use applicant_relay::imap::SessionConnector;
use applicant_relay::mail::{MailParserDecoder, MimeDecoder, ParsedEmail, RawMessage};
use applicant_relay::store::{MailboxAccount, MailboxCredential, SubscriberEndpoint};

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const PASSWORD: &str = "app-password";

/// A job-board notification for applicant `n`.
pub fn application_email(n: u32) -> Vec<u8> {
    format!(
        "From: Careers <noreply@jobs.example>\r\n\
Subject: New Job Application Received - Applicant {n}\r\n\
Date: Tue, 14 Oct 2025 09:30:00 +0000\r\n\
Message-ID: <app-{n}@jobs.example>\r\n\
\r\n\
A new job application has been submitted.\r\n\
\r\n\
**Name:** Applicant {n} **Email:** applicant{n}@example.com **Phone Number:** 555-010-{n:04}\r\n"
    )
    .into_bytes()
}

/// Contents of a fake mailbox.
#[derive(Debug, Clone, Default)]
pub struct FakeMailbox {
    /// Unseen messages present at login.
    pub messages: Vec<(u32, Vec<u8>)>,
    /// Messages that arrive during the first IDLE.
    pub live: Vec<(u32, Vec<u8>)>,
    /// Never answer `UID SEARCH`.
    pub stall_search: bool,
    /// Start a `UID FETCH ... BODY[]` literal and never finish it.
    pub stall_live_fetch: bool,
}

impl FakeMailbox {
    pub fn with_applications(count: u32) -> Self {
        Self {
            messages: (1..=count).map(|n| (n, application_email(n))).collect(),
            ..Default::default()
        }
    }
}

/// Connector that answers every `open` with a scripted IMAP server.
pub struct FakeImap {
    mailbox: FakeMailbox,
    opens: AtomicUsize,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeImap {
    pub fn new(mailbox: FakeMailbox) -> Arc<Self> {
        Arc::new(Self {
            mailbox,
            opens: AtomicUsize::new(0),
            commands: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// How many sessions were opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every command received, without tags. LOGIN arguments are kept.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionConnector for FakeImap {
    type Stream = DuplexStream;

    async fn open(&self, _host: &str, _port: u16) -> Result<DuplexStream, SessionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(1 << 16);
        tokio::spawn(serve(server, self.mailbox.clone(), Arc::clone(&self.commands)));
        Ok(client)
    }
}

async fn serve(stream: DuplexStream, mailbox: FakeMailbox, log: Arc<Mutex<Vec<String>>>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    let mut unseen = mailbox.messages.clone();
    let mut live = mailbox.live.clone();

    if write.write_all(b"* OK fake IMAP ready\r\n").await.is_err() {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let (tag, command) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let tag = tag.to_string();
        let upper = command.to_ascii_uppercase();
        log.lock().unwrap().push(command.to_string());

        let reply = if upper.starts_with("LOGIN") {
            if command.contains(&format!("\"{PASSWORD}\"")) {
                format!("{tag} OK LOGIN completed\r\n")
            } else {
                format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            }
        } else if upper.starts_with("SELECT") || upper.starts_with("EXAMINE") {
            format!("* {} EXISTS\r\n{tag} OK completed\r\n", unseen.len())
        } else if upper.starts_with("UID SEARCH") {
            if mailbox.stall_search {
                continue;
            }
            let uids: Vec<String> = unseen.iter().map(|(uid, _)| uid.to_string()).collect();
            format!("* SEARCH {}\r\n{tag} OK SEARCH completed\r\n", uids.join(" "))
        } else if upper.starts_with("UID FETCH") {
            let set = command.split_whitespace().nth(2).unwrap_or("");
            let wanted = parse_set(set);
            let mark_seen = !upper.contains("BODY.PEEK[]");
            if mark_seen && mailbox.stall_live_fetch {
                let partial = format!("* 1 FETCH (UID {set} FLAGS () BODY[] {{100}}\r\nFrom: ");
                if write.write_all(partial.as_bytes()).await.is_err() {
                    return;
                }
                continue;
            }
            let mut out = Vec::new();
            for (seq, (uid, body)) in unseen.iter().enumerate() {
                if !wanted.contains(uid) {
                    continue;
                }
                out.extend_from_slice(
                    format!(
                        "* {} FETCH (UID {uid} FLAGS () BODY[] {{{}}}\r\n",
                        seq + 1,
                        body.len()
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(body);
                out.extend_from_slice(b")\r\n");
            }
            if mark_seen {
                unseen.retain(|(uid, _)| !wanted.contains(uid));
            }
            out.extend_from_slice(format!("{tag} OK FETCH completed\r\n").as_bytes());
            if write.write_all(&out).await.is_err() {
                return;
            }
            continue;
        } else if upper.starts_with("IDLE") {
            if write.write_all(b"+ idling\r\n").await.is_err() {
                return;
            }
            if !live.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
                unseen.append(&mut live);
                let notice = format!("* {} EXISTS\r\n", unseen.len());
                if write.write_all(notice.as_bytes()).await.is_err() {
                    return;
                }
            }
            match lines.next_line().await {
                Ok(Some(done)) if done.eq_ignore_ascii_case("DONE") => {
                    format!("{tag} OK IDLE terminated\r\n")
                }
                _ => return,
            }
        } else if upper.starts_with("LOGOUT") {
            let _ = write
                .write_all(format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n").as_bytes())
                .await;
            return;
        } else {
            format!("{tag} BAD unknown command\r\n")
        };

        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn parse_set(set: &str) -> Vec<u32> {
    set.split(',')
        .flat_map(|part| match part.split_once(':') {
            Some((start, end)) => {
                let start: u32 = start.parse().unwrap_or(0);
                let end: u32 = end.parse().unwrap_or(0);
                (start..=end).collect::<Vec<_>>()
            }
            None => part.parse().ok().into_iter().collect(),
        })
        .collect()
}

/// Decodes with mail-parser, except one uid which always fails.
pub struct FailingDecoder {
    pub fail_uid: u32,
}

impl MimeDecoder for FailingDecoder {
    fn decode(&self, raw: &RawMessage) -> Result<ParsedEmail, DecodeError> {
        if raw.attributes.uid == self.fail_uid {
            return Err(DecodeError::Malformed {
                uid: self.fail_uid,
                reason: "corrupt MIME structure".into(),
            });
        }
        MailParserDecoder.decode(raw)
    }
}

pub fn account(id: &str, password: &str, endpoints: Vec<SubscriberEndpoint>) -> MailboxAccount {
    MailboxAccount {
        id: id.to_string(),
        credential: MailboxCredential::new(
            format!("{id}@example.com"),
            password,
            "imap.example.com",
            993,
        ),
        endpoints,
    }
}

pub fn endpoint(mailbox_id: &str, name: &str, url: String) -> SubscriberEndpoint {
    SubscriberEndpoint {
        mailbox_id: mailbox_id.to_string(),
        name: name.to_string(),
        url,
    }
}

// ── Webhook receivers ───────────────────────────────────────────────

/// Bodies received by a stub webhook server, keyed by hook id.
pub type Received = Arc<Mutex<Vec<(String, Value)>>>;

/// How stub hooks behave, by hook id.
#[derive(Debug, Clone, Default)]
pub struct HookBehavior {
    /// Answer 500.
    pub failing: Vec<String>,
    /// Sleep `delay` before answering.
    pub slow: Vec<String>,
    pub delay: Duration,
}

/// A running stub webhook server.
pub struct Hooks {
    pub base: String,
    pub received: Received,
    /// Most requests ever handled at the same time.
    pub peak_in_flight: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct HookState {
    received: Received,
    behavior: Arc<HookBehavior>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Decrements the in-flight count even if the handler is dropped mid-sleep.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn receive(
    State(state): State<HookState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    let _guard = InFlight(Arc::clone(&state.in_flight));
    state.peak.fetch_max(now, Ordering::SeqCst);

    if state.behavior.slow.contains(&id) {
        tokio::time::sleep(state.behavior.delay).await;
    }
    if state.behavior.failing.contains(&id) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.received.lock().unwrap().push((id, body));
    StatusCode::OK
}

/// Start an Axum server on a random port. Hooks listed in `failing`
/// answer 500. Returns the base URL and the received bodies.
pub async fn start_webhooks(failing: &[&str]) -> (String, Received) {
    let hooks = start_webhooks_with(HookBehavior {
        failing: failing.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    })
    .await;
    (hooks.base, hooks.received)
}

pub async fn start_webhooks_with(behavior: HookBehavior) -> Hooks {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let peak = Arc::new(AtomicUsize::new(0));
    let state = HookState {
        received: Arc::clone(&received),
        behavior: Arc::new(behavior),
        in_flight: Arc::new(AtomicUsize::new(0)),
        peak: Arc::clone(&peak),
    };
    let app = Router::new()
        .route("/hook/{id}", post(receive))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Hooks {
        base: format!("http://127.0.0.1:{port}"),
        received,
        peak_in_flight: peak,
    }
}
