//! Accumulation of one fetch pass: reassembles streamed bodies, hands them
//! to the blocking pool for decoding and counts every requested message
//! until each has reported in.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::extract::{self, ApplicantRecord};
use crate::imap::FetchEvent;
use crate::mail::{MimeDecoder, RawMessage};

/// Outcome of one search + fetch pass over a mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Uids returned by the unseen search.
    pub requested: usize,
    /// Messages decoded successfully, application or not.
    pub processed: usize,
    /// Messages that could not be fetched or decoded.
    pub failed: usize,
    /// Applicants extracted from the processed messages.
    pub records: Vec<ApplicantRecord>,
}

impl ScanReport {
    /// Every requested message has either been processed or failed.
    pub fn is_complete(&self) -> bool {
        self.processed + self.failed == self.requested
    }
}

type DecodeOutcome = (u32, Result<Option<ApplicantRecord>, DecodeError>);

/// In-progress pass. Owned by exactly one orchestrator.
pub struct Batch {
    mailbox: String,
    decoder: Arc<dyn MimeDecoder>,
    requested: HashSet<u32>,
    answered: HashSet<u32>,
    current: Option<RawMessage>,
    tasks: JoinSet<DecodeOutcome>,
    report: ScanReport,
}

impl Batch {
    pub fn new(mailbox: impl Into<String>, uids: &[u32], decoder: Arc<dyn MimeDecoder>) -> Self {
        let requested: HashSet<u32> = uids.iter().copied().collect();
        Self {
            mailbox: mailbox.into(),
            decoder,
            report: ScanReport {
                requested: requested.len(),
                ..Default::default()
            },
            requested,
            answered: HashSet::new(),
            current: None,
            tasks: JoinSet::new(),
        }
    }

    /// Feed one fetch event. Completed bodies start decoding immediately.
    pub fn on_event(&mut self, event: FetchEvent) {
        match event {
            FetchEvent::Begin(attributes) => {
                if let Some(unfinished) = self.current.take() {
                    self.fail(unfinished.attributes.uid, "body interrupted by next message");
                }
                if self.claim(attributes.uid) {
                    self.current = Some(RawMessage {
                        attributes,
                        bytes: Vec::new(),
                    });
                }
            }
            FetchEvent::Chunk(bytes) => {
                if let Some(current) = self.current.as_mut() {
                    current.bytes.extend_from_slice(&bytes);
                }
            }
            FetchEvent::End { uid } => match self.current.take() {
                Some(raw) if raw.attributes.uid == uid => self.spawn_decode(raw),
                Some(raw) => {
                    self.fail(raw.attributes.uid, "body ended with a different uid");
                }
                None => {}
            },
            FetchEvent::Failed { uid, reason, .. } => match uid {
                Some(uid) if self.claim(uid) => self.fail(uid, &reason),
                // Unattributed failures surface as missing uids on settle.
                _ => debug!(mailbox = %self.mailbox, %reason, "Unattributed fetch failure"),
            },
        }
    }

    /// Mark `uid` as answered. False for uids we never asked for or saw twice.
    fn claim(&mut self, uid: u32) -> bool {
        if !self.requested.contains(&uid) {
            warn!(mailbox = %self.mailbox, uid, "Server sent a message that wasn't requested");
            return false;
        }
        self.answered.insert(uid)
    }

    fn fail(&mut self, uid: u32, reason: &str) {
        warn!(mailbox = %self.mailbox, uid, reason, "Message failed");
        self.report.failed += 1;
    }

    fn spawn_decode(&mut self, raw: RawMessage) {
        let decoder = Arc::clone(&self.decoder);
        self.tasks.spawn_blocking(move || {
            let uid = raw.attributes.uid;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                decoder.decode(&raw).map(|email| extract::applicant_from_email(&email))
            }))
            .unwrap_or_else(|payload| {
                Err(DecodeError::Aborted {
                    uid,
                    reason: panic_message(payload.as_ref()),
                })
            });
            (uid, outcome)
        });
    }

    /// Wait for every decode to finish and account for uids the server
    /// never answered. The returned report is always complete.
    pub async fn settle(mut self) -> ScanReport {
        if let Some(unfinished) = self.current.take() {
            self.fail(unfinished.attributes.uid, "body never completed");
        }

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((uid, Ok(record))) => {
                    self.report.processed += 1;
                    match record {
                        Some(record) => {
                            debug!(mailbox = %self.mailbox, uid, applicant = %record.email, "Applicant extracted");
                            self.report.records.push(record);
                        }
                        None => debug!(mailbox = %self.mailbox, uid, "Not an application"),
                    }
                }
                Ok((uid, Err(e))) => self.fail(uid, &e.to_string()),
                // Panics are caught inside the task; this is cancellation.
                Err(e) => {
                    warn!(mailbox = %self.mailbox, error = %e, "Decode task did not finish");
                    self.report.failed += 1;
                }
            }
        }

        let mut missing: Vec<u32> = self.requested.difference(&self.answered).copied().collect();
        missing.sort_unstable();
        for uid in missing {
            self.fail(uid, "server returned no body");
        }

        debug_assert!(self.report.is_complete());
        self.report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "decoder panicked".to_string())
}
