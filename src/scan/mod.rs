//! Session orchestrator: drives one mailbox's session through a historical
//! pass and, in watch mode, through live passes triggered by push notices.

pub mod batch;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{Instrument, debug, info, info_span, warn};

pub use batch::{Batch, ScanReport};

use crate::config::RelayConfig;
use crate::error::SessionError;
use crate::extract::ApplicantRecord;
use crate::imap::{IdleOutcome, ImapSession, SessionConnector, SessionOptions};
use crate::mail::MimeDecoder;
use crate::schedule::wait_for_shutdown;
use crate::store::MailboxAccount;

/// What a watcher reports to its sink.
#[derive(Debug, Clone)]
pub enum ScanSignal {
    /// The historical pass finished; every requested message has reported.
    ScanComplete(ScanReport),
    /// Applicants found by a live pass.
    Records(Vec<ApplicantRecord>),
    /// The session failed; the watcher is about to stop.
    Error(SessionError),
}

/// Per-mailbox scanning parameters.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub mailbox: String,
    pub sender_filter: Option<String>,
    /// Guard over connect + historical pass.
    pub scan_timeout: Duration,
    pub session: SessionOptions,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mailbox: "INBOX".to_string(),
            sender_filter: None,
            scan_timeout: Duration::from_secs(300),
            session: SessionOptions::default(),
        }
    }
}

impl From<&RelayConfig> for ScanOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            mailbox: config.mailbox.clone(),
            sender_filter: config.sender_filter.clone(),
            scan_timeout: config.scan_timeout,
            session: SessionOptions {
                command_timeout: config.command_timeout,
                ..Default::default()
            },
        }
    }
}

/// Runs scans against mailboxes reachable through one connector.
pub struct MailboxScanner<C: SessionConnector> {
    connector: Arc<C>,
    decoder: Arc<dyn MimeDecoder>,
    options: ScanOptions,
}

impl<C: SessionConnector> MailboxScanner<C> {
    pub fn new(connector: Arc<C>, decoder: Arc<dyn MimeDecoder>, options: ScanOptions) -> Self {
        Self {
            connector,
            decoder,
            options,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// One historical pass over unseen mail, leaving flags untouched.
    ///
    /// The session is always torn down before returning. If the pass outlives
    /// `scan_timeout` the whole cycle fails; nothing partial is returned.
    pub async fn scan(&self, account: &MailboxAccount) -> Result<ScanReport, SessionError> {
        let address = account.credential.address.clone();
        let span = info_span!("scan", mailbox = %address);

        async {
            let mut session = ImapSession::new(address.clone(), self.options.session.clone());
            let after = self.options.scan_timeout;
            let mut high_water = 0;
            let pass = tokio::time::timeout(
                after,
                self.historical(&mut session, account, true, &mut high_water),
            )
            .await;

            let report = match pass {
                Ok(result) => {
                    session.disconnect().await;
                    result?
                }
                Err(_) => {
                    session.abort();
                    warn!(?after, "Historical scan timed out");
                    return Err(SessionError::Timeout {
                        operation: "historical scan",
                        after,
                    });
                }
            };

            info!(
                requested = report.requested,
                processed = report.processed,
                failed = report.failed,
                applicants = report.records.len(),
                "Historical scan complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Historical pass, then stay connected and run a live pass on every
    /// push notice until `shutdown` fires or the session fails.
    ///
    /// Live passes mark messages seen so each is reported once. Shutdown is
    /// honored at every stage, including mid-fetch. Returns `Ok` on shutdown
    /// or when the sink goes away.
    pub async fn watch(
        &self,
        account: &MailboxAccount,
        sink: mpsc::Sender<ScanSignal>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SessionError> {
        let address = account.credential.address.clone();
        let span = info_span!("watch", mailbox = %address);

        async {
            let mut session = ImapSession::new(address.clone(), self.options.session.clone());
            let result = self.watch_session(&mut session, account, &sink, &mut shutdown).await;
            match &result {
                Err(SessionError::Timeout { .. }) => session.abort(),
                _ => session.disconnect().await,
            }
            if let Err(e) = &result {
                let _ = sink.send(ScanSignal::Error(e.clone())).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn watch_session(
        &self,
        session: &mut ImapSession<C::Stream>,
        account: &MailboxAccount,
        sink: &mpsc::Sender<ScanSignal>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SessionError> {
        let after = self.options.scan_timeout;
        let mut high_water = 0;
        let historical = tokio::select! {
            pass = tokio::time::timeout(
                after,
                self.historical(session, account, false, &mut high_water),
            ) => Some(pass),
            _ = wait_for_shutdown(shutdown) => None,
        };
        let Some(historical) = historical else {
            info!("Shutdown during historical scan");
            session.abort();
            return Ok(());
        };
        let report = historical.map_err(|_| SessionError::Timeout {
            operation: "historical scan",
            after,
        })??;
        info!(
            requested = report.requested,
            processed = report.processed,
            failed = report.failed,
            applicants = report.records.len(),
            "Historical scan complete, watching for new mail"
        );
        if sink.send(ScanSignal::ScanComplete(report)).await.is_err() {
            return Ok(());
        }

        let mailbox = account.credential.address.clone();
        session.on_new_message_notice(move |count| {
            debug!(mailbox = %mailbox, count, "Push notice received");
        });

        loop {
            match session.idle(shutdown).await? {
                IdleOutcome::Cancelled => {
                    info!("Watcher shutting down");
                    return Ok(());
                }
                IdleOutcome::Renew => continue,
                IdleOutcome::NewMail(_) => {}
            }

            // A pass abandoned mid-FETCH leaves the stream unusable, hence abort.
            let live = tokio::select! {
                pass = self.pass(session, true, &mut high_water) => Some(pass),
                _ = wait_for_shutdown(shutdown) => None,
            };
            let Some(live) = live else {
                info!("Watcher shutting down during live pass");
                session.abort();
                return Ok(());
            };

            match live {
                Ok(report) if report.records.is_empty() => {
                    debug!(requested = report.requested, "Live pass found no applicants");
                }
                Ok(report) => {
                    info!(applicants = report.records.len(), "New applicants received");
                    if sink.send(ScanSignal::Records(report.records)).await.is_err() {
                        return Ok(());
                    }
                }
                // A rejected SEARCH or FETCH leaves the session usable.
                Err(e @ SessionError::Protocol { .. }) => {
                    warn!(error = %e, "Live pass rejected by server");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn historical(
        &self,
        session: &mut ImapSession<C::Stream>,
        account: &MailboxAccount,
        read_only: bool,
        high_water: &mut u32,
    ) -> Result<ScanReport, SessionError> {
        session
            .connect(self.connector.as_ref(), &account.credential)
            .await?;
        session.open_mailbox(&self.options.mailbox, read_only).await?;
        self.pass(session, false, high_water).await
    }

    /// Search unseen mail above `high_water` and stream every match through
    /// a fresh batch. Raises `high_water` to the largest uid requested.
    /// Anything at or below the floor was already reported by this session.
    async fn pass(
        &self,
        session: &mut ImapSession<C::Stream>,
        mark_seen: bool,
        high_water: &mut u32,
    ) -> Result<ScanReport, SessionError> {
        let mut uids = session
            .search_unseen_from(self.options.sender_filter.as_deref())
            .await?;
        uids.retain(|&uid| uid > *high_water);
        if let Some(&max) = uids.iter().max() {
            *high_water = max;
        }
        let mut batch = Batch::new(session.address(), &uids, Arc::clone(&self.decoder));
        if uids.is_empty() {
            return Ok(batch.settle().await);
        }

        debug!(count = uids.len(), mark_seen, "Fetching unseen messages");
        let mut fetch = session.fetch_bodies(&uids, mark_seen).await?;
        while let Some(event) = fetch.next().await? {
            batch.on_event(event);
        }
        Ok(batch.settle().await)
    }
}
