//! Run coordinator: one cycle over every mailbox that has subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::{SessionError, StoreError};
use crate::imap::SessionConnector;
use crate::scan::{MailboxScanner, ScanReport};
use crate::store::{AccountStore, MailboxAccount};

/// What happened to one mailbox during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MailboxStatus {
    /// No subscribers; the mailbox was never contacted.
    Skipped,
    Completed {
        scan: ScanReport,
        deliveries: Vec<DispatchOutcome>,
    },
    Failed {
        #[serde(serialize_with = "serialize_display")]
        error: SessionError,
        auth: bool,
    },
}

fn serialize_display<S: serde::Serializer>(
    error: &SessionError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Clone, Serialize)]
pub struct MailboxRun {
    pub mailbox_id: String,
    pub address: String,
    #[serde(flatten)]
    pub status: MailboxStatus,
}

/// Summary of one coordinator cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mailboxes: Vec<MailboxRun>,
}

impl RunReport {
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, MailboxStatus::Skipped))
    }

    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, MailboxStatus::Completed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, MailboxStatus::Failed { .. }))
    }

    pub fn applicants(&self) -> usize {
        self.mailboxes
            .iter()
            .map(|m| match &m.status {
                MailboxStatus::Completed { scan, .. } => scan.records.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn deliveries_failed(&self) -> usize {
        self.mailboxes
            .iter()
            .map(|m| match &m.status {
                MailboxStatus::Completed { deliveries, .. } => {
                    deliveries.iter().filter(|d| !d.success).count()
                }
                _ => 0,
            })
            .sum()
    }

    fn count(&self, pred: impl Fn(&MailboxStatus) -> bool) -> usize {
        self.mailboxes.iter().filter(|m| pred(&m.status)).count()
    }
}

/// Ties the account store, scanner and dispatcher together.
pub struct RunCoordinator<C: SessionConnector> {
    store: Arc<dyn AccountStore>,
    scanner: Arc<MailboxScanner<C>>,
    dispatcher: Dispatcher,
    max_concurrent_mailboxes: usize,
}

impl<C: SessionConnector> RunCoordinator<C> {
    pub fn new(
        store: Arc<dyn AccountStore>,
        scanner: Arc<MailboxScanner<C>>,
        dispatcher: Dispatcher,
        max_concurrent_mailboxes: usize,
    ) -> Self {
        Self {
            store,
            scanner,
            dispatcher,
            max_concurrent_mailboxes: max_concurrent_mailboxes.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn scanner(&self) -> &Arc<MailboxScanner<C>> {
        &self.scanner
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run one cycle. Only a store failure fails the run itself.
    pub async fn run_once(&self) -> Result<RunReport, StoreError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        async {
            let accounts = self.store.list_mailboxes_with_subscribers().await.map_err(|e| {
                error!(error = %e, "Failed to load mailboxes");
                e
            })?;
            info!(mailboxes = accounts.len(), "Run started");

            let runs: Vec<_> = accounts.iter().map(|account| self.run_mailbox(account)).collect();
            let mailboxes: Vec<MailboxRun> = stream::iter(runs)
                .buffer_unordered(self.max_concurrent_mailboxes)
                .collect()
                .await;

            let report = RunReport {
                run_id,
                started_at,
                finished_at: Utc::now(),
                mailboxes,
            };
            info!(
                completed = report.completed(),
                skipped = report.skipped(),
                failed = report.failed(),
                applicants = report.applicants(),
                deliveries_failed = report.deliveries_failed(),
                "Run finished"
            );
            Ok(report)
        }
        .instrument(info_span!("run", %run_id))
        .await
    }

    async fn run_mailbox(&self, account: &MailboxAccount) -> MailboxRun {
        let address = account.credential.address.clone();
        let status = if !account.has_subscribers() {
            info!(mailbox = %address, "No subscribers, skipping");
            MailboxStatus::Skipped
        } else {
            match self.scanner.scan(account).await {
                Ok(scan) => {
                    let deliveries = self.dispatcher.dispatch(&scan.records, &account.endpoints).await;
                    MailboxStatus::Completed { scan, deliveries }
                }
                Err(e) if e.is_auth() => {
                    error!(mailbox = %address, error = %e, "Credentials rejected, operator action needed");
                    MailboxStatus::Failed {
                        error: e,
                        auth: true,
                    }
                }
                Err(e) => {
                    warn!(mailbox = %address, error = %e, retryable = e.is_retryable(), "Mailbox scan failed");
                    MailboxStatus::Failed {
                        error: e,
                        auth: false,
                    }
                }
            }
        };

        MailboxRun {
            mailbox_id: account.id.clone(),
            address,
            status,
        }
    }
}
