//! Background drivers: the cron-scheduled run loop and live mailbox watchers.
//!
//! Both stop when the shared shutdown flag flips to `true`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coordinator::RunCoordinator;
use crate::dispatch::Dispatcher;
use crate::imap::SessionConnector;
use crate::scan::{MailboxScanner, ScanSignal};
use crate::store::MailboxAccount;

const WATCH_SIGNAL_CAPACITY: usize = 16;

/// Shutdown flag shared by every background task.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once `shutdown` is set or its sender is dropped.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Run `run_once` at every upcoming time of `schedule`.
pub fn spawn_run_loop<C>(
    coordinator: Arc<RunCoordinator<C>>,
    schedule: cron::Schedule,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    C: SessionConnector + 'static,
{
    tokio::spawn(async move {
        info!(%schedule, "Run loop started");

        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Schedule has no upcoming runs, stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "Next run scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Run loop shutting down");
                    return;
                }
            }

            match coordinator.run_once().await {
                Ok(report) => debug!(run_id = %report.run_id, "Scheduled run done"),
                // Logged by the coordinator; the next tick tries again.
                Err(e) => error!(error = %e, "Scheduled run failed"),
            }
        }
    })
}

/// One long-lived watcher per mailbox with subscribers.
///
/// Records flow from the watcher through a channel to the dispatcher. A
/// watcher that fails reconnects after `retry_delay`, except on rejected
/// credentials.
pub fn spawn_watchers<C>(
    accounts: Vec<MailboxAccount>,
    scanner: Arc<MailboxScanner<C>>,
    dispatcher: Dispatcher,
    retry_delay: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>>
where
    C: SessionConnector + 'static,
{
    accounts
        .into_iter()
        .filter(|account| {
            if !account.has_subscribers() {
                info!(mailbox = %account.credential.address, "No subscribers, not watching");
            }
            account.has_subscribers()
        })
        .map(|account| {
            let scanner = Arc::clone(&scanner);
            let dispatcher = dispatcher.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(watch_mailbox(account, scanner, dispatcher, retry_delay, shutdown))
        })
        .collect()
}

async fn watch_mailbox<C>(
    account: MailboxAccount,
    scanner: Arc<MailboxScanner<C>>,
    dispatcher: Dispatcher,
    retry_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    C: SessionConnector + 'static,
{
    let address = account.credential.address.clone();
    loop {
        let (tx, rx) = mpsc::channel(WATCH_SIGNAL_CAPACITY);
        let (result, ()) = tokio::join!(
            scanner.watch(&account, tx, shutdown.clone()),
            forward_signals(rx, &dispatcher, &account),
        );

        if *shutdown.borrow() {
            return;
        }
        match result {
            Ok(()) => return,
            Err(e) if e.is_auth() => {
                error!(mailbox = %address, error = %e, "Credentials rejected, watcher stopped");
                return;
            }
            Err(e) => {
                warn!(mailbox = %address, error = %e, retry_in = ?retry_delay, "Watcher failed, reconnecting");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {}
            _ = wait_for_shutdown(&mut shutdown) => return,
        }
    }
}

async fn forward_signals(
    mut rx: mpsc::Receiver<ScanSignal>,
    dispatcher: &Dispatcher,
    account: &MailboxAccount,
) {
    while let Some(signal) = rx.recv().await {
        let records = match signal {
            ScanSignal::ScanComplete(report) => report.records,
            ScanSignal::Records(records) => records,
            ScanSignal::Error(e) => {
                debug!(mailbox = %account.credential.address, error = %e, "Watcher reported error");
                continue;
            }
        };
        dispatcher.dispatch(&records, &account.endpoints).await;
    }
}
