use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use applicant_relay::config::{RelayConfig, RunMode};
use applicant_relay::coordinator::RunCoordinator;
use applicant_relay::dispatch::{DispatchOptions, Dispatcher};
use applicant_relay::imap::TlsSessionConnector;
use applicant_relay::mail::MailParserDecoder;
use applicant_relay::scan::{MailboxScanner, ScanOptions};
use applicant_relay::schedule::{self, shutdown_channel};
use applicant_relay::store::{AccountStore, JsonAccountStore};
use applicant_relay::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = RelayConfig::from_env().context("Invalid relay configuration")?;
    let _telemetry = telemetry::init("info", config.log_dir.as_deref())?;

    eprintln!("📬 Applicant Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Accounts: {}", config.accounts_path.display());
    eprintln!("   Mailbox: {}", config.mailbox);
    eprintln!(
        "   Sender filter: {}",
        config.sender_filter.as_deref().unwrap_or("(any sender)")
    );
    eprintln!("   Mode: {}", config.mode);
    if config.mode == RunMode::Schedule {
        eprintln!("   Schedule: {}", config.schedule);
    }
    eprintln!();

    let store: Arc<dyn AccountStore> = Arc::new(JsonAccountStore::new(&config.accounts_path));
    let connector = Arc::new(TlsSessionConnector::new(config.command_timeout));
    let scanner = Arc::new(MailboxScanner::new(
        connector,
        Arc::new(MailParserDecoder),
        ScanOptions::from(&config),
    ));
    let dispatcher = Dispatcher::new(DispatchOptions::from(&config));
    let coordinator = Arc::new(RunCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&scanner),
        dispatcher.clone(),
        config.max_concurrent_mailboxes,
    ));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    match config.mode {
        RunMode::Once => {
            let report = coordinator.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.failed() > 0 {
                error!(failed = report.failed(), "Some mailboxes failed");
            }
        }
        RunMode::Schedule => {
            let handle = schedule::spawn_run_loop(
                Arc::clone(&coordinator),
                config.cron_schedule()?,
                shutdown_rx,
            );
            tokio::signal::ctrl_c().await?;
            info!("Ctrl-C received, stopping");
            let _ = shutdown_tx.send(true);
            handle.await?;
        }
        RunMode::Watch => {
            let accounts = store.list_mailboxes_with_subscribers().await?;
            let handles = schedule::spawn_watchers(
                accounts,
                scanner,
                dispatcher,
                config.watch_retry_delay,
                shutdown_rx,
            );
            info!(watchers = handles.len(), "Watching mailboxes");
            tokio::signal::ctrl_c().await?;
            info!("Ctrl-C received, stopping watchers");
            let _ = shutdown_tx.send(true);
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Watcher task panicked");
                }
            }
        }
    }

    Ok(())
}
