//! File-backed account store.
//!
//! Reads a JSON snapshot of users and their webhooks on every call, so edits
//! to the file are picked up by the next cycle without a restart:
//!
//! ```json
//! {
//!   "mailboxes": [
//!     {
//!       "id": "u1",
//!       "email": "hr@gmail.com",
//!       "appPassword": "app-specific-password",
//!       "imapHost": null,
//!       "imapPort": null,
//!       "webhooks": [{ "name": "crm", "url": "https://crm.example.com/hook" }]
//!     }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::providers::resolve_endpoint;
use crate::store::traits::{AccountStore, MailboxAccount, MailboxCredential, SubscriberEndpoint};

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    mailboxes: Vec<MailboxEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailboxEntry {
    id: String,
    email: String,
    app_password: String,
    #[serde(default)]
    imap_host: Option<String>,
    #[serde(default)]
    imap_port: Option<u16>,
    #[serde(default)]
    webhooks: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    name: String,
    url: String,
}

/// Account store reading a JSON file.
pub struct JsonAccountStore {
    path: PathBuf,
}

impl JsonAccountStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AccountStore for JsonAccountStore {
    async fn list_mailboxes_with_subscribers(&self) -> Result<Vec<MailboxAccount>, StoreError> {
        let shown = self.path.display().to_string();
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Read {
                path: shown.clone(),
                source,
            })?;
        let file: AccountsFile = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: shown.clone(),
            source,
        })?;

        let accounts: Vec<MailboxAccount> = file
            .mailboxes
            .into_iter()
            .filter_map(into_account)
            .collect();
        debug!(path = %shown, count = accounts.len(), "Loaded mailbox accounts");
        Ok(accounts)
    }
}

/// Convert a file entry, skipping ones whose server can't be determined.
fn into_account(entry: MailboxEntry) -> Option<MailboxAccount> {
    let Some((host, port)) =
        resolve_endpoint(&entry.email, entry.imap_host.as_deref(), entry.imap_port)
    else {
        warn!(
            mailbox = %entry.email,
            "Skipping mailbox: no IMAP host configured and domain is not a known provider"
        );
        return None;
    };

    let endpoints = entry
        .webhooks
        .into_iter()
        .map(|w| SubscriberEndpoint {
            mailbox_id: entry.id.clone(),
            name: w.name,
            url: w.url,
        })
        .collect();

    Some(MailboxAccount {
        id: entry.id,
        credential: MailboxCredential::new(entry.email, entry.app_password, host, port),
        endpoints,
    })
}
