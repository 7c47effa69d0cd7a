//! `AccountStore`: the read-only boundary to wherever mailboxes and
//! their webhook subscriptions live.
//!
//! Registration, credential storage and webhook CRUD happen elsewhere; the
//! relay only ever reads one snapshot per cycle.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Credentials for one monitored mailbox.
///
/// The secret stays wrapped; its `Debug` output is redacted so it can't leak
/// through logs or reports.
#[derive(Debug, Clone)]
pub struct MailboxCredential {
    pub address: String,
    pub secret: SecretString,
    pub host: String,
    pub port: u16,
}

impl MailboxCredential {
    pub fn new(
        address: impl Into<String>,
        secret: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            address: address.into(),
            secret: SecretString::from(secret.into()),
            host: host.into(),
            port,
        }
    }
}

/// A webhook registered by a mailbox owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberEndpoint {
    /// Id of the mailbox that owns this subscription.
    pub mailbox_id: String,
    /// Human-readable name given at registration.
    pub name: String,
    /// Target URL receiving `POST`ed applicant records.
    pub url: String,
}

/// One mailbox together with every endpoint subscribed to it.
#[derive(Debug, Clone)]
pub struct MailboxAccount {
    pub id: String,
    pub credential: MailboxCredential,
    pub endpoints: Vec<SubscriberEndpoint>,
}

impl MailboxAccount {
    pub fn has_subscribers(&self) -> bool {
        !self.endpoints.is_empty()
    }
}

/// Backend-agnostic source of mailboxes and subscriptions.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Every known mailbox with its endpoints (possibly none).
    async fn list_mailboxes_with_subscribers(&self) -> Result<Vec<MailboxAccount>, StoreError>;
}
