//! In-memory account store, for embedding the relay and for tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::traits::{AccountStore, MailboxAccount};

/// Account store holding a replaceable snapshot in memory.
#[derive(Default, Clone)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<Vec<MailboxAccount>>>,
}

impl InMemoryAccountStore {
    pub fn new(accounts: Vec<MailboxAccount>) -> Self {
        Self {
            accounts: Arc::new(RwLock::new(accounts)),
        }
    }

    /// Swap in a new snapshot; takes effect on the next cycle.
    pub async fn replace(&self, accounts: Vec<MailboxAccount>) {
        *self.accounts.write().await = accounts;
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn list_mailboxes_with_subscribers(&self) -> Result<Vec<MailboxAccount>, StoreError> {
        Ok(self.accounts.read().await.clone())
    }
}
