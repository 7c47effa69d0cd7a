//! Where mailboxes and their webhook subscriptions come from.

pub mod json;
pub mod memory;
pub mod providers;
pub mod traits;

pub use json::JsonAccountStore;
pub use memory::InMemoryAccountStore;
pub use traits::{AccountStore, MailboxAccount, MailboxCredential, SubscriberEndpoint};
