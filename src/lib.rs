//! Applicant relay: watches mailboxes for job-application notices and
//! forwards each applicant to the mailbox owner's webhooks.

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod imap;
pub mod mail;
pub mod scan;
pub mod schedule;
pub mod store;
pub mod telemetry;
