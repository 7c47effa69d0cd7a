//! IMAP protocol session: framing, state machine and transports.

pub mod codec;
pub mod session;
pub mod state;
pub mod transport;

pub use session::{
    BodyFetch, FetchEvent, IdleOutcome, ImapSession, SessionOptions, verify_credential,
};
pub use state::{SessionEvent, SessionState};
pub use transport::{SessionConnector, TlsSessionConnector};
