//! Message representations between the wire and the extractor.

pub mod mime;

pub use mime::{MailParserDecoder, MessageAttributes, MimeDecoder, ParsedEmail, RawMessage};
