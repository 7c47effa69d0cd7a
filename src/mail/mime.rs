//! MIME decoding: raw RFC 822 bytes into a `ParsedEmail`.

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Protocol-level attributes of a fetched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageAttributes {
    /// Message sequence number in the selected mailbox.
    pub seq: u32,
    /// Unique id, stable across sessions for the same UIDVALIDITY.
    pub uid: u32,
    /// Whether the server reported `\Seen` at fetch time.
    pub seen: bool,
}

/// One fetched message, alive only between fetch and decode.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub attributes: MessageAttributes,
    pub bytes: Vec<u8>,
}

/// Headers and bodies of a decoded email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedEmail {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    /// Plain-text body, if the message has one.
    pub text: Option<String>,
    /// HTML body, if the message has one.
    pub html: Option<String>,
}

/// Turns raw bytes into a `ParsedEmail`.
pub trait MimeDecoder: Send + Sync {
    fn decode(&self, raw: &RawMessage) -> Result<ParsedEmail, DecodeError>;
}

/// Default decoder on top of `mail-parser`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MailParserDecoder;

impl MimeDecoder for MailParserDecoder {
    fn decode(&self, raw: &RawMessage) -> Result<ParsedEmail, DecodeError> {
        let uid = raw.attributes.uid;
        if raw.bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DecodeError::Empty { uid });
        }

        let parsed = MessageParser::default()
            .parse(&raw.bytes)
            .ok_or_else(|| DecodeError::Malformed {
                uid,
                reason: "no parsable headers".into(),
            })?;

        let date = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));

        Ok(ParsedEmail {
            from: format_addresses(parsed.from()),
            to: format_addresses(parsed.to()),
            subject: parsed.subject().map(str::to_string),
            date,
            message_id: parsed.message_id().map(str::to_string),
            text: parsed.body_text(0).map(|t| t.into_owned()),
            html: html_part(&parsed),
        })
    }
}

/// First genuine `text/html` part. `body_html` would synthesize HTML from
/// plain text, which duplicates the body for text-only messages.
fn html_part(parsed: &mail_parser::Message) -> Option<String> {
    parsed
        .parts
        .iter()
        .filter(|part| part.is_text_html())
        .find_map(|part| part.text_contents())
        .map(str::to_string)
}

/// Render an address header as `Name <addr>, addr2`.
fn format_addresses(addr: Option<&mail_parser::Address>) -> Option<String> {
    let addr = addr?;
    let rendered: Vec<String> = match addr {
        mail_parser::Address::List(addrs) => addrs.iter().filter_map(format_addr).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(format_addr))
            .collect(),
    };
    if rendered.is_empty() {
        None
    } else {
        Some(rendered.join(", "))
    }
}

fn format_addr(addr: &mail_parser::Addr) -> Option<String> {
    let address = addr.address.as_deref()?;
    Some(match addr.name.as_deref() {
        Some(name) if !name.is_empty() => format!("{name} <{address}>"),
        _ => address.to_string(),
    })
}
