//! Line-level IMAP response parsing and command argument encoding.
//!
//! Only the handful of responses the relay needs are understood: tagged
//! completions, `SEARCH`, `EXISTS`, `FETCH` headers and literal markers.
//! Everything else is passed through as an opaque untagged line.

/// Completion status of a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// One server response line with its trailing CRLF removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `A3 OK SEARCH completed`
    Tagged {
        tag: String,
        status: Status,
        text: String,
    },
    /// `* 4 EXISTS`, stored without the leading `* `.
    Untagged(String),
    /// `+ idling`
    Continuation(String),
}

/// Parse one response line. `None` for lines that aren't valid IMAP.
pub fn parse_response(line: &str) -> Option<Response> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(rest) = line.strip_prefix("* ") {
        return Some(Response::Untagged(rest.to_string()));
    }
    if line == "+" {
        return Some(Response::Continuation(String::new()));
    }
    if let Some(rest) = line.strip_prefix("+ ") {
        return Some(Response::Continuation(rest.to_string()));
    }

    let (tag, rest) = line.split_once(' ')?;
    let (status, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match status.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        _ => return None,
    };
    Some(Response::Tagged {
        tag: tag.to_string(),
        status,
        text: text.to_string(),
    })
}

/// Server greeting kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greeting {
    Ok,
    PreAuth,
    Bye,
}

/// Classify the untagged greeting line.
pub fn parse_greeting(line: &str) -> Option<Greeting> {
    let Some(Response::Untagged(rest)) = parse_response(line) else {
        return None;
    };
    let word = rest.split_whitespace().next()?.to_ascii_uppercase();
    match word.as_str() {
        "OK" => Some(Greeting::Ok),
        "PREAUTH" => Some(Greeting::PreAuth),
        "BYE" => Some(Greeting::Bye),
        _ => None,
    }
}

/// Numbers from an untagged `SEARCH 3 7 12` response.
pub fn parse_search(untagged: &str) -> Option<Vec<u32>> {
    let mut parts = untagged.split_whitespace();
    if !parts.next()?.eq_ignore_ascii_case("SEARCH") {
        return None;
    }
    Some(parts.filter_map(|p| p.parse().ok()).collect())
}

/// Count from an untagged `12 EXISTS` response.
pub fn parse_exists(untagged: &str) -> Option<u32> {
    let mut parts = untagged.split_whitespace();
    let count = parts.next()?.parse().ok()?;
    let keyword = parts.next()?;
    keyword.eq_ignore_ascii_case("EXISTS").then_some(count)
}

/// `n EXPUNGE`: message `n` was removed.
pub fn parse_expunge(untagged: &str) -> Option<u32> {
    let mut parts = untagged.split_whitespace();
    let seq = parts.next()?.parse().ok()?;
    let keyword = parts.next()?;
    keyword.eq_ignore_ascii_case("EXPUNGE").then_some(seq)
}

/// Untagged `BYE`, sent when the server is about to close the connection.
pub fn is_bye(untagged: &str) -> bool {
    untagged
        .split_whitespace()
        .next()
        .is_some_and(|w| w.eq_ignore_ascii_case("BYE"))
}

/// Byte count of a literal announced at the end of a line, e.g. `{1234}`.
pub fn parse_literal_size(line: &str) -> Option<usize> {
    let line = line.trim_end_matches(['\r', '\n']);
    let open = line.strip_suffix('}')?.rfind('{')?;
    line[open + 1..line.len() - 1].parse().ok()
}

/// The part of a `FETCH` response that precedes the body literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchHeader {
    pub seq: u32,
    pub uid: Option<u32>,
    pub seen: bool,
    /// Size of the `BODY[]` literal that follows, if any.
    pub literal: Option<usize>,
    /// Whether the response mentions a body section at all.
    pub has_body: bool,
}

/// Parse an untagged `12 FETCH (UID 44 FLAGS (\Seen) BODY[] {1234}` line.
pub fn parse_fetch_header(untagged: &str) -> Option<FetchHeader> {
    let untagged = untagged.trim_end_matches(['\r', '\n']);
    let (seq, rest) = untagged.split_once(' ')?;
    let seq = seq.parse().ok()?;
    let rest = rest.trim_start();
    if !rest.get(..5)?.eq_ignore_ascii_case("FETCH") {
        return None;
    }
    let upper = rest.to_ascii_uppercase();

    Some(FetchHeader {
        seq,
        uid: parse_uid_item(&upper),
        seen: parse_flags(&upper).is_some_and(|flags| flags.contains("\\SEEN")),
        literal: parse_literal_size(untagged),
        has_body: upper.contains("BODY["),
    })
}

/// `UID n` anywhere in a fetch item list (also used on trailer lines).
pub fn parse_uid_item(items: &str) -> Option<u32> {
    let upper = items.to_ascii_uppercase();
    let mut words = upper.split(|c: char| c.is_whitespace() || c == '(' || c == ')');
    while let Some(word) = words.next() {
        if word == "UID" {
            return words.find(|w| !w.is_empty())?.parse().ok();
        }
    }
    None
}

fn parse_flags(upper: &str) -> Option<&str> {
    let start = upper.find("FLAGS (")? + "FLAGS (".len();
    let end = upper[start..].find(')')? + start;
    Some(&upper[start..end])
}

/// Encode a string as an IMAP quoted string.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Compact a uid list into an IMAP sequence set, e.g. `1:3,7,9:10`.
///
/// Input need not be sorted; duplicates are dropped.
pub fn uid_set(uids: &[u32]) -> String {
    let mut sorted = uids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for uid in sorted {
        match ranges.last_mut() {
            Some((_, end)) if uid == *end + 1 => *end = uid,
            _ => ranges.push((uid, uid)),
        }
    }

    ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}:{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
