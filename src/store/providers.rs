//! IMAP defaults for well-known mail providers, keyed by address domain.

/// Implicit-TLS IMAP port used by every provider below.
pub const IMAPS_PORT: u16 = 993;

const KNOWN_PROVIDERS: &[(&str, &str)] = &[
    ("gmail.com", "imap.gmail.com"),
    ("googlemail.com", "imap.gmail.com"),
    ("outlook.com", "outlook.office365.com"),
    ("hotmail.com", "outlook.office365.com"),
    ("live.com", "outlook.office365.com"),
    ("yahoo.com", "imap.mail.yahoo.com"),
    ("icloud.com", "imap.mail.me.com"),
    ("mac.com", "imap.mail.me.com"),
    ("aol.com", "imap.aol.com"),
    ("zoho.com", "imap.zoho.com"),
];

/// Look up `(host, port)` for the domain of `address`.
pub fn known_provider(address: &str) -> Option<(&'static str, u16)> {
    let domain = address.rsplit_once('@')?.1.trim().to_ascii_lowercase();
    KNOWN_PROVIDERS
        .iter()
        .find(|(d, _)| *d == domain)
        .map(|(_, host)| (*host, IMAPS_PORT))
}

/// Fill in whichever of host/port is missing.
///
/// Only applies provider defaults when at least one side is absent; an
/// explicit pair always wins. Returns `None` if nothing can be inferred.
pub fn resolve_endpoint(
    address: &str,
    host: Option<&str>,
    port: Option<u16>,
) -> Option<(String, u16)> {
    match (host.filter(|h| !h.trim().is_empty()), port) {
        (Some(h), Some(p)) => Some((h.trim().to_string(), p)),
        (host, port) => {
            let provider = known_provider(address);
            let host = host
                .map(|h| h.trim().to_string())
                .or_else(|| provider.map(|(h, _)| h.to_string()))?;
            let port = port
                .or_else(|| provider.map(|(_, p)| p))
                .unwrap_or(IMAPS_PORT);
            Some((host, port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gmail_resolves() {
        assert_eq!(known_provider("jobs@gmail.com"), Some(("imap.gmail.com", 993)));
    }

    #[test]
    fn domain_match_is_case_insensitive() {
        assert_eq!(
            known_provider("Recruiting@Outlook.COM"),
            Some(("outlook.office365.com", 993))
        );
    }

    #[test]
    fn unknown_domain_has_no_default() {
        assert_eq!(known_provider("hr@acme.io"), None);
        assert_eq!(known_provider("not-an-address"), None);
    }

    #[test]
    fn explicit_settings_win() {
        assert_eq!(
            resolve_endpoint("jobs@gmail.com", Some("mail.internal"), Some(1993)),
            Some(("mail.internal".to_string(), 1993))
        );
    }

    #[test]
    fn missing_port_falls_back_to_imaps() {
        assert_eq!(
            resolve_endpoint("hr@acme.io", Some("imap.acme.io"), None),
            Some(("imap.acme.io".to_string(), 993))
        );
    }

    #[test]
    fn missing_host_uses_provider() {
        assert_eq!(
            resolve_endpoint("me@icloud.com", None, None),
            Some(("imap.mail.me.com".to_string(), 993))
        );
        assert_eq!(resolve_endpoint("hr@acme.io", None, Some(993)), None);
    }
}
